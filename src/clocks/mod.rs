use core::cell::RefCell;

use critical_section::Mutex;
use paste::paste;

use crate::pac::clk;
use crate::sys::{self, Unlocked};

pub mod config;

pub use config::{ModuleClockConfig, OscillatorSwitch, SystemClockConfig};

/// Highest HCLK the M46x is rated for.
pub const MAX_CORE_CLOCK: u32 = 200_000_000;
pub const HIRC_FREQUENCY: u32 = 12_000_000;

static CLOCKS: Mutex<RefCell<Option<Clocks>>> = Mutex::new(RefCell::new(None));

/// `init` is the main entrypoint for configuring clocks.
///
/// This should be called once on startup, before any driver is created.
///
/// Once this function has completed successfully, the oscillators and the
/// core clock are configured as specified in [`SystemClockConfig`], and the
/// resulting clock tree is stored in a write-once static. It can be read
/// back with [`with_clocks`].
pub(crate) fn init(config: &SystemClockConfig) -> Result<(), ClockError> {
    // Ensure we haven't already configured the clocks
    critical_section::with(|cs| {
        if CLOCKS.borrow_ref(cs).is_some() {
            Err(ClockError::AlreadyConfigured)
        } else {
            Ok(())
        }
    })?;

    let clocks = configure_system_clocks(config)?;
    store(clocks)
}

fn store(clocks: Clocks) -> Result<(), ClockError> {
    critical_section::with(|cs| {
        let mut slot = CLOCKS.borrow_ref_mut(cs);
        if slot.is_some() {
            return Err(ClockError::AlreadyConfigured);
        }
        *slot = Some(clocks);
        Ok(())
    })
}

/// Programs oscillators, `PCLKDIV` and the core clock, then reads the
/// resulting clock tree back from hardware.
///
/// Every step is skipped when its setting is absent. Runs entirely inside one
/// protected-register window, which is closed again on every exit path.
pub fn configure_system_clocks(config: &SystemClockConfig) -> Result<Clocks, ClockError> {
    log_switch("HXT", config.hxt);
    log_switch("LXT", config.lxt);
    log_switch("HIRC", config.hirc);
    log_switch("LIRC", config.lirc);
    log_switch("HIRC48", config.hirc48);
    if let Some(div) = config.pclk_div {
        info!("CLK_PCLKDIV: {:#x}", div);
    }
    if let Some(freq) = config.core_clock {
        info!("Core clock: {} (Hz)", freq);
    }

    let clocks = sys::with_unlocked(|unlocked| {
        let operator = ClockOperator {
            config,
            _unlocked: unlocked,
        };

        operator.setup_oscillator(Oscillator::Hxt, config.hxt)?;
        operator.setup_oscillator(Oscillator::Lxt, config.lxt)?;
        operator.setup_oscillator(Oscillator::Hirc, config.hirc)?;
        operator.setup_oscillator(Oscillator::Lirc, config.lirc)?;
        operator.setup_oscillator(Oscillator::Hirc48, config.hirc48)?;
        operator.setup_pclk_div();
        operator.setup_core_clock()?;

        Ok::<_, ClockError>(Clocks::read_from_hardware(config.hxt_frequency))
    })?;

    info!("SystemCoreClock: {} (Hz)", clocks.hclk);
    Ok(clocks)
}

fn log_switch(name: &'static str, switch: OscillatorSwitch) {
    match switch {
        OscillatorSwitch::Untouched => {}
        OscillatorSwitch::Enable => info!("Enable {}", name),
        OscillatorSwitch::Disable => info!("Disable {}", name),
    }
}

/// State of the clock tree after init.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Clocks {
    /// External high speed crystal, at the board's crystal frequency
    pub hxt: Option<u32>,
    /// External 32.768 kHz crystal
    pub lxt: StaticClock<32_768>,
    /// "HIRC", the internal 12 MHz RC oscillator the chip boots from
    pub hirc: StaticClock<HIRC_FREQUENCY>,
    /// "LIRC", the internal 10 kHz RC oscillator
    pub lirc: StaticClock<10_000>,
    /// Internal 48 MHz RC oscillator, used by USB
    pub hirc48: StaticClock<48_000_000>,
    /// PLL output, if the PLL is powered
    pub pll: Option<u32>,
    /// Core and AHB clock. Also "SystemCoreClock"
    pub hclk: u32,
    /// APB0 bus clock
    pub pclk0: u32,
    /// APB1 bus clock
    pub pclk1: u32,
}

impl Clocks {
    /// Recomputes the clock tree from the clock controller registers.
    ///
    /// HCLK follows the selected source's nominal frequency, the same way
    /// the boot code derives `SystemCoreClock`.
    pub fn read_from_hardware(hxt_frequency: u32) -> Self {
        let pwrctl = clk::pwrctl().read();
        let running = |bit: u32| pwrctl & bit != 0;

        let mut clocks = Clocks {
            hxt: running(clk::PWRCTL_HXTEN).then_some(hxt_frequency),
            lxt: StaticClock {
                enabled: running(clk::PWRCTL_LXTEN),
            },
            hirc: StaticClock {
                enabled: running(clk::PWRCTL_HIRCEN),
            },
            lirc: StaticClock {
                enabled: running(clk::PWRCTL_LIRCEN),
            },
            hirc48: StaticClock {
                enabled: running(clk::PWRCTL_HIRC48EN),
            },
            ..Default::default()
        };

        let pllctl = clk::pllctl().read();
        let pll_input = if pllctl & clk::PLLCTL_PLLSRC_HIRC != 0 {
            clocks.hirc.frequency()
        } else {
            hxt_frequency
        };
        let pll_output = if pllctl & clk::PLLCTL_BP != 0 {
            pll_input
        } else {
            PllSettings::from_pllctl(pllctl).frequency(pll_input)
        };
        clocks.pll = (pllctl & clk::PLLCTL_PD == 0).then_some(pll_output);

        let hclk_source = match clk::clksel0().read_field(clk::HCLKSEL_POS, clk::HCLKSEL_MASK) {
            clk::HCLKSEL_HXT => hxt_frequency,
            clk::HCLKSEL_LXT => clocks.lxt.frequency(),
            clk::HCLKSEL_PLL => pll_output,
            clk::HCLKSEL_LIRC => clocks.lirc.frequency(),
            clk::HCLKSEL_HIRC => clocks.hirc.frequency(),
            _ => 0,
        };
        let hclk_div = clk::clkdiv0().read_field(clk::HCLKDIV_POS, clk::HCLKDIV_MASK) + 1;
        clocks.hclk = hclk_source / hclk_div;

        let pclkdiv = clk::pclkdiv().read();
        clocks.pclk0 = clocks.hclk >> ((pclkdiv >> clk::APB0DIV_POS) & clk::APBDIV_MASK);
        clocks.pclk1 = clocks.hclk >> ((pclkdiv >> clk::APB1DIV_POS) & clk::APBDIV_MASK);

        clocks
    }

    fn ensure_hxt(&self) -> Result<u32, ClockError> {
        self.hxt
            .ok_or_else(|| ClockError::bad_config("hxt needed but not enabled"))
    }

    fn ensure_lxt(&self) -> Result<u32, ClockError> {
        self.lxt
            .as_option()
            .ok_or_else(|| ClockError::bad_config("lxt needed but not enabled"))
    }

    fn ensure_hirc(&self) -> Result<u32, ClockError> {
        self.hirc
            .as_option()
            .ok_or_else(|| ClockError::bad_config("hirc needed but not enabled"))
    }

    fn ensure_lirc(&self) -> Result<u32, ClockError> {
        self.lirc
            .as_option()
            .ok_or_else(|| ClockError::bad_config("lirc needed but not enabled"))
    }

    fn ensure_hirc48(&self) -> Result<u32, ClockError> {
        self.hirc48
            .as_option()
            .ok_or_else(|| ClockError::bad_config("hirc48 needed but not enabled"))
    }

    fn ensure_pll(&self) -> Result<u32, ClockError> {
        self.pll
            .ok_or_else(|| ClockError::bad_config("pll needed but not enabled"))
    }

    /// Frequency of `source`, or an error if that source is not running.
    pub fn rate(&self, source: ClockSource) -> Result<u32, ClockError> {
        match source {
            ClockSource::Hxt => self.ensure_hxt(),
            ClockSource::Lxt => self.ensure_lxt(),
            ClockSource::Hirc => self.ensure_hirc(),
            ClockSource::Lirc => self.ensure_lirc(),
            ClockSource::Hirc48 => self.ensure_hirc48(),
            ClockSource::Pll => self.ensure_pll(),
            ClockSource::PllDiv2 => Ok(self.ensure_pll()? / 2),
            ClockSource::Hclk => Ok(self.hclk),
            ClockSource::Pclk0 => Ok(self.pclk0),
            ClockSource::Pclk1 => Ok(self.pclk1),
        }
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StaticClock<const F: u32> {
    pub enabled: bool,
}

impl<const F: u32> StaticClock<F> {
    fn as_option(self) -> Option<u32> {
        self.into()
    }

    fn frequency(&self) -> u32 {
        F
    }
}

impl<const F: u32> From<StaticClock<F>> for Option<u32> {
    fn from(value: StaticClock<F>) -> Self {
        value.enabled.then_some(F)
    }
}

/// Clock signals a peripheral clock select field can pick from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    Hxt,
    Lxt,
    Hirc,
    Lirc,
    Hirc48,
    Pll,
    /// PLL output halved, as fed to the UART clock selects.
    PllDiv2,
    Hclk,
    Pclk0,
    Pclk1,
}

/// The oscillators early init can switch, plus the PLL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Oscillator {
    Hxt,
    Lxt,
    Hirc,
    Lirc,
    Hirc48,
    Pll,
}

impl Oscillator {
    /// Enable bit in `PWRCTL`. The PLL is powered through `PLLCTL` instead.
    const fn power_bit(self) -> Option<u32> {
        match self {
            Self::Hxt => Some(clk::PWRCTL_HXTEN),
            Self::Lxt => Some(clk::PWRCTL_LXTEN),
            Self::Hirc => Some(clk::PWRCTL_HIRCEN),
            Self::Lirc => Some(clk::PWRCTL_LIRCEN),
            Self::Hirc48 => Some(clk::PWRCTL_HIRC48EN),
            Self::Pll => None,
        }
    }

    const fn stable_bit(self) -> u32 {
        match self {
            Self::Hxt => clk::STATUS_HXTSTB,
            Self::Lxt => clk::STATUS_LXTSTB,
            Self::Hirc => clk::STATUS_HIRCSTB,
            Self::Lirc => clk::STATUS_LIRCSTB,
            Self::Hirc48 => clk::STATUS_HIRC48STB,
            Self::Pll => clk::STATUS_PLLSTB,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// The requested configuration was impossible or conflicting
    BadConfiguration { reason: &'static str },
    /// A programming error occurred. This should be impossible.
    Programming { reason: &'static str },
    /// Attempted to re-configure the clocks, calling `init` twice.
    AlreadyConfigured,
    /// The clocks have not been configured yet.
    NotInitialized,
    /// The operation has no hardware counterpart on this chip.
    NotSupported,
    /// An oscillator did not report stable within the configured poll budget.
    OscillatorNotStable { oscillator: Oscillator },
}

impl ClockError {
    fn bad_config(reason: &'static str) -> Self {
        Self::BadConfiguration { reason }
    }

    fn prog_err(reason: &'static str) -> Self {
        Self::Programming { reason }
    }
}

impl core::fmt::Display for ClockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadConfiguration { reason } => write!(f, "bad clock configuration: {reason}"),
            Self::Programming { reason } => write!(f, "clock driver bug: {reason}"),
            Self::AlreadyConfigured => f.write_str("clocks already configured"),
            Self::NotInitialized => f.write_str("clocks not configured yet"),
            Self::NotSupported => f.write_str("operation not supported"),
            Self::OscillatorNotStable { oscillator } => write!(f, "{oscillator:?} did not become stable"),
        }
    }
}

impl core::error::Error for ClockError {}

struct ClockOperator<'a, 'cs> {
    config: &'a SystemClockConfig,
    _unlocked: &'a Unlocked<'cs>,
}

impl ClockOperator<'_, '_> {
    /// ```text
    ///                 ┌──────────┐
    ///  xtal / rc ────▶│oscillator│───────▶ to clock muxes
    ///                 └──────────┘
    ///                       ▲      │
    ///                       │      └──────▶ CLK_STATUS.xxxSTB
    ///               CLK_PWRCTL.xxxEN
    /// ```
    fn setup_oscillator(&self, oscillator: Oscillator, switch: OscillatorSwitch) -> Result<(), ClockError> {
        let Some(bit) = oscillator.power_bit() else {
            return Err(ClockError::prog_err("oscillator has no PWRCTL enable"));
        };
        match switch {
            OscillatorSwitch::Untouched => {}
            OscillatorSwitch::Enable => {
                clk::pwrctl().set_bits(bit);
                self.wait_stable(oscillator)?;
                debug!("{:?} stable", oscillator);
            }
            OscillatorSwitch::Disable => {
                clk::pwrctl().clear_bits(bit);
            }
        }
        Ok(())
    }

    fn wait_stable(&self, oscillator: Oscillator) -> Result<(), ClockError> {
        let mask = oscillator.stable_bit();
        let mut budget = self.config.stable_timeout;
        while clk::status().read() & mask == 0 {
            if let Some(left) = budget.as_mut() {
                if *left == 0 {
                    warn!("{:?} not stable, giving up", oscillator);
                    return Err(ClockError::OscillatorNotStable { oscillator });
                }
                *left -= 1;
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    fn setup_pclk_div(&self) {
        if let Some(div) = self.config.pclk_div {
            clk::pclkdiv().write(div);
        }
    }

    /// ```text
    ///        hxt ┌─────┐   ┌─────┐
    /// ──────────▶│0    │   │     │ pll_clk  ┌─────┐
    ///       hirc │     │──▶│ PLL │─────────▶│010  │   ┌───────┐
    /// ──────────▶│1    │   │     │    hirc  │     │──▶│HCLKDIV│──▶ hclk
    ///            └─────┘   └─────┘ ────────▶│111  │   └───────┘
    ///               ▲                       └─────┘
    ///               │                          ▲
    ///      PLLCTL.PLLSRC                CLKSEL0.HCLKSEL
    /// ```
    ///
    /// HCLK runs from HIRC while the PLL is reprogrammed.
    fn setup_core_clock(&self) -> Result<(), ClockError> {
        let Some(requested) = self.config.core_clock else {
            return Ok(());
        };
        let target = requested.min(MAX_CORE_CLOCK);

        let from_hxt = clk::pwrctl().read() & clk::PWRCTL_HXTEN != 0;
        let (fin, source) = if from_hxt {
            (self.config.hxt_frequency, 0)
        } else {
            (HIRC_FREQUENCY, clk::PLLCTL_PLLSRC_HIRC)
        };
        let settings =
            PllSettings::search(fin, target).ok_or_else(|| ClockError::bad_config("core clock out of PLL range"))?;

        if clk::pwrctl().read() & clk::PWRCTL_HIRCEN == 0 {
            clk::pwrctl().set_bits(clk::PWRCTL_HIRCEN);
            self.wait_stable(Oscillator::Hirc)?;
        }
        clk::clksel0().write_field(clk::HCLKSEL_POS, clk::HCLKSEL_MASK, clk::HCLKSEL_HIRC);
        clk::clkdiv0().write_field(clk::HCLKDIV_POS, clk::HCLKDIV_MASK, 0);

        clk::pllctl().write(clk::PLLCTL_PD);
        clk::pllctl().write(settings.pllctl() | source | clk::PLLCTL_STBSEL);
        self.wait_stable(Oscillator::Pll)?;

        clk::clksel0().write_field(clk::HCLKSEL_POS, clk::HCLKSEL_MASK, clk::HCLKSEL_PLL);
        debug!("HCLK from PLL at {} Hz", settings.frequency(fin));
        Ok(())
    }
}

/// PLL divider settings.
///
/// `FOUT = FIN * 2 * (FBDIV + 2) / ((INDIV + 1) * NO)` with `NO` picked by
/// `OUTDIV` from `[1, 2, 2, 4]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllSettings {
    pub fbdiv: u32,
    pub indiv: u32,
    pub outdiv: u32,
}

impl PllSettings {
    const OUTPUT_DIVIDERS: [u32; 4] = [1, 2, 2, 4];
    const REF_MIN: u64 = 4_000_000;
    const REF_MAX: u64 = 8_000_000;
    const VCO_MIN: u64 = 200_000_000;
    const VCO_MAX: u64 = 500_000_000;

    /// Finds the settings whose output is closest to `target`.
    ///
    /// Returns `None` if no legal combination lands inside the VCO range.
    pub fn search(fin: u32, target: u32) -> Option<Self> {
        let mut best: Option<(Self, u32)> = None;
        for outdiv in 0..Self::OUTPUT_DIVIDERS.len() as u32 {
            let no = u64::from(Self::OUTPUT_DIVIDERS[outdiv as usize]);
            for indiv in 0..=clk::PLLCTL_INDIV_MASK {
                let fref = u64::from(fin) / u64::from(indiv + 1);
                if !(Self::REF_MIN..=Self::REF_MAX).contains(&fref) {
                    continue;
                }
                // rounded `target * NO / (2 * FREF)`
                let nf = (u64::from(target) * no + fref) / (2 * fref);
                if nf < 2 || nf - 2 > u64::from(clk::PLLCTL_FBDIV_MASK) {
                    continue;
                }
                let fvco = 2 * fref * nf;
                if !(Self::VCO_MIN..=Self::VCO_MAX).contains(&fvco) {
                    continue;
                }
                let settings = Self {
                    fbdiv: (nf - 2) as u32,
                    indiv,
                    outdiv,
                };
                let error = settings.frequency(fin).abs_diff(target);
                if best.map_or(true, |(_, best_error)| error < best_error) {
                    best = Some((settings, error));
                    if error == 0 {
                        return Some(settings);
                    }
                }
            }
        }
        best.map(|(settings, _)| settings)
    }

    pub fn from_pllctl(pllctl: u32) -> Self {
        Self {
            fbdiv: (pllctl >> clk::PLLCTL_FBDIV_POS) & clk::PLLCTL_FBDIV_MASK,
            indiv: (pllctl >> clk::PLLCTL_INDIV_POS) & clk::PLLCTL_INDIV_MASK,
            outdiv: (pllctl >> clk::PLLCTL_OUTDIV_POS) & clk::PLLCTL_OUTDIV_MASK,
        }
    }

    /// Divider fields of `PLLCTL`, power and source bits left clear.
    pub fn pllctl(self) -> u32 {
        ((self.fbdiv & clk::PLLCTL_FBDIV_MASK) << clk::PLLCTL_FBDIV_POS)
            | ((self.indiv & clk::PLLCTL_INDIV_MASK) << clk::PLLCTL_INDIV_POS)
            | ((self.outdiv & clk::PLLCTL_OUTDIV_MASK) << clk::PLLCTL_OUTDIV_POS)
    }

    pub fn frequency(self, fin: u32) -> u32 {
        let no = u64::from(Self::OUTPUT_DIVIDERS[(self.outdiv & clk::PLLCTL_OUTDIV_MASK) as usize]);
        let num = u64::from(fin) * 2 * u64::from(self.fbdiv + 2);
        (num / (u64::from(self.indiv + 1) * no)) as u32
    }
}

/// In MOST cases, drivers read their input frequency through
/// [`module_clock_rate`] while holding the clocks.
///
/// This function runs the provided closure *inside of a critical section*, so move with
/// purpose! You can clone-out the Clocks struct if necessary, or perform a more directed
/// query and return that instead.
///
/// Returns `None` if the clocks have not yet been initialized.
pub fn with_clocks<F: FnOnce(&Clocks) -> R, R>(f: F) -> Option<R> {
    critical_section::with(|cs| {
        let c = CLOCKS.borrow_ref(cs);
        let c = c.as_ref()?;
        Some(f(c))
    })
}

/// A register field of the clock controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Field {
    offset: usize,
    pos: u32,
    mask: u32,
}

impl Field {
    fn read(self) -> u32 {
        clk::reg(self.offset).read_field(self.pos, self.mask)
    }

    /// Replaces the field with `value`, which is already shifted into place.
    fn write_shifted(self, value: u32) {
        clk::reg(self.offset).modify(|v| (v & !(self.mask << self.pos)) | value);
    }
}

/// Opaque module clock index: where a peripheral's gate, source select and
/// divider live.
///
/// ```text
///  31   29 28   26 25   23 22    18 17   15 14   11 10     6 5  4     0
/// ┌───────┬───────┬───────┬────────┬───────┬───────┬────────┬──┬───────┐
/// │ gate  │ sel   │ sel   │ sel    │ div   │ div   │ div    │  │ gate  │
/// │ reg   │ reg   │ width │ pos    │ reg   │ width │ pos    │  │ bit   │
/// └───────┴───────┴───────┴────────┴───────┴───────┴────────┴──┴───────┘
/// ```
///
/// Register selector 7 means "this module has no such field".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleClock(u32);

impl ModuleClock {
    const NONE: u32 = 0x7;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// `gate` is `(gate register, bit)`, `select` and `divider` are
    /// `(register, position, width)`.
    pub const fn from_parts(gate: (u32, u32), select: Option<(u32, u32, u32)>, divider: Option<(u32, u32, u32)>) -> Self {
        let mut raw = (gate.0 << 29) | (gate.1 & 0x1f);
        raw |= match select {
            Some((reg, pos, width)) => ((reg & 0x7) << 26) | ((width & 0x7) << 23) | ((pos & 0x1f) << 18),
            None => Self::NONE << 26,
        };
        raw |= match divider {
            Some((reg, pos, width)) => ((reg & 0x7) << 15) | ((width & 0xf) << 11) | ((pos & 0x1f) << 6),
            None => Self::NONE << 15,
        };
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Shifts plain field values into place for [`configure`].
    pub const fn config(self, source: u32, divider: u32) -> ModuleClockConfig {
        let select_pos = (self.0 >> 18) & 0x1f;
        let divider_pos = (self.0 >> 6) & 0x1f;
        ModuleClockConfig::new(source << select_pos, divider << divider_pos)
    }

    fn gate(self) -> Result<(usize, u32), ClockError> {
        let reg = clk::GATE_REGS
            .get((self.0 >> 29) as usize)
            .ok_or_else(|| ClockError::bad_config("module clock names no gate register"))?;
        Ok((*reg, self.0 & 0x1f))
    }

    fn select(self) -> Result<Option<Field>, ClockError> {
        let index = (self.0 >> 26) & 0x7;
        if index == Self::NONE {
            return Ok(None);
        }
        let offset = clk::SEL_REGS
            .get(index as usize)
            .ok_or_else(|| ClockError::bad_config("module clock names no select register"))?;
        let width = (self.0 >> 23) & 0x7;
        Ok(Some(Field {
            offset: *offset,
            pos: (self.0 >> 18) & 0x1f,
            mask: (1 << width) - 1,
        }))
    }

    fn divider(self) -> Result<Option<Field>, ClockError> {
        let index = (self.0 >> 15) & 0x7;
        if index == Self::NONE {
            return Ok(None);
        }
        let offset = clk::DIV_REGS
            .get(index as usize)
            .ok_or_else(|| ClockError::bad_config("module clock names no divider register"))?;
        let width = (self.0 >> 11) & 0xf;
        Ok(Some(Field {
            offset: *offset,
            pos: (self.0 >> 6) & 0x1f,
            mask: (1 << width) - 1,
        }))
    }

    /// Clock signals behind select values `0..`, for modules with a select.
    fn sources(self) -> &'static [ClockSource] {
        const UART_APB0: [ClockSource; 6] = [
            ClockSource::Hxt,
            ClockSource::PllDiv2,
            ClockSource::Lxt,
            ClockSource::Hirc,
            ClockSource::Pclk0,
            ClockSource::Lirc,
        ];
        const UART_APB1: [ClockSource; 6] = [
            ClockSource::Hxt,
            ClockSource::PllDiv2,
            ClockSource::Lxt,
            ClockSource::Hirc,
            ClockSource::Pclk1,
            ClockSource::Lirc,
        ];
        match self {
            Self::UART0 | Self::UART2 => &UART_APB0,
            Self::UART1 | Self::UART3 => &UART_APB1,
            _ => &[],
        }
    }

    pub const GPA: Self = Self::from_parts((0, 24), None, None);
    pub const GPB: Self = Self::from_parts((0, 25), None, None);
    pub const GPC: Self = Self::from_parts((0, 26), None, None);
    pub const GPD: Self = Self::from_parts((0, 27), None, None);
    pub const GPE: Self = Self::from_parts((0, 28), None, None);
    pub const GPF: Self = Self::from_parts((0, 29), None, None);
    pub const GPG: Self = Self::from_parts((0, 30), None, None);
    pub const GPH: Self = Self::from_parts((0, 31), None, None);
    pub const UART0: Self = Self::from_parts((1, 16), Some((1, 24, 3)), Some((0, 8, 4)));
    pub const UART1: Self = Self::from_parts((1, 17), Some((1, 28, 3)), Some((0, 12, 4)));
    pub const UART2: Self = Self::from_parts((1, 18), Some((3, 24, 3)), Some((4, 0, 4)));
    pub const UART3: Self = Self::from_parts((1, 19), Some((3, 28, 3)), Some((4, 4, 4)));
}

/// Select values for the UART clock source field. Shift them into place
/// with [`ModuleClock::config`].
pub mod uart_source {
    pub const HXT: u32 = 0;
    /// PLL output divided by 2.
    pub const PLL_DIV2: u32 = 1;
    pub const LXT: u32 = 2;
    pub const HIRC: u32 = 3;
    pub const PCLK: u32 = 4;
    pub const LIRC: u32 = 5;
}

/// Turns a module's clock on.
pub fn enable(module: ModuleClock) -> Result<(), ClockError> {
    let (offset, bit) = module.gate()?;
    sys::with_unlocked(|_| clk::reg(offset).set_bits(1 << bit));
    trace!("module clock {:#x} on", module.raw());
    Ok(())
}

/// Turns a module's clock off.
pub fn disable(module: ModuleClock) -> Result<(), ClockError> {
    let (offset, bit) = module.gate()?;
    sys::with_unlocked(|_| clk::reg(offset).clear_bits(1 << bit));
    trace!("module clock {:#x} off", module.raw());
    Ok(())
}

/// Writes the source select, then the divider of `module`.
///
/// Fields the module does not have are skipped. The values are not checked
/// against what the module accepts.
pub fn configure(module: ModuleClock, config: &ModuleClockConfig) -> Result<(), ClockError> {
    let select = module.select()?;
    let divider = module.divider()?;
    sys::with_unlocked(|_| {
        if let Some(field) = select {
            field.write_shifted(config.source);
        }
        if let Some(field) = divider {
            field.write_shifted(config.divider);
        }
    });
    trace!(
        "module clock {:#x}: source {:#x} divider {:#x}",
        module.raw(),
        config.source,
        config.divider
    );
    Ok(())
}

/// Per-module rate queries are not provided by this controller.
pub fn get_rate(_module: ModuleClock) -> Result<u32, ClockError> {
    Err(ClockError::NotSupported)
}

/// Per-module rate changes are not provided by this controller.
pub fn set_rate(_module: ModuleClock, _rate: u32) -> Result<(), ClockError> {
    Err(ClockError::NotSupported)
}

/// Input frequency of `module`, derived from its select and divider fields.
///
/// Modules without a select field run from HCLK.
pub fn module_clock_rate(clocks: &Clocks, module: ModuleClock) -> Result<u32, ClockError> {
    let input = match module.select()? {
        None => clocks.hclk,
        Some(field) => {
            let source = module
                .sources()
                .get(field.read() as usize)
                .copied()
                .ok_or_else(|| ClockError::bad_config("module clock source has no known frequency"))?;
            clocks.rate(source)?
        }
    };
    let divider = match module.divider()? {
        None => 1,
        Some(field) => field.read() + 1,
    };
    Ok(input / divider)
}

/// Trait to expose peripheral clocks
pub(crate) trait SealedClockedPeripheral {
    const MODULE: ModuleClock;
}

/// Clock gating for peripherals
#[allow(private_bounds)]
pub trait ClockedPeripheral: SealedClockedPeripheral + 'static {}

/// Enables the clock of peripheral `T`, applying `config` first when given.
///
/// The caller's unlock window is reused.
pub(crate) fn enable_peripheral<T: ClockedPeripheral>(
    _unlocked: &Unlocked<'_>,
    config: Option<&ModuleClockConfig>,
) -> Result<(), ClockError> {
    enable(T::MODULE)?;
    if let Some(config) = config {
        configure(T::MODULE, config)?;
    }
    Ok(())
}

macro_rules! impl_module_clock {
    ($peripheral:ident, $module:ident) => {
        impl SealedClockedPeripheral for crate::peripherals::$peripheral {
            const MODULE: ModuleClock = ModuleClock::$module;
        }

        impl ClockedPeripheral for crate::peripherals::$peripheral {}
    };
    (GPIO $($bank:ident),*) => {
        $(
            paste! {
                impl_module_clock!([<GPIO $bank>], [<GP $bank>]);
            }
        )*
    };
}

impl_module_clock!(GPIO A, B, C, D, E, F, G, H);
impl_module_clock!(UART0, UART0);
impl_module_clock!(UART1, UART1);
impl_module_clock!(UART2, UART2);
impl_module_clock!(UART3, UART3);

/// Makes sure a clock tree is stored for driver tests. The first caller wins.
#[cfg(test)]
pub(crate) fn init_for_test() {
    let _ = store(Clocks {
        hxt: Some(12_000_000),
        hirc: StaticClock { enabled: true },
        lirc: StaticClock { enabled: true },
        pll: Some(192_000_000),
        hclk: 192_000_000,
        pclk0: 96_000_000,
        pclk1: 96_000_000,
        ..Default::default()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pac::sim;

    const PWRCTL: usize = clk::BASE + clk::PWRCTL;
    const STATUS: usize = clk::BASE + clk::STATUS;
    const CLKSEL0: usize = clk::BASE + clk::CLKSEL0;
    const CLKSEL1: usize = clk::BASE + clk::CLKSEL1;
    const CLKDIV0: usize = clk::BASE + clk::CLKDIV0;
    const APBCLK0: usize = clk::BASE + clk::APBCLK0;
    const AHBCLK0: usize = clk::BASE + clk::AHBCLK0;
    const PCLKDIV: usize = clk::BASE + clk::PCLKDIV;
    const PLLCTL: usize = clk::BASE + clk::PLLCTL;
    const REGLCTL: usize = crate::pac::sys::BASE + crate::pac::sys::REGLCTL;

    fn boot_state() {
        sim::reset();
        sim::poke(PWRCTL, clk::PWRCTL_HIRCEN | clk::PWRCTL_LIRCEN);
        sim::poke(CLKSEL0, clk::HCLKSEL_HIRC);
        sim::poke(PLLCTL, clk::PLLCTL_PD);
    }

    #[test]
    fn module_clock_layout() {
        let uart0 = ModuleClock::UART0;
        assert_eq!(uart0.gate(), Ok((clk::APBCLK0, 16)));
        assert_eq!(
            uart0.select(),
            Ok(Some(Field {
                offset: clk::CLKSEL1,
                pos: 24,
                mask: 0x7
            }))
        );
        assert_eq!(
            uart0.divider(),
            Ok(Some(Field {
                offset: clk::CLKDIV0,
                pos: 8,
                mask: 0xf
            }))
        );
        assert_eq!(ModuleClock::GPC.gate(), Ok((clk::AHBCLK0, 26)));
        assert_eq!(ModuleClock::GPC.select(), Ok(None));
        assert_eq!(ModuleClock::GPC.divider(), Ok(None));
    }

    #[test]
    fn enable_and_disable_toggle_the_gate_inside_the_window() {
        sim::reset();
        enable(ModuleClock::UART1).unwrap();
        assert_eq!(sim::peek(APBCLK0), 1 << 17);
        assert!(sim::first_write(APBCLK0) > sim::first_write(REGLCTL));
        assert!(sim::last_write(APBCLK0) < sim::last_write(REGLCTL));
        assert!(!sys::is_unlocked());

        enable(ModuleClock::GPH).unwrap();
        assert_eq!(sim::peek(AHBCLK0), 1 << 31);

        disable(ModuleClock::UART1).unwrap();
        assert_eq!(sim::peek(APBCLK0), 0);
    }

    #[test]
    fn configure_writes_source_and_divider_verbatim() {
        sim::reset();
        sim::poke(CLKSEL1, 0xffff_ffff);
        sim::poke(CLKDIV0, 0xffff_ffff);
        let config = ModuleClock::UART0.config(uart_source::HIRC, 1);
        assert_eq!(config, ModuleClockConfig::new(3 << 24, 1 << 8));
        configure(ModuleClock::UART0, &config).unwrap();
        assert_eq!(sim::peek(CLKSEL1), 0xfbff_ffff);
        assert_eq!(sim::peek(CLKDIV0), 0xffff_f1ff);
        assert!(sim::first_write(CLKSEL1) < sim::first_write(CLKDIV0));
        assert!(!sys::is_unlocked());
    }

    #[test]
    fn configure_without_fields_is_a_no_op() {
        sim::reset();
        configure(ModuleClock::GPA, &ModuleClockConfig::new(0xff, 0xff)).unwrap();
        assert!(sim::writes_to(CLKSEL1).is_empty());
        assert!(sim::writes_to(CLKDIV0).is_empty());
    }

    #[test]
    fn bad_module_index_is_rejected() {
        sim::reset();
        let bogus = ModuleClock::new(0xffff_ffff);
        assert!(matches!(enable(bogus), Err(ClockError::BadConfiguration { .. })));
        assert!(sim::log().is_empty());
    }

    #[test]
    fn rate_queries_are_not_supported() {
        assert_eq!(get_rate(ModuleClock::UART0), Err(ClockError::NotSupported));
        assert_eq!(set_rate(ModuleClock::UART0, 1_000_000), Err(ClockError::NotSupported));
    }

    #[test]
    fn pll_search_hits_exact_targets() {
        let max = PllSettings::search(12_000_000, 200_000_000).unwrap();
        assert_eq!(max.frequency(12_000_000), 200_000_000);

        let settings = PllSettings::search(12_000_000, 192_000_000).unwrap();
        assert_eq!(settings.frequency(12_000_000), 192_000_000);
        assert_eq!(PllSettings::from_pllctl(settings.pllctl()), settings);
    }

    #[test]
    fn pll_search_rejects_unreachable_targets() {
        assert_eq!(PllSettings::search(12_000_000, 10_000_000), None);
    }

    #[test]
    fn untouched_oscillators_are_left_alone() {
        boot_state();
        sim::clear_log();
        let clocks = configure_system_clocks(&SystemClockConfig::default()).unwrap();
        assert!(sim::writes_to(PWRCTL).is_empty());
        assert_eq!(sim::peek(PWRCTL), clk::PWRCTL_HIRCEN | clk::PWRCTL_LIRCEN);
        assert_eq!(clocks.hclk, 12_000_000);
        assert!(clocks.hirc.enabled);
        assert_eq!(clocks.hxt, None);
        assert_eq!(clocks.pll, None);
        assert!(!sys::is_unlocked());
    }

    #[test]
    fn switches_are_applied() {
        boot_state();
        sim::poke(STATUS, clk::STATUS_HXTSTB | clk::STATUS_LXTSTB);
        let config = SystemClockConfig {
            hxt: OscillatorSwitch::Enable,
            lxt: OscillatorSwitch::Enable,
            lirc: OscillatorSwitch::Disable,
            pclk_div: Some(0x11),
            ..Default::default()
        };
        let clocks = configure_system_clocks(&config).unwrap();
        assert_eq!(
            sim::peek(PWRCTL),
            clk::PWRCTL_HXTEN | clk::PWRCTL_LXTEN | clk::PWRCTL_HIRCEN
        );
        assert_eq!(sim::peek(PCLKDIV), 0x11);
        assert_eq!(clocks.hxt, Some(12_000_000));
        assert!(clocks.lxt.enabled);
        assert!(!clocks.lirc.enabled);
        assert_eq!(clocks.pclk0, 6_000_000);
        assert_eq!(clocks.pclk1, 6_000_000);
    }

    #[test]
    fn oscillator_timeout_relocks() {
        boot_state();
        let config = SystemClockConfig {
            hxt: OscillatorSwitch::Enable,
            stable_timeout: Some(10),
            ..Default::default()
        };
        assert_eq!(
            configure_system_clocks(&config),
            Err(ClockError::OscillatorNotStable {
                oscillator: Oscillator::Hxt
            })
        );
        assert!(!sys::is_unlocked());
    }

    #[test]
    fn core_clock_runs_from_the_pll() {
        boot_state();
        sim::poke(STATUS, clk::STATUS_HIRCSTB | clk::STATUS_PLLSTB);
        let config = SystemClockConfig {
            core_clock: Some(250_000_000),
            ..Default::default()
        };
        let clocks = configure_system_clocks(&config).unwrap();
        assert_eq!(clocks.hclk, MAX_CORE_CLOCK);
        assert_eq!(clocks.pll, Some(MAX_CORE_CLOCK));
        assert_ne!(sim::peek(PLLCTL) & clk::PLLCTL_PLLSRC_HIRC, 0);
        assert_eq!(sim::peek(PLLCTL) & clk::PLLCTL_PD, 0);

        let hclk_selects: std::vec::Vec<u32> = sim::writes_to(CLKSEL0).iter().map(|v| v & clk::HCLKSEL_MASK).collect();
        assert_eq!(hclk_selects, [clk::HCLKSEL_HIRC, clk::HCLKSEL_PLL]);
    }

    #[test]
    fn clock_tree_follows_dividers() {
        boot_state();
        sim::poke(CLKDIV0, 1);
        sim::poke(PCLKDIV, 0x21);
        let clocks = Clocks::read_from_hardware(12_000_000);
        assert_eq!(clocks.hclk, 6_000_000);
        assert_eq!(clocks.pclk0, 3_000_000);
        assert_eq!(clocks.pclk1, 1_500_000);
    }

    #[test]
    fn module_rate_uses_select_and_divider() {
        sim::reset();
        sim::poke(CLKSEL1, uart_source::HIRC << 24);
        sim::poke(CLKDIV0, 1 << 8);
        let clocks = Clocks {
            hirc: StaticClock { enabled: true },
            hclk: 12_000_000,
            ..Default::default()
        };
        assert_eq!(module_clock_rate(&clocks, ModuleClock::UART0), Ok(6_000_000));
        assert_eq!(module_clock_rate(&clocks, ModuleClock::GPB), Ok(12_000_000));

        sim::poke(CLKSEL1, uart_source::HXT << 24);
        assert!(matches!(
            module_clock_rate(&clocks, ModuleClock::UART0),
            Err(ClockError::BadConfiguration { .. })
        ));
    }

    #[test]
    fn uart_pll_source_is_half_the_pll() {
        sim::reset();
        sim::poke(CLKSEL1, uart_source::PLL_DIV2 << 28);
        sim::poke(CLKDIV0, 0);
        let clocks = Clocks {
            pll: Some(192_000_000),
            ..Default::default()
        };
        assert_eq!(module_clock_rate(&clocks, ModuleClock::UART1), Ok(96_000_000));
        assert_eq!(clocks.rate(ClockSource::Pll), Ok(192_000_000));

        let stopped = Clocks::default();
        assert!(matches!(
            module_clock_rate(&stopped, ModuleClock::UART1),
            Err(ClockError::BadConfiguration { .. })
        ));
    }

    #[test]
    fn second_store_is_rejected() {
        init_for_test();
        assert_eq!(store(Clocks::default()), Err(ClockError::AlreadyConfigured));
        assert!(with_clocks(|c| c.hclk).is_some());
    }
}
