/// What early init does with one oscillator.
///
/// `Untouched` leaves the enable bit exactly as reset (or the boot ROM) left
/// it. It does not mean "disable".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OscillatorSwitch {
    #[default]
    Untouched,
    Enable,
    Disable,
}

/// ```text
///                 ┌──────┐
///  xt1_in ───────▶│ HXT  │──────┬──────────────────────┐
///                 └──────┘      │   ┌─────┐            │   ┌─────┐
///                 ┌──────┐      └──▶│     │  pll_clk   └──▶│000  │
///                 │ HIRC │─────┬───▶│ PLL │───────────────▶│010  │   ┌─────────┐
///                 └──────┘     │    └─────┘                │     │──▶│ HCLKDIV │──▶ hclk
///                 ┌──────┐     └──────────────────────────▶│111  │   └─────────┘
///  x32_in ───────▶│ LXT  │────────────────────────────────▶│001  │        │
///                 └──────┘                                 │011  │        ▼
///                 ┌──────┐                                 └─────┘   ┌─────────┐
///                 │ LIRC │────────────────────────────────────▲      │ PCLKDIV │──▶ pclk0/1
///                 └──────┘                                 HCLKSEL   └─────────┘
///                 ┌──────┐
///                 │HIRC48│──▶ usb / sdh
///                 └──────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemClockConfig {
    /// External high speed crystal
    pub hxt: OscillatorSwitch,
    /// External 32.768 kHz crystal
    pub lxt: OscillatorSwitch,
    /// Internal 12 MHz RC oscillator
    pub hirc: OscillatorSwitch,
    /// Internal 10 kHz RC oscillator
    pub lirc: OscillatorSwitch,
    /// Internal 48 MHz RC oscillator
    pub hirc48: OscillatorSwitch,
    /// Frequency of the crystal fitted to XT1 on the board.
    pub hxt_frequency: u32,
    /// Raw value for `CLK_PCLKDIV`. `None` leaves the register alone.
    pub pclk_div: Option<u32>,
    /// Target HCLK in Hz. `None` leaves the core clock alone.
    ///
    /// Allowed range: `50_000_000..=200_000_000`, higher values are clamped.
    pub core_clock: Option<u32>,
    /// How many times the status register is polled for an oscillator or the
    /// PLL to become stable. `None` waits forever.
    pub stable_timeout: Option<u32>,
}

impl SystemClockConfig {
    /// Default poll budget for oscillator stability.
    pub const DEFAULT_STABLE_TIMEOUT: u32 = 2_400_000;
}

impl Default for SystemClockConfig {
    fn default() -> Self {
        Self {
            hxt: OscillatorSwitch::Untouched,
            lxt: OscillatorSwitch::Untouched,
            hirc: OscillatorSwitch::Untouched,
            lirc: OscillatorSwitch::Untouched,
            hirc48: OscillatorSwitch::Untouched,
            hxt_frequency: 12_000_000,
            pclk_div: None,
            core_clock: None,
            stable_timeout: Some(Self::DEFAULT_STABLE_TIMEOUT),
        }
    }
}

/// Source and divider of one peripheral clock.
///
/// Both values are written verbatim into the module's select and divider
/// fields, so they must already be shifted into position. No check is made
/// that the combination is legal for the module.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleClockConfig {
    pub source: u32,
    pub divider: u32,
}

impl ModuleClockConfig {
    pub const fn new(source: u32, divider: u32) -> Self {
        Self { source, divider }
    }
}
