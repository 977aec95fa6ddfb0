//! UART driver.
//!
//! [`Uart::new`] brings an instance up in the order the hardware wants it:
//! module clock and pin routing inside one unlock window, then a module reset,
//! then the baud generator and line settings. After that the driver offers
//! polled byte I/O, FIFO helpers for interrupt driven use, and the usual
//! `embedded-io` and `embedded-hal` serial traits.

use core::cell::Cell;
use core::marker::PhantomData;

use bitflags::bitflags;
use embassy_hal_internal::interrupt::{InterruptExt, Priority};
use embassy_hal_internal::{Peri, PeripheralType};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use paste::paste;

use crate::clocks::{self, ClockError, ClockedPeripheral, ModuleClockConfig};
use crate::pac;
use crate::pac::uart::*;
use crate::pinctrl::{self, PinMux};
use crate::sys::{self, ResetLine};

/// Number of UART instances.
pub const INSTANCES: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
    /// Not supported by this UART.
    Nine,
}

impl DataBits {
    fn line_bits(self) -> Result<u32, Error> {
        match self {
            Self::Five => Ok(LINE_WLS_5),
            Self::Six => Ok(LINE_WLS_6),
            Self::Seven => Ok(LINE_WLS_7),
            Self::Eight => Ok(LINE_WLS_8),
            Self::Nine => Err(Error::NotSupported),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    /// Not supported by this UART.
    Half,
    #[default]
    One,
    /// Only valid with five data bits. With more, the hardware sends two.
    OneAndHalf,
    Two,
}

impl StopBits {
    fn line_bits(self) -> Result<u32, Error> {
        match self {
            Self::Half => Err(Error::NotSupported),
            Self::One => Ok(0),
            Self::OneAndHalf | Self::Two => Ok(LINE_NSB),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    fn line_bits(self) -> u32 {
        match self {
            Self::None => PARITY_NONE,
            Self::Odd => PARITY_ODD,
            Self::Even => PARITY_EVEN,
            Self::Mark => PARITY_MARK,
            Self::Space => PARITY_SPACE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowControl {
    #[default]
    None,
    RtsCts,
    /// Not supported by this UART.
    DtrDsr,
}

/// Line settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub baudrate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baudrate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl Config {
    /// `LINE` value for these settings.
    fn line(&self) -> Result<u32, Error> {
        let data = self.data_bits.line_bits()?;
        let stop = self.stop_bits.line_bits()?;
        Ok(data | stop | self.parity.line_bits())
    }
}

bitflags! {
    /// Receive errors latched by the hardware.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LineErrors: u8 {
        const OVERRUN = 1 << 0;
        const PARITY = 1 << 1;
        const FRAMING = 1 << 2;
        const BREAK = 1 << 3;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for LineErrors {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "LineErrors({=u8:#x})", self.bits())
    }
}

impl LineErrors {
    fn from_fifosts(fifosts: u32) -> Self {
        let mut errors = Self::empty();
        errors.set(Self::OVERRUN, fifosts & FIFOSTS_RXOVIF != 0);
        errors.set(Self::PARITY, fifosts & FIFOSTS_PEF != 0);
        errors.set(Self::FRAMING, fifosts & FIFOSTS_FEF != 0);
        errors.set(Self::BREAK, fifosts & FIFOSTS_BIF != 0);
        errors
    }

    /// The most severe error in the set, if any.
    pub fn first(self) -> Option<Error> {
        if self.contains(Self::OVERRUN) {
            Some(Error::Overrun)
        } else if self.contains(Self::BREAK) {
            Some(Error::Break)
        } else if self.contains(Self::FRAMING) {
            Some(Error::Framing)
        } else if self.contains(Self::PARITY) {
            Some(Error::Parity)
        } else {
            None
        }
    }
}

const ERROR_FLAGS: u32 = FIFOSTS_RXOVIF | FIFOSTS_PEF | FIFOSTS_FEF | FIFOSTS_BIF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Setting the hardware cannot do.
    NotSupported,
    /// Baud rate of zero, or one the module clock cannot divide down to.
    InvalidArgument,
    Overrun,
    Parity,
    Framing,
    Break,
    Clock(ClockError),
    Pinctrl(pinctrl::Error),
    Reset(sys::Error),
}

impl From<ClockError> for Error {
    fn from(error: ClockError) -> Self {
        Self::Clock(error)
    }
}

impl From<pinctrl::Error> for Error {
    fn from(error: pinctrl::Error) -> Self {
        Self::Pinctrl(error)
    }
}

impl From<sys::Error> for Error {
    fn from(error: sys::Error) -> Self {
        Self::Reset(error)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotSupported => f.write_str("setting not supported"),
            Self::InvalidArgument => f.write_str("invalid baud rate"),
            Self::Overrun => f.write_str("receive overrun"),
            Self::Parity => f.write_str("parity error"),
            Self::Framing => f.write_str("framing error"),
            Self::Break => f.write_str("break condition"),
            Self::Clock(e) => write!(f, "clock: {e}"),
            Self::Pinctrl(e) => write!(f, "pinctrl: {e}"),
            Self::Reset(e) => write!(f, "reset: {e}"),
        }
    }
}

impl core::error::Error for Error {}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::NotSupported => embedded_io::ErrorKind::Unsupported,
            Self::InvalidArgument => embedded_io::ErrorKind::InvalidInput,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_hal_nb::serial::Error for Error {
    fn kind(&self) -> embedded_hal_nb::serial::ErrorKind {
        use embedded_hal_nb::serial::ErrorKind;
        match self {
            Self::Overrun => ErrorKind::Overrun,
            Self::Parity => ErrorKind::Parity,
            Self::Framing => ErrorKind::FrameFormat,
            _ => ErrorKind::Other,
        }
    }
}

/// `BAUD` register value for `baudrate` from a `clock_hz` module clock.
///
/// Mode 2 is preferred. Mode 0 divides by another 16 and is only used when the
/// mode 2 divider does not fit.
pub fn baud_register(clock_hz: u32, baudrate: u32) -> Result<u32, Error> {
    if baudrate == 0 {
        return Err(Error::InvalidArgument);
    }
    let (clk, baud) = (u64::from(clock_hz), u64::from(baudrate));
    let brd_max = u64::from(BAUD_BRD_MASK);

    let mode2 = ((clk + baud / 2) / baud).checked_sub(2).ok_or(Error::InvalidArgument)?;
    if mode2 <= brd_max {
        return Ok(BAUD_MODE2 | mode2 as u32);
    }

    let mode0 = (((clk + baud * 8) / baud) >> 4)
        .checked_sub(2)
        .filter(|divider| *divider <= brd_max)
        .ok_or(Error::InvalidArgument)?;
    Ok(BAUD_MODE0 | mode0 as u32)
}

/// What an interrupt callback sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqEvent {
    /// UART index, 0 for UART0.
    pub instance: usize,
    /// `INTSTS` as read on entry.
    pub status: u32,
}

/// Interrupt callback. Runs in interrupt context.
pub type IrqHandler = &'static (dyn Fn(IrqEvent) + Sync);

static IRQ_HANDLERS: [Mutex<CriticalSectionRawMutex, Cell<Option<IrqHandler>>>; INSTANCES] =
    [const { Mutex::new(Cell::new(None)) }; INSTANCES];

/// Runs the callback installed for UART `instance`, if there is one.
///
/// Call from the instance's interrupt handler. Status bits are left alone:
/// the callback drains or fills the FIFOs, which clears them.
pub fn on_interrupt(instance: usize) {
    let Some((slot, base)) = IRQ_HANDLERS.get(instance).zip(BASES.get(instance)) else {
        return;
    };
    let status = RegisterBlock::new(*base).intsts().read();
    if let Some(handler) = slot.lock(Cell::get) {
        handler(IrqEvent { instance, status });
    }
}

trait SealedInstance {
    const INDEX: usize;
    const RESET: ResetLine;
    const INTERRUPT: pac::Interrupt;
    /// Pins routed when the caller brings no table.
    const DEFAULT_PINS: &'static [PinMux];
}

/// A UART peripheral.
#[allow(private_bounds)]
pub trait Instance: SealedInstance + ClockedPeripheral + PeripheralType {}

macro_rules! impl_instance {
    ($index:literal, $pins:expr) => {
        paste! {
            impl SealedInstance for crate::peripherals::[<UART $index>] {
                const INDEX: usize = $index;
                const RESET: ResetLine = ResetLine::[<UART $index>];
                const INTERRUPT: pac::Interrupt = pac::Interrupt::[<UART $index>];
                const DEFAULT_PINS: &'static [PinMux] = $pins;
            }

            impl Instance for crate::peripherals::[<UART $index>] {}
        }
    };
}

// PB12 RXD, PB13 TXD
impl_instance!(0, &[PinMux::new(1, 12, 6), PinMux::new(1, 13, 6)]);
impl_instance!(1, &[]);
impl_instance!(2, &[]);
impl_instance!(3, &[]);

/// A configured UART.
pub struct Uart<'d> {
    index: usize,
    interrupt: pac::Interrupt,
    regs: RegisterBlock,
    clock_hz: u32,
    config: Config,
    _lifetime: PhantomData<&'d mut ()>,
}

impl<'d> Uart<'d> {
    /// Brings up UART `T`.
    ///
    /// `pins` overrides the instance's default pin routing. `clock` is written
    /// to the module's clock select and divider fields as is; see
    /// [`clocks::ModuleClock::config`]. System clocks must already be set up.
    pub fn new<T: Instance>(
        _peri: Peri<'d, T>,
        pins: Option<&[PinMux]>,
        clock: ModuleClockConfig,
        config: Config,
    ) -> Result<Self, Error> {
        // Line settings are checked up front so a bad config touches nothing.
        config.line()?;
        if config.flow_control == FlowControl::DtrDsr {
            return Err(Error::NotSupported);
        }

        sys::with_unlocked(|unlocked| -> Result<(), Error> {
            clocks::enable_peripheral::<T>(unlocked, Some(&clock))?;
            pinctrl::apply(pins.unwrap_or(T::DEFAULT_PINS))?;
            Ok(())
        })?;
        sys::reset_module(T::RESET)?;

        let clock_hz = clocks::with_clocks(|c| clocks::module_clock_rate(c, T::MODULE))
            .ok_or(ClockError::NotInitialized)??;

        let mut uart = Self {
            index: T::INDEX,
            interrupt: T::INTERRUPT,
            regs: RegisterBlock::new(BASES[T::INDEX]),
            clock_hz,
            config,
            _lifetime: PhantomData,
        };
        uart.open(config.baudrate)?;
        uart.configure(&config)?;

        info!("UART{} at {} baud from a {} Hz clock", T::INDEX, config.baudrate, clock_hz);
        Ok(uart)
    }

    /// Resets the line to 8N1 at `baudrate` with the FIFO trigger levels at
    /// their minimum.
    fn open(&mut self, baudrate: u32) -> Result<(), Error> {
        let baud = baud_register(self.clock_hz, baudrate)?;
        self.regs.funcsel().write(FUNCSEL_UART);
        self.regs.line().write(LINE_WLS_8);
        self.regs.fifo().clear_bits(FIFO_RFITL_MASK | FIFO_RTSTRGLV_MASK);
        self.regs.baud().write(baud);
        Ok(())
    }

    /// Applies new line settings.
    ///
    /// On error nothing is written and [`Uart::config_get`] keeps returning
    /// the previous settings.
    pub fn configure(&mut self, config: &Config) -> Result<(), Error> {
        let line = config.line()?;
        let baud = baud_register(self.clock_hz, config.baudrate)?;

        match config.flow_control {
            FlowControl::None => self.disable_flow_control(),
            FlowControl::RtsCts => self.enable_flow_control(),
            FlowControl::DtrDsr => return Err(Error::NotSupported),
        }
        self.regs.baud().write(baud);
        self.regs.line().write(line);

        self.config = *config;
        debug!("UART{} line {:#x} baud {:#x}", self.index, line, baud);
        Ok(())
    }

    /// The settings last applied successfully.
    pub fn config_get(&self) -> Config {
        self.config
    }

    fn enable_flow_control(&self) {
        // RTS and CTS both active low
        self.regs.modem().set_bits(MODEM_RTSACTLV);
        self.regs.modemsts().set_bits(MODEMSTS_CTSACTLV);
        self.regs.inten().set_bits(INTEN_ATORTSEN | INTEN_ATOCTSEN);
    }

    fn disable_flow_control(&self) {
        self.regs.inten().clear_bits(INTEN_ATORTSEN | INTEN_ATOCTSEN);
    }

    fn rx_empty(&self) -> bool {
        self.regs.fifosts().read() & FIFOSTS_RXEMPTY != 0
    }

    fn tx_full(&self) -> bool {
        self.regs.fifosts().read() & FIFOSTS_TXFULL != 0
    }

    /// Takes one received byte without waiting.
    pub fn poll_in(&mut self) -> nb::Result<u8, Error> {
        if self.rx_empty() {
            return Err(nb::Error::WouldBlock);
        }
        Ok(self.regs.dat().read() as u8)
    }

    /// Sends one byte, waiting for room in the transmit FIFO.
    pub fn poll_out(&mut self, byte: u8) {
        while self.tx_full() {
            core::hint::spin_loop();
        }
        self.regs.dat().write(u32::from(byte));
    }

    /// Returns the receive errors latched since the last call and clears them.
    pub fn err_check(&mut self) -> LineErrors {
        let fifosts = self.regs.fifosts();
        let flags = fifosts.read() & ERROR_FLAGS;
        if flags != 0 {
            fifosts.write(flags);
            warn!("UART{} line errors {:#x}", self.index, flags);
        }
        LineErrors::from_fifosts(flags)
    }

    /// Queues as much of `data` as fits in the transmit FIFO. Returns how many
    /// bytes were taken.
    pub fn fifo_fill(&mut self, data: &[u8]) -> usize {
        let mut sent = 0;
        for byte in data {
            if self.tx_full() {
                break;
            }
            self.regs.dat().write(u32::from(*byte));
            sent += 1;
        }
        sent
    }

    /// Drains the receive FIFO into `buf`. Returns how many bytes were read.
    pub fn fifo_read(&mut self, buf: &mut [u8]) -> usize {
        let mut read = 0;
        for slot in buf.iter_mut() {
            if self.rx_empty() {
                break;
            }
            *slot = self.regs.dat().read() as u8;
            read += 1;
        }
        read
    }

    pub fn irq_tx_enable(&mut self) {
        self.regs.inten().set_bits(INTEN_THREIEN);
    }

    pub fn irq_tx_disable(&mut self) {
        self.regs.inten().clear_bits(INTEN_THREIEN);
    }

    /// The transmit interrupt is enabled and the FIFO has room.
    pub fn irq_tx_ready(&self) -> bool {
        self.regs.inten().read() & INTEN_THREIEN != 0 && !self.tx_full()
    }

    /// Everything queued has left the shift register.
    pub fn irq_tx_complete(&self) -> bool {
        self.regs.fifosts().read() & FIFOSTS_TXEMPTYF != 0
    }

    pub fn irq_rx_enable(&mut self) {
        self.regs.inten().set_bits(INTEN_RDAIEN);
    }

    pub fn irq_rx_disable(&mut self) {
        self.regs.inten().clear_bits(INTEN_RDAIEN);
    }

    /// At least one byte is waiting.
    pub fn irq_rx_ready(&self) -> bool {
        !self.rx_empty()
    }

    pub fn irq_err_enable(&mut self) {
        self.regs.inten().set_bits(INTEN_RLSIEN);
    }

    pub fn irq_err_disable(&mut self) {
        self.regs.inten().clear_bits(INTEN_RLSIEN);
    }

    /// Any enabled UART interrupt is asserted.
    pub fn irq_is_pending(&self) -> bool {
        self.regs.intsts().read() & (INTSTS_RDAINT | INTSTS_THREINT | INTSTS_RLSINT) != 0
    }

    /// Status is read live, there is nothing to latch.
    pub fn irq_update(&mut self) -> bool {
        true
    }

    /// Installs or clears the callback run by [`on_interrupt`].
    pub fn irq_callback_set(&mut self, handler: Option<IrqHandler>) {
        IRQ_HANDLERS[self.index].lock(|slot| slot.set(handler));
    }

    /// Enables the instance's NVIC line.
    pub fn enable_interrupt(&mut self, priority: Priority) {
        self.interrupt.unpend();
        self.interrupt.set_priority(priority);
        // SAFETY: the callback lives in a static, the handler needs nothing
        // from this driver
        unsafe { self.interrupt.enable() };
    }

    /// Waits until the transmitter is idle.
    pub fn blocking_flush(&mut self) {
        while !self.irq_tx_complete() {
            core::hint::spin_loop();
        }
    }

    /// Reads one byte, reporting any latched line error first.
    fn read_checked(&mut self) -> nb::Result<u8, Error> {
        if let Some(error) = self.err_check().first() {
            return Err(nb::Error::Other(error));
        }
        self.poll_in()
    }
}

impl embedded_io::ErrorType for Uart<'_> {
    type Error = Error;
}

impl embedded_io::Read for Uart<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some((first, rest)) = buf.split_first_mut() else {
            return Ok(0);
        };
        *first = nb::block!(self.read_checked())?;
        Ok(1 + self.fifo_read(rest))
    }
}

impl embedded_io::ReadReady for Uart<'_> {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx_empty())
    }
}

impl embedded_io::Write for Uart<'_> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let Some((first, rest)) = buf.split_first() else {
            return Ok(0);
        };
        self.poll_out(*first);
        Ok(1 + self.fifo_fill(rest))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.blocking_flush();
        Ok(())
    }
}

impl embedded_io::WriteReady for Uart<'_> {
    fn write_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.tx_full())
    }
}

impl embedded_hal_nb::serial::ErrorType for Uart<'_> {
    type Error = Error;
}

impl embedded_hal_nb::serial::Read<u8> for Uart<'_> {
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.read_checked()
    }
}

impl embedded_hal_nb::serial::Write<u8> for Uart<'_> {
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        if self.tx_full() {
            return Err(nb::Error::WouldBlock);
        }
        self.regs.dat().write(u32::from(word));
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        if self.irq_tx_complete() {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl embedded_hal_02::serial::Read<u8> for Uart<'_> {
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.read_checked()
    }
}

impl embedded_hal_02::serial::Write<u8> for Uart<'_> {
    type Error = Error;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        embedded_hal_nb::serial::Write::write(self, word)
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        embedded_hal_nb::serial::Write::flush(self)
    }
}

impl core::fmt::Write for Uart<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.poll_out(byte);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec;

    use super::*;
    use crate::clocks::{uart_source, ModuleClock};
    use crate::pac::sim::{self, Access};
    use crate::peripherals;

    const UART0: usize = UART0_BASE;
    const CLK: usize = pac::clk::BASE;
    const REGLCTL: usize = pac::sys::BASE + pac::sys::REGLCTL;

    fn hirc_clock() -> ModuleClockConfig {
        ModuleClock::UART0.config(uart_source::HIRC, 0)
    }

    fn uart0(config: Config) -> Result<Uart<'static>, Error> {
        clocks::init_for_test();
        Uart::new(unsafe { peripherals::UART0::steal() }, None, hirc_clock(), config)
    }

    #[test]
    fn baud_divider_prefers_mode2() {
        assert_eq!(baud_register(12_000_000, 115_200), Ok(0x3000_0066));
        assert_eq!(baud_register(96_000_000, 9_600), Ok(0x3000_270e));
    }

    #[test]
    fn baud_divider_falls_back_to_mode0() {
        assert_eq!(baud_register(96_000_000, 1_200), Ok(4998));
    }

    #[test]
    fn impossible_baud_rates_are_rejected() {
        assert_eq!(baud_register(12_000_000, 0), Err(Error::InvalidArgument));
        assert_eq!(baud_register(12_000_000, 12_000_000), Err(Error::InvalidArgument));
        assert_eq!(baud_register(200_000_000, 1), Err(Error::InvalidArgument));
    }

    #[test]
    fn init_follows_the_bring_up_order() {
        sim::reset();
        let uart = uart0(Config::default()).unwrap();
        assert_eq!(uart.config_get(), Config::default());

        let apbclk0 = sim::first_write(CLK + pac::clk::APBCLK0).unwrap();
        let clksel1 = sim::first_write(CLK + pac::clk::CLKSEL1).unwrap();
        let mfp = sim::first_write(pac::sys::mfp(1, 12).addr()).unwrap();
        let log = sim::log();
        let relock = log
            .iter()
            .position(|access| *access == Access::Write(REGLCTL, 0))
            .unwrap();
        let reset = sim::first_write(pac::sys::iprst(4).addr()).unwrap();
        let baud = sim::first_write(UART0 + BAUD).unwrap();

        assert!(apbclk0 < clksel1);
        assert!(clksel1 < mfp);
        assert!(mfp < relock);
        assert!(relock < reset);
        assert!(reset < baud);

        assert_eq!(sim::peek(CLK + pac::clk::APBCLK0) & (1 << 16), 1 << 16);
        assert_eq!(sim::peek(pac::sys::mfp(1, 12).addr()), 0x0000_0606);
        assert_eq!(sim::writes_to(pac::sys::iprst(4).addr()), [1 << 16, 0]);
        assert!(!sys::is_unlocked());
    }

    #[test]
    fn default_config_is_115200_8n1() {
        sim::reset();
        uart0(Config::default()).unwrap();
        assert_eq!(sim::peek(UART0 + BAUD), 0x3000_0066);
        assert_eq!(sim::peek(UART0 + LINE), LINE_WLS_8);
        assert_eq!(sim::peek(UART0 + FUNCSEL), FUNCSEL_UART);
        assert_eq!(sim::peek(UART0 + INTEN) & (INTEN_ATORTSEN | INTEN_ATOCTSEN), 0);
    }

    #[test]
    fn caller_pins_replace_the_defaults() {
        sim::reset();
        clocks::init_for_test();
        let pins = [PinMux::new(0, 0, 7), PinMux::new(0, 1, 7)];
        Uart::new(unsafe { peripherals::UART0::steal() }, Some(&pins), hirc_clock(), Config::default()).unwrap();
        assert_eq!(sim::peek(pac::sys::mfp(0, 0).addr()), 0x0000_0707);
        assert!(sim::writes_to(pac::sys::mfp(1, 12).addr()).is_empty());
    }

    #[test]
    fn bad_pin_table_fails_init_and_relocks() {
        sim::reset();
        clocks::init_for_test();
        let pins = [PinMux::new(9, 0, 1)];
        let result = Uart::new(unsafe { peripherals::UART0::steal() }, Some(&pins), hirc_clock(), Config::default());
        assert_eq!(result.err(), Some(Error::Pinctrl(pinctrl::Error::InvalidArgument)));
        assert!(!sys::is_unlocked());
        assert!(sim::writes_to(UART0 + BAUD).is_empty());
    }

    #[test]
    fn every_supported_setting_reads_back() {
        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        let data = [DataBits::Five, DataBits::Six, DataBits::Seven, DataBits::Eight];
        let stop = [StopBits::One, StopBits::OneAndHalf, StopBits::Two];
        let parity = [Parity::None, Parity::Odd, Parity::Even, Parity::Mark, Parity::Space];
        let flow = [FlowControl::None, FlowControl::RtsCts];

        for data_bits in data {
            for stop_bits in stop {
                for parity in parity {
                    for flow_control in flow {
                        let config = Config {
                            baudrate: 57_600,
                            data_bits,
                            parity,
                            stop_bits,
                            flow_control,
                        };
                        uart.configure(&config).unwrap();
                        assert_eq!(uart.config_get(), config);
                    }
                }
            }
        }
    }

    #[test]
    fn line_register_encoding() {
        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        let config = Config {
            data_bits: DataBits::Seven,
            parity: Parity::Even,
            stop_bits: StopBits::Two,
            ..Config::default()
        };
        uart.configure(&config).unwrap();
        assert_eq!(sim::peek(UART0 + LINE), 0x1e);
    }

    #[test]
    fn unsupported_settings_keep_the_cached_config() {
        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        let good = uart.config_get();
        sim::clear_log();

        let bad = [
            Config { stop_bits: StopBits::Half, ..good },
            Config { data_bits: DataBits::Nine, ..good },
            Config { flow_control: FlowControl::DtrDsr, ..good },
        ];
        for config in bad {
            assert_eq!(uart.configure(&config), Err(Error::NotSupported));
            assert_eq!(uart.config_get(), good);
        }
        assert_eq!(uart.configure(&Config { baudrate: 0, ..good }), Err(Error::InvalidArgument));
        assert_eq!(uart.config_get(), good);
        assert!(sim::log().iter().all(|access| matches!(access, Access::Read(..))));
    }

    #[test]
    fn unsupported_config_fails_init_before_touching_hardware() {
        sim::reset();
        let result = uart0(Config { data_bits: DataBits::Nine, ..Config::default() });
        assert_eq!(result.err(), Some(Error::NotSupported));
        assert!(sim::log().is_empty());
    }

    #[test]
    fn flow_control_switches_on_and_off() {
        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        uart.configure(&Config { flow_control: FlowControl::RtsCts, ..Config::default() }).unwrap();
        assert_eq!(sim::peek(UART0 + MODEM) & MODEM_RTSACTLV, MODEM_RTSACTLV);
        assert_eq!(sim::peek(UART0 + MODEMSTS) & MODEMSTS_CTSACTLV, MODEMSTS_CTSACTLV);
        let both = INTEN_ATORTSEN | INTEN_ATOCTSEN;
        assert_eq!(sim::peek(UART0 + INTEN) & both, both);

        uart.configure(&Config::default()).unwrap();
        assert_eq!(sim::peek(UART0 + INTEN) & both, 0);
    }

    #[test]
    fn polled_io() {
        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        assert_eq!(uart.poll_in(), Err(nb::Error::WouldBlock));

        sim::push_rx(UART0, b"ok");
        assert_eq!(uart.poll_in(), Ok(b'o'));
        assert_eq!(uart.poll_in(), Ok(b'k'));
        assert_eq!(uart.poll_in(), Err(nb::Error::WouldBlock));

        uart.poll_out(b'h');
        uart.poll_out(b'i');
        assert_eq!(sim::take_tx(UART0), b"hi");
    }

    #[test]
    fn err_check_reports_and_clears() {
        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        assert_eq!(uart.err_check(), LineErrors::empty());

        sim::raise(UART0 + FIFOSTS, FIFOSTS_RXOVIF | FIFOSTS_FEF);
        let errors = uart.err_check();
        assert_eq!(errors, LineErrors::OVERRUN | LineErrors::FRAMING);
        assert_eq!(errors.first(), Some(Error::Overrun));
        assert_eq!(uart.err_check(), LineErrors::empty());
    }

    #[test]
    fn nb_read_reports_latched_errors() {
        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        sim::push_rx(UART0, b"x");
        sim::raise(UART0 + FIFOSTS, FIFOSTS_PEF);
        assert_eq!(embedded_hal_nb::serial::Read::read(&mut uart), Err(nb::Error::Other(Error::Parity)));
        assert_eq!(embedded_hal_nb::serial::Read::read(&mut uart), Ok(b'x'));
    }

    #[test]
    fn fifo_helpers_move_what_is_there() {
        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        assert_eq!(uart.fifo_fill(b"abc"), 3);
        assert_eq!(sim::take_tx(UART0), b"abc");

        sim::push_rx(UART0, b"xy");
        let mut buf = [0u8; 4];
        assert_eq!(uart.fifo_read(&mut buf), 2);
        assert_eq!(&buf[..2], b"xy");
        assert_eq!(uart.fifo_read(&mut buf), 0);
    }

    #[test]
    fn embedded_io_traits() {
        use embedded_io::{Read, Write};

        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        uart.write_all(b"ping").unwrap();
        uart.flush().unwrap();
        assert_eq!(sim::take_tx(UART0), b"ping");

        sim::push_rx(UART0, b"pong");
        let mut buf = [0u8; 8];
        assert_eq!(uart.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"pong");
        assert_eq!(uart.read(&mut []).unwrap(), 0);
    }

    #[test]
    fn fmt_write_goes_out_the_wire() {
        use core::fmt::Write;

        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();
        write!(uart, "n={}", 42).unwrap();
        assert_eq!(sim::take_tx(UART0), b"n=42");
    }

    #[test]
    fn interrupt_enables_and_status() {
        sim::reset();
        let mut uart = uart0(Config::default()).unwrap();

        uart.irq_tx_enable();
        uart.irq_rx_enable();
        uart.irq_err_enable();
        let enabled = INTEN_THREIEN | INTEN_RDAIEN | INTEN_RLSIEN;
        assert_eq!(sim::peek(UART0 + INTEN) & enabled, enabled);
        assert!(uart.irq_tx_ready());
        assert!(uart.irq_tx_complete());
        assert!(!uart.irq_rx_ready());
        assert!(uart.irq_update());

        sim::push_rx(UART0, b"z");
        assert!(uart.irq_rx_ready());

        assert!(!uart.irq_is_pending());
        sim::poke(UART0 + INTSTS, INTSTS_RDAINT);
        assert!(uart.irq_is_pending());

        uart.irq_tx_disable();
        uart.irq_rx_disable();
        uart.irq_err_disable();
        assert_eq!(sim::peek(UART0 + INTEN) & enabled, 0);
        assert!(!uart.irq_tx_ready());
    }

    static IRQ_LOG: StdMutex<Vec<IrqEvent>> = StdMutex::new(Vec::new());

    fn record(event: IrqEvent) {
        IRQ_LOG.lock().unwrap().push(event);
    }

    #[test]
    fn callback_runs_from_on_interrupt() {
        sim::reset();
        clocks::init_for_test();
        let clock = ModuleClock::UART3.config(uart_source::HIRC, 0);
        let mut uart = Uart::new(unsafe { peripherals::UART3::steal() }, None, clock, Config::default()).unwrap();

        uart.irq_callback_set(Some(&record));
        sim::poke(UART3_BASE + INTSTS, INTSTS_THREINT);
        on_interrupt(3);
        on_interrupt(INSTANCES);

        uart.irq_callback_set(None);
        on_interrupt(3);

        assert_eq!(
            *IRQ_LOG.lock().unwrap(),
            [IrqEvent { instance: 3, status: INTSTS_THREINT }]
        );
    }
}
