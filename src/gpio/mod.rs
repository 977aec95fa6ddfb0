//! GPIO ports.
//!
//! A [`Port`] owns one bank of up to 16 pins. Pin configuration and the raw
//! port operations act on the bank's registers directly; interrupt callbacks
//! are kept in a per-bank registry and run from [`on_interrupt`].

use core::convert::Infallible;
use core::marker::PhantomData;

use embassy_hal_internal::interrupt::{InterruptExt, Priority};
use embassy_hal_internal::{Peri, PeripheralType};
use paste::paste;

use crate::clocks::{self, ClockError, ClockedPeripheral};
use crate::pac;
use crate::pinctrl;
use crate::sys;

mod callback;

pub use callback::{CallbackId, Event, Handler, MAX_CALLBACKS_PER_BANK};

/// Pins `0..MAX_PIN` can be configured through [`Port::configure`].
pub const MAX_PIN: u8 = 15;

/// One GPIO bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bank {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl Bank {
    pub const COUNT: usize = 8;

    pub const fn index(self) -> usize {
        self as usize
    }

    pub(crate) const fn regs(self) -> pac::gpio::RegisterBlock {
        pac::gpio::RegisterBlock::new(self.index())
    }

    pub const fn interrupt(self) -> pac::Interrupt {
        match self {
            Self::A => pac::Interrupt::GPA,
            Self::B => pac::Interrupt::GPB,
            Self::C => pac::Interrupt::GPC,
            Self::D => pac::Interrupt::GPD,
            Self::E => pac::Interrupt::GPE,
            Self::F => pac::Interrupt::GPF,
            Self::G => pac::Interrupt::GPG,
            Self::H => pac::Interrupt::GPH,
        }
    }
}

bitflags::bitflags! {
    /// Pin configuration flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Flags: u32 {
        const INPUT = 1 << 0;
        const OUTPUT = 1 << 1;
        /// Overrides the push-pull or quasi mode picked by the direction.
        const OPEN_DRAIN = 1 << 2;
        const PULL_UP = 1 << 3;
        /// Ignored when `PULL_UP` is also set.
        const PULL_DOWN = 1 << 4;

        const DIRECTION_MASK = Self::INPUT.bits() | Self::OUTPUT.bits();
    }
}

/// When a pin interrupt is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterruptMode {
    Disabled,
    Level,
    Edge,
}

/// Which level, or which edge, a pin interrupt reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    /// Low level, or falling edge
    Low,
    /// High level, or rising edge
    High,
    /// Both edges. Edge mode only.
    Both,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Pin index out of range.
    InvalidArgument,
    /// The flag or trigger combination has no hardware encoding.
    NotSupported,
    /// All callback slots of the bank are taken.
    RegistryFull,
    /// No callback with this id is registered on the bank.
    UnknownCallback,
    /// The bank clock could not be enabled.
    Clock(ClockError),
}

impl From<ClockError> for Error {
    fn from(err: ClockError) -> Self {
        Self::Clock(err)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid pin"),
            Self::NotSupported => f.write_str("pin configuration not supported"),
            Self::RegistryFull => f.write_str("no free callback slot"),
            Self::UnknownCallback => f.write_str("callback not registered"),
            Self::Clock(err) => write!(f, "gpio clock: {err}"),
        }
    }
}

impl core::error::Error for Error {}

impl embedded_hal_1::digital::Error for Error {
    fn kind(&self) -> embedded_hal_1::digital::ErrorKind {
        embedded_hal_1::digital::ErrorKind::Other
    }
}

/// Port configuration.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Priority of the bank interrupt. `None` leaves the interrupt line
    /// disabled in the NVIC.
    pub interrupt_priority: Option<Priority>,
}

trait SealedInstance {
    const BANK: Bank;
}

/// A GPIO bank peripheral.
#[allow(private_bounds)]
pub trait Instance: SealedInstance + ClockedPeripheral + PeripheralType {}

macro_rules! impl_instance {
    ($($bank:ident),*) => {
        $(
            paste! {
                impl SealedInstance for crate::peripherals::[<GPIO $bank>] {
                    const BANK: Bank = Bank::$bank;
                }

                impl Instance for crate::peripherals::[<GPIO $bank>] {}
            }
        )*
    };
}

impl_instance!(A, B, C, D, E, F, G, H);

/// Handle to one GPIO bank.
pub struct Port<'d> {
    bank: Bank,
    regs: pac::gpio::RegisterBlock,
    _lifetime: PhantomData<&'d mut ()>,
}

impl<'d> Port<'d> {
    /// Enables the bank clock and, if configured, the bank interrupt.
    pub fn new<T: Instance>(_peri: Peri<'d, T>, config: Config) -> Result<Self, Error> {
        sys::with_unlocked(|unlocked| clocks::enable_peripheral::<T>(unlocked, None))?;

        if let Some(priority) = config.interrupt_priority {
            let irq = T::BANK.interrupt();
            irq.unpend();
            irq.set_priority(priority);
            // SAFETY: the bank's callbacks live in statics, the handler needs
            // nothing from this port
            unsafe { irq.enable() };
        }

        debug!("GPIO{:?} ready", T::BANK);
        Ok(Self::for_bank(T::BANK))
    }

    fn for_bank(bank: Bank) -> Self {
        Self {
            bank,
            regs: bank.regs(),
            _lifetime: PhantomData,
        }
    }

    pub fn bank(&self) -> Bank {
        self.bank
    }

    /// Sets direction, drive and pull of one pin and routes it to GPIO.
    pub fn configure(&self, pin: u8, flags: Flags) -> Result<(), Error> {
        if pin >= MAX_PIN {
            return Err(Error::InvalidArgument);
        }

        let direction = flags & Flags::DIRECTION_MASK;
        let mode = if direction == Flags::INPUT {
            pac::gpio::MODE_INPUT
        } else if direction == Flags::OUTPUT {
            pac::gpio::MODE_OUTPUT
        } else if direction == Flags::DIRECTION_MASK {
            pac::gpio::MODE_QUASI
        } else {
            return Err(Error::NotSupported);
        };
        let pos = u32::from(pin) * 2;
        self.regs.mode().write_field(pos, 0x3, mode);
        if flags.contains(Flags::OPEN_DRAIN) {
            self.regs.mode().write_field(pos, 0x3, pac::gpio::MODE_OPEN_DRAIN);
        }

        let pin_index = usize::from(pin);
        pac::sys::mfp(self.bank.index(), pin_index).write_field(
            pac::sys::mfp_pos(pin_index),
            pac::sys::MFP_FIELD_MASK,
            u32::from(pinctrl::FUNCTION_GPIO),
        );

        let pull = if flags.contains(Flags::PULL_UP) {
            pac::gpio::PUSEL_PULL_UP
        } else if flags.contains(Flags::PULL_DOWN) {
            pac::gpio::PUSEL_PULL_DOWN
        } else {
            pac::gpio::PUSEL_DISABLE
        };
        self.regs.pusel().write_field(pos, 0x3, pull);

        Ok(())
    }

    /// Input levels of the whole bank.
    pub fn port_get_raw(&self) -> u32 {
        self.regs.pin().read()
    }

    /// Drives the pins in `mask` to the matching bits of `value`.
    pub fn port_set_masked_raw(&self, mask: u32, value: u32) {
        self.regs.dout().modify(|dout| (dout & !mask) | (mask & value));
    }

    pub fn port_set_bits_raw(&self, mask: u32) {
        self.regs.dout().set_bits(mask);
    }

    pub fn port_clear_bits_raw(&self, mask: u32) {
        self.regs.dout().clear_bits(mask);
    }

    pub fn port_toggle_bits(&self, mask: u32) {
        self.regs.dout().modify(|dout| dout ^ mask);
    }

    /// ```text
    ///                 INTTYPE[n]   INTEN[n]   INTEN[n + 16]
    /// falling edge        0           1            0
    /// rising edge         0           0            1
    /// both edges          0           1            1
    /// low level           1           1            0
    /// high level          1           0            1
    /// ```
    pub fn pin_interrupt_configure(&self, pin: u8, mode: InterruptMode, trigger: Trigger) -> Result<(), Error> {
        if pin >= 16 {
            return Err(Error::InvalidArgument);
        }
        let low = 1u32 << pin;
        let high = 1u32 << (u32::from(pin) + pac::gpio::INTEN_RISING_SHIFT);

        let level = match mode {
            InterruptMode::Disabled => {
                self.regs.inttype().clear_bits(low);
                self.regs.inten().clear_bits(low | high);
                return Ok(());
            }
            InterruptMode::Level => true,
            InterruptMode::Edge => false,
        };
        let enable = match trigger {
            Trigger::Low => low,
            Trigger::High => high,
            Trigger::Both if !level => low | high,
            Trigger::Both => return Err(Error::NotSupported),
        };

        self.regs
            .inttype()
            .modify(|inttype| (inttype & !low) | if level { low } else { 0 });
        self.regs.inten().modify(|inten| (inten & !(low | high)) | enable);
        Ok(())
    }

    /// Registers `handler` for the pins in `pin_mask`.
    pub fn add_callback(&self, pin_mask: u32, handler: Handler) -> Result<CallbackId, Error> {
        callback::add(self.bank, pin_mask, handler)
    }

    pub fn remove_callback(&self, id: CallbackId) -> Result<(), Error> {
        callback::remove(self.bank, id)
    }

    /// A single pin of this port, for use with `embedded-hal` drivers.
    pub fn pin(&self, pin: u8) -> Result<PortPin<'_>, Error> {
        if pin >= 16 {
            return Err(Error::InvalidArgument);
        }
        Ok(PortPin {
            regs: self.regs,
            mask: 1u32 << pin,
            _port: PhantomData,
        })
    }
}

/// Interrupt entry for `bank`. Call it from the bank's vector.
pub fn on_interrupt(bank: Bank) {
    callback::dispatch(bank);
}

/// One pin of a [`Port`].
///
/// Uses the same read-modify-write sequences as the raw port operations.
pub struct PortPin<'a> {
    regs: pac::gpio::RegisterBlock,
    mask: u32,
    _port: PhantomData<&'a Port<'a>>,
}

impl PortPin<'_> {
    pub fn is_high(&self) -> bool {
        self.regs.pin().read() & self.mask != 0
    }

    pub fn is_low(&self) -> bool {
        !self.is_high()
    }

    pub fn set_high(&mut self) {
        self.regs.dout().set_bits(self.mask);
    }

    pub fn set_low(&mut self) {
        self.regs.dout().clear_bits(self.mask);
    }

    pub fn is_set_high(&self) -> bool {
        self.regs.dout().read() & self.mask != 0
    }

    pub fn toggle(&mut self) {
        let mask = self.mask;
        self.regs.dout().modify(|dout| dout ^ mask);
    }
}

impl embedded_hal_1::digital::ErrorType for PortPin<'_> {
    type Error = Infallible;
}

impl embedded_hal_1::digital::InputPin for PortPin<'_> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(PortPin::is_high(self))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(PortPin::is_low(self))
    }
}

impl embedded_hal_1::digital::OutputPin for PortPin<'_> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        PortPin::set_low(self);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        PortPin::set_high(self);
        Ok(())
    }
}

impl embedded_hal_1::digital::StatefulOutputPin for PortPin<'_> {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(PortPin::is_set_high(self))
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!PortPin::is_set_high(self))
    }

    fn toggle(&mut self) -> Result<(), Self::Error> {
        PortPin::toggle(self);
        Ok(())
    }
}

impl embedded_hal_02::digital::v2::InputPin for PortPin<'_> {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(PortPin::is_high(self))
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(PortPin::is_low(self))
    }
}

impl embedded_hal_02::digital::v2::OutputPin for PortPin<'_> {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        PortPin::set_low(self);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        PortPin::set_high(self);
        Ok(())
    }
}

impl embedded_hal_02::digital::v2::StatefulOutputPin for PortPin<'_> {
    fn is_set_high(&self) -> Result<bool, Self::Error> {
        Ok(PortPin::is_set_high(self))
    }

    fn is_set_low(&self) -> Result<bool, Self::Error> {
        Ok(!PortPin::is_set_high(self))
    }
}

impl embedded_hal_02::digital::v2::ToggleableOutputPin for PortPin<'_> {
    type Error = Infallible;

    fn toggle(&mut self) -> Result<(), Self::Error> {
        PortPin::toggle(self);
        Ok(())
    }
}
