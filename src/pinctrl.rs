//! Pin multiplexing.
//!
//! Every pin has a 5-bit function field in its bank's `GPx_MFPy` register.
//! Function 0 routes the pin to the GPIO controller.

use crate::pac;

/// Number of GPIO banks with multi-function registers.
pub const BANKS: u8 = 8;
/// Pins per bank covered by the multi-function registers.
pub const PINS_PER_BANK: u8 = 16;
/// Highest function index plus one.
pub const FUNCTIONS: u8 = 32;

/// The GPIO function, on every pin.
pub const FUNCTION_GPIO: u8 = 0;

/// Routes one pin to one function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinMux {
    /// Bank index, 0 for port A.
    pub bank: u8,
    pub pin: u8,
    pub function: u8,
}

impl PinMux {
    pub const fn new(bank: u8, pin: u8, function: u8) -> Self {
        Self { bank, pin, function }
    }

    fn check(&self) -> Result<(), Error> {
        if self.bank >= BANKS || self.pin >= PINS_PER_BANK || self.function >= FUNCTIONS {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn write(&self) {
        let (bank, pin) = (usize::from(self.bank), usize::from(self.pin));
        pac::sys::mfp(bank, pin).write_field(
            pac::sys::mfp_pos(pin),
            pac::sys::MFP_FIELD_MASK,
            u32::from(self.function),
        );
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Bank, pin or function out of range.
    InvalidArgument,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("pin mux entry out of range"),
        }
    }
}

impl core::error::Error for Error {}

/// Applies a pin mux table.
///
/// The whole table is checked before anything is written, so a bad entry
/// leaves every pin as it was.
pub fn apply(table: &[PinMux]) -> Result<(), Error> {
    table.iter().try_for_each(PinMux::check)?;
    for entry in table {
        entry.write();
        trace!("P{}.{} -> function {}", entry.bank, entry.pin, entry.function);
    }
    Ok(())
}
