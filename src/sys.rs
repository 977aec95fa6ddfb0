//! Register write protection and peripheral resets.
//!
//! The M46x guards its clock, reset and power registers behind a hardware
//! latch (`REGLCTL`). Writes to those registers only take effect between an
//! unlock sequence and the next lock. The latch is global, so the unlock
//! window is modelled as a process-wide resource: [`with_unlocked`] holds a
//! critical section for the whole window and keeps a nesting depth, so an
//! inner scope never relocks a window an outer scope still relies on.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

use crate::pac;

static UNLOCK_DEPTH: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

/// Proof that the protected registers are writable.
///
/// Only obtainable inside [`with_unlocked`].
pub struct Unlocked<'cs> {
    _cs: CriticalSection<'cs>,
}

struct Relock<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for Relock<'_> {
    fn drop(&mut self) {
        let depth = self.depth.get() - 1;
        self.depth.set(depth);
        if depth == 0 {
            lock();
        }
    }
}

/// Runs `f` with the protected registers unlocked.
///
/// The registers are locked again when the outermost `with_unlocked` scope
/// ends, whatever `f` returns.
pub fn with_unlocked<R>(f: impl FnOnce(&Unlocked<'_>) -> R) -> R {
    critical_section::with(|cs| {
        let depth = UNLOCK_DEPTH.borrow(cs);
        if depth.get() == 0 {
            unlock();
        }
        depth.set(depth.get() + 1);
        let _relock = Relock { depth };

        f(&Unlocked { _cs: cs })
    })
}

/// Returns `true` if the hardware latch is currently open.
pub fn is_unlocked() -> bool {
    pac::sys::reglctl().read() & 1 != 0
}

fn unlock() {
    let reglctl = pac::sys::reglctl();
    loop {
        for key in pac::sys::UNLOCK_SEQUENCE {
            reglctl.write(key);
        }
        if reglctl.read() & 1 != 0 {
            break;
        }
        core::hint::spin_loop();
    }
    trace!("protected registers unlocked");
}

fn lock() {
    pac::sys::reglctl().write(0);
    trace!("protected registers locked");
}

/// Byte offsets of `IPRST0`..`IPRST2` from `IPRST0`.
const RESET_REGISTER_OFFSETS: [usize; 3] = [
    0,
    pac::sys::IPRST1 - pac::sys::IPRST0,
    pac::sys::IPRST2 - pac::sys::IPRST0,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The reset line names no `IPRSTx` register or a bit past 31.
    InvalidResetLine,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidResetLine => f.write_str("reset line names no IPRST bit"),
        }
    }
}

impl core::error::Error for Error {}

/// A peripheral reset line: one bit in one of the `IPRSTx` registers.
///
/// Encoded as `(byte offset from IPRST0) << 24 | bit`. Any value can be
/// built, [`reset_module`] rejects the ones that name no reset bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetLine(u32);

impl ResetLine {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn from_parts(register_offset: u32, bit: u32) -> Self {
        Self((register_offset << 24) | bit)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn register_offset(self) -> usize {
        (self.0 >> 24) as usize
    }

    pub const fn bit(self) -> u32 {
        self.0 & 0x00ff_ffff
    }

    fn check(self) -> Result<(), Error> {
        if !RESET_REGISTER_OFFSETS.contains(&self.register_offset()) || self.bit() >= u32::BITS {
            return Err(Error::InvalidResetLine);
        }
        Ok(())
    }

    pub const UART0: Self = Self::from_parts(4, 16);
    pub const UART1: Self = Self::from_parts(4, 17);
    pub const UART2: Self = Self::from_parts(4, 18);
    pub const UART3: Self = Self::from_parts(4, 19);
}

/// Pulses a peripheral's reset line.
pub fn reset_module(line: ResetLine) -> Result<(), Error> {
    line.check()?;
    with_unlocked(|_| {
        let reg = pac::sys::iprst(line.register_offset());
        reg.set_bits(1 << line.bit());
        reg.clear_bits(1 << line.bit());
    });
    debug!("reset module {:#x}", line.raw());
    Ok(())
}
