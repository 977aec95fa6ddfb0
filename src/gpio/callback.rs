//! Per-bank interrupt callback registry.
//!
//! Each bank owns a fixed number of slots. Entries stay in registration
//! order, which is also the order they are dispatched in.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use super::{Bank, Error};

/// Slots per bank.
pub const MAX_CALLBACKS_PER_BANK: usize = 8;

/// What a callback sees when its bank's interrupt fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Event {
    pub bank: Bank,
    /// The whole `INTSRC` word read by the dispatcher. These bits are already
    /// cleared in hardware.
    pub status: u32,
}

/// A callback. Context travels inside the closure.
///
/// Runs in interrupt context: it must not block.
pub type Handler = &'static (dyn Fn(Event) + Sync);

/// Handle returned by registration, needed to remove the callback again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CallbackId(u32);

#[derive(Clone, Copy)]
struct Entry {
    id: CallbackId,
    pin_mask: u32,
    handler: Handler,
}

pub(super) struct Registry {
    entries: [Option<Entry>; MAX_CALLBACKS_PER_BANK],
    len: usize,
    next_id: u32,
}

impl Registry {
    const fn new() -> Self {
        Self {
            entries: [None; MAX_CALLBACKS_PER_BANK],
            len: 0,
            next_id: 0,
        }
    }

    fn add(&mut self, pin_mask: u32, handler: Handler) -> Result<CallbackId, Error> {
        let slot = self.entries.get_mut(self.len).ok_or(Error::RegistryFull)?;
        let id = CallbackId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        *slot = Some(Entry { id, pin_mask, handler });
        self.len += 1;
        Ok(id)
    }

    fn remove(&mut self, id: CallbackId) -> Result<(), Error> {
        let index = self.entries[..self.len]
            .iter()
            .position(|entry| entry.is_some_and(|entry| entry.id == id))
            .ok_or(Error::UnknownCallback)?;
        self.entries[index..self.len].rotate_left(1);
        self.len -= 1;
        self.entries[self.len] = None;
        Ok(())
    }

    /// Handlers whose pin mask intersects `status`, in registration order.
    fn matching(&self, status: u32) -> [Option<Handler>; MAX_CALLBACKS_PER_BANK] {
        let mut matches = [None; MAX_CALLBACKS_PER_BANK];
        let hits = self.entries[..self.len]
            .iter()
            .flatten()
            .filter(|entry| entry.pin_mask & status != 0);
        for (slot, entry) in matches.iter_mut().zip(hits) {
            *slot = Some(entry.handler);
        }
        matches
    }
}

static REGISTRIES: [Mutex<CriticalSectionRawMutex, RefCell<Registry>>; Bank::COUNT] =
    [const { Mutex::new(RefCell::new(Registry::new())) }; Bank::COUNT];

fn registry(bank: Bank) -> &'static Mutex<CriticalSectionRawMutex, RefCell<Registry>> {
    &REGISTRIES[bank.index()]
}

pub(super) fn add(bank: Bank, pin_mask: u32, handler: Handler) -> Result<CallbackId, Error> {
    registry(bank).lock(|registry| registry.borrow_mut().add(pin_mask, handler))
}

pub(super) fn remove(bank: Bank, id: CallbackId) -> Result<(), Error> {
    registry(bank).lock(|registry| registry.borrow_mut().remove(id))
}

/// Reads and clears the bank's interrupt status, then runs every callback
/// watching one of the pins that fired.
///
/// Only the bits that were read are written back, so an edge arriving in
/// between stays pending for the next entry. Handlers run outside the
/// registry lock and may add or remove callbacks themselves.
pub(super) fn dispatch(bank: Bank) {
    let intsrc = bank.regs().intsrc();
    let status = intsrc.read();
    intsrc.write(status);

    let handlers = registry(bank).lock(|registry| registry.borrow().matching(status));
    let event = Event { bank, status };
    for handler in handlers.iter().flatten() {
        handler(event);
    }
}
