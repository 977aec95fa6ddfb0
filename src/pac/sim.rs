//! Simulated register bus for host unit tests.
//!
//! Every test thread gets its own register file. Besides plain storage the
//! bus models the few registers whose hardware behavior the drivers depend
//! on: the `REGLCTL` unlock sequence, write-1-to-clear status registers and
//! the UART data FIFOs.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::vec::Vec;

use super::{gpio, sys, uart};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read(usize, u32),
    Write(usize, u32),
}

#[derive(Default)]
struct Bus {
    regs: HashMap<usize, u32>,
    rx: HashMap<usize, VecDeque<u8>>,
    tx: HashMap<usize, Vec<u8>>,
    raise_after_read: HashMap<usize, u32>,
    log: Vec<Access>,
    unlock_step: usize,
}

thread_local! {
    static BUS: RefCell<Bus> = RefCell::new(Bus::default());
}

fn uart_base(addr: usize, offset: usize) -> Option<usize> {
    uart::BASES.iter().copied().find(|base| base + offset == addr)
}

fn is_write_one_to_clear(addr: usize) -> bool {
    let gpio_intsrc = (0..gpio::BANKS).any(|bank| gpio::BASE + bank * gpio::STRIDE + gpio::INTSRC == addr);
    gpio_intsrc || uart_base(addr, uart::FIFOSTS).is_some()
}

impl Bus {
    fn load(&mut self, addr: usize) -> u32 {
        if let Some(base) = uart_base(addr, uart::DAT) {
            return self.rx.entry(base).or_default().pop_front().map_or(0, u32::from);
        }
        let mut value = self.regs.get(&addr).copied().unwrap_or(0);
        if let Some(base) = uart_base(addr, uart::FIFOSTS) {
            value &= !(uart::FIFOSTS_RXEMPTY | uart::FIFOSTS_TXFULL);
            if self.rx.get(&base).map_or(true, VecDeque::is_empty) {
                value |= uart::FIFOSTS_RXEMPTY;
            }
            value |= uart::FIFOSTS_TXEMPTY | uart::FIFOSTS_TXEMPTYF;
        }
        if let Some(bits) = self.raise_after_read.remove(&addr) {
            *self.regs.entry(addr).or_default() |= bits;
        }
        value
    }

    fn store(&mut self, addr: usize, value: u32) {
        if addr == sys::BASE + sys::REGLCTL {
            if value == sys::UNLOCK_SEQUENCE[self.unlock_step] {
                self.unlock_step += 1;
                if self.unlock_step == sys::UNLOCK_SEQUENCE.len() {
                    self.regs.insert(addr, 1);
                    self.unlock_step = 0;
                }
            } else {
                self.unlock_step = 0;
                self.regs.insert(addr, 0);
            }
            return;
        }
        if let Some(base) = uart_base(addr, uart::DAT) {
            self.tx.entry(base).or_default().push(value as u8);
            return;
        }
        if is_write_one_to_clear(addr) {
            *self.regs.entry(addr).or_default() &= !value;
            return;
        }
        self.regs.insert(addr, value);
    }
}

pub fn read(addr: usize) -> u32 {
    BUS.with(|bus| {
        let mut bus = bus.borrow_mut();
        let value = bus.load(addr);
        bus.log.push(Access::Read(addr, value));
        value
    })
}

pub fn write(addr: usize, value: u32) {
    BUS.with(|bus| {
        let mut bus = bus.borrow_mut();
        bus.log.push(Access::Write(addr, value));
        bus.store(addr, value);
    })
}

/// Forgets all register contents and the access log.
pub fn reset() {
    BUS.with(|bus| *bus.borrow_mut() = Bus::default());
}

/// Current raw register content, without side effects.
pub fn peek(addr: usize) -> u32 {
    BUS.with(|bus| bus.borrow().regs.get(&addr).copied().unwrap_or(0))
}

/// Sets a register as hardware would, bypassing write semantics.
pub fn poke(addr: usize, value: u32) {
    BUS.with(|bus| {
        bus.borrow_mut().regs.insert(addr, value);
    });
}

/// ORs `bits` into a register, as a peripheral raising status flags does.
pub fn raise(addr: usize, bits: u32) {
    BUS.with(|bus| {
        *bus.borrow_mut().regs.entry(addr).or_default() |= bits;
    });
}

/// Raises `bits` right after the next read of `addr` returns.
pub fn raise_after_next_read(addr: usize, bits: u32) {
    BUS.with(|bus| {
        bus.borrow_mut().raise_after_read.insert(addr, bits);
    });
}

pub fn push_rx(base: usize, bytes: &[u8]) {
    BUS.with(|bus| bus.borrow_mut().rx.entry(base).or_default().extend(bytes.iter().copied()));
}

pub fn take_tx(base: usize) -> Vec<u8> {
    BUS.with(|bus| bus.borrow_mut().tx.remove(&base).unwrap_or_default())
}

pub fn log() -> Vec<Access> {
    BUS.with(|bus| bus.borrow().log.clone())
}

pub fn clear_log() {
    BUS.with(|bus| bus.borrow_mut().log.clear());
}

/// Values written to `addr`, in order.
pub fn writes_to(addr: usize) -> Vec<u32> {
    log()
        .into_iter()
        .filter_map(|access| match access {
            Access::Write(a, v) if a == addr => Some(v),
            _ => None,
        })
        .collect()
}

/// Position of the first write to `addr` in the access log.
pub fn first_write(addr: usize) -> Option<usize> {
    log()
        .iter()
        .position(|access| matches!(access, Access::Write(a, _) if *a == addr))
}

/// Position of the last write to `addr` in the access log.
pub fn last_write(addr: usize) -> Option<usize> {
    log()
        .iter()
        .rposition(|access| matches!(access, Access::Write(a, _) if *a == addr))
}
