/// One 32-bit memory-mapped register.
///
/// `modify`, `set_bits` and `clear_bits` are plain read-modify-write
/// sequences. They are not atomic with respect to interrupts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reg {
    addr: usize,
}

impl Reg {
    pub(crate) const fn new(addr: usize) -> Self {
        Self { addr }
    }

    pub const fn addr(self) -> usize {
        self.addr
    }

    #[inline(always)]
    pub fn read(self) -> u32 {
        backend::read(self.addr)
    }

    #[inline(always)]
    pub fn write(self, value: u32) {
        backend::write(self.addr, value)
    }

    #[inline(always)]
    pub fn modify(self, f: impl FnOnce(u32) -> u32) {
        let value = self.read();
        self.write(f(value));
    }

    #[inline(always)]
    pub fn set_bits(self, mask: u32) {
        self.modify(|v| v | mask);
    }

    #[inline(always)]
    pub fn clear_bits(self, mask: u32) {
        self.modify(|v| v & !mask);
    }

    /// Replaces the field `mask << pos` with `value << pos`.
    #[inline(always)]
    pub fn write_field(self, pos: u32, mask: u32, value: u32) {
        self.modify(|v| (v & !(mask << pos)) | ((value & mask) << pos));
    }

    #[inline(always)]
    pub fn read_field(self, pos: u32, mask: u32) -> u32 {
        (self.read() >> pos) & mask
    }
}

#[cfg(not(test))]
mod backend {
    #[inline(always)]
    pub(super) fn read(addr: usize) -> u32 {
        // SAFETY: `Reg` handles only exist for peripheral register addresses
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    #[inline(always)]
    pub(super) fn write(addr: usize, value: u32) {
        // SAFETY: `Reg` handles only exist for peripheral register addresses
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }
}
