//! Register map of the M46x blocks driven by this crate.
//!
//! Only the registers the drivers touch are described. Addresses and field
//! positions follow the M46x technical reference manual.
#![allow(dead_code)]

mod mmio;
#[cfg(test)]
pub(crate) mod sim;

pub use mmio::Reg;

/// System manager: register write protection, module resets and
/// multi-function pin selection.
pub mod sys {
    use super::Reg;

    pub const BASE: usize = 0x4000_0000;

    pub const IPRST0: usize = 0x008;
    pub const IPRST1: usize = 0x00C;
    pub const IPRST2: usize = 0x010;
    pub const REGLCTL: usize = 0x100;
    pub const GPA_MFP0: usize = 0x500;

    /// Unlock sequence for `REGLCTL`.
    pub const UNLOCK_SEQUENCE: [u32; 3] = [0x59, 0x16, 0x88];

    /// Multi-function registers per bank (`GPx_MFP0..3`), four pins each.
    pub const MFP_PER_BANK: usize = 4;
    pub const MFP_FIELD_MASK: u32 = 0x1f;

    pub const fn reglctl() -> Reg {
        Reg::new(BASE + REGLCTL)
    }

    /// Reset control register `offset` bytes after `IPRST0`.
    pub const fn iprst(offset: usize) -> Reg {
        Reg::new(BASE + IPRST0 + offset)
    }

    /// Multi-function register holding `pin` of `bank`.
    pub const fn mfp(bank: usize, pin: usize) -> Reg {
        Reg::new(BASE + GPA_MFP0 + (bank * MFP_PER_BANK + pin / 4) * 4)
    }

    /// Position of `pin`'s 5-bit function field inside its MFP register.
    pub const fn mfp_pos(pin: usize) -> u32 {
        ((pin % 4) * 8) as u32
    }
}

/// Clock controller.
pub mod clk {
    use super::Reg;

    pub const BASE: usize = 0x4000_0200;

    pub const PWRCTL: usize = 0x00;
    pub const AHBCLK0: usize = 0x04;
    pub const APBCLK0: usize = 0x08;
    pub const APBCLK1: usize = 0x0C;
    pub const CLKSEL0: usize = 0x10;
    pub const CLKSEL1: usize = 0x14;
    pub const CLKSEL2: usize = 0x18;
    pub const CLKSEL3: usize = 0x1C;
    pub const CLKDIV0: usize = 0x20;
    pub const CLKDIV1: usize = 0x24;
    pub const CLKDIV2: usize = 0x28;
    pub const CLKDIV3: usize = 0x2C;
    pub const CLKDIV4: usize = 0x30;
    pub const PCLKDIV: usize = 0x34;
    pub const PLLCTL: usize = 0x40;
    pub const STATUS: usize = 0x50;

    /// Gating registers, indexed by the module-clock gate selector.
    pub const GATE_REGS: [usize; 3] = [AHBCLK0, APBCLK0, APBCLK1];
    /// Source select registers, indexed by the module-clock select selector.
    pub const SEL_REGS: [usize; 4] = [CLKSEL0, CLKSEL1, CLKSEL2, CLKSEL3];
    /// Divider registers, indexed by the module-clock divider selector.
    pub const DIV_REGS: [usize; 5] = [CLKDIV0, CLKDIV1, CLKDIV2, CLKDIV3, CLKDIV4];

    pub const PWRCTL_HXTEN: u32 = 1 << 0;
    pub const PWRCTL_LXTEN: u32 = 1 << 1;
    pub const PWRCTL_HIRCEN: u32 = 1 << 2;
    pub const PWRCTL_LIRCEN: u32 = 1 << 3;
    pub const PWRCTL_HIRC48EN: u32 = 1 << 5;

    pub const STATUS_HXTSTB: u32 = 1 << 0;
    pub const STATUS_LXTSTB: u32 = 1 << 1;
    pub const STATUS_PLLSTB: u32 = 1 << 2;
    pub const STATUS_LIRCSTB: u32 = 1 << 3;
    pub const STATUS_HIRCSTB: u32 = 1 << 4;
    pub const STATUS_HIRC48STB: u32 = 1 << 6;

    /// `CLKSEL0.HCLKSEL[2:0]`
    pub const HCLKSEL_POS: u32 = 0;
    pub const HCLKSEL_MASK: u32 = 0x7;
    pub const HCLKSEL_HXT: u32 = 0;
    pub const HCLKSEL_LXT: u32 = 1;
    pub const HCLKSEL_PLL: u32 = 2;
    pub const HCLKSEL_LIRC: u32 = 3;
    pub const HCLKSEL_HIRC: u32 = 7;

    /// `CLKDIV0.HCLKDIV[3:0]`
    pub const HCLKDIV_POS: u32 = 0;
    pub const HCLKDIV_MASK: u32 = 0xf;

    /// `PCLKDIV.APB0DIV[2:0]`, `PCLKDIV.APB1DIV[6:4]`
    pub const APB0DIV_POS: u32 = 0;
    pub const APB1DIV_POS: u32 = 4;
    pub const APBDIV_MASK: u32 = 0x7;

    /// `PLLCTL` fields
    pub const PLLCTL_FBDIV_POS: u32 = 0;
    pub const PLLCTL_FBDIV_MASK: u32 = 0x1ff;
    pub const PLLCTL_INDIV_POS: u32 = 9;
    pub const PLLCTL_INDIV_MASK: u32 = 0x1f;
    pub const PLLCTL_OUTDIV_POS: u32 = 14;
    pub const PLLCTL_OUTDIV_MASK: u32 = 0x3;
    pub const PLLCTL_PD: u32 = 1 << 16;
    pub const PLLCTL_BP: u32 = 1 << 17;
    pub const PLLCTL_OE: u32 = 1 << 18;
    pub const PLLCTL_PLLSRC_HIRC: u32 = 1 << 19;
    pub const PLLCTL_STBSEL: u32 = 1 << 23;

    pub const fn reg(offset: usize) -> Reg {
        Reg::new(BASE + offset)
    }

    pub const fn pwrctl() -> Reg {
        reg(PWRCTL)
    }

    pub const fn status() -> Reg {
        reg(STATUS)
    }

    pub const fn clksel0() -> Reg {
        reg(CLKSEL0)
    }

    pub const fn clkdiv0() -> Reg {
        reg(CLKDIV0)
    }

    pub const fn pclkdiv() -> Reg {
        reg(PCLKDIV)
    }

    pub const fn pllctl() -> Reg {
        reg(PLLCTL)
    }
}

/// GPIO banks. Bank `n` lives at `BASE + n * STRIDE`.
pub mod gpio {
    use super::Reg;

    pub const BASE: usize = 0x4000_4000;
    pub const STRIDE: usize = 0x40;
    pub const BANKS: usize = 8;

    pub const MODE: usize = 0x00;
    pub const DINOFF: usize = 0x04;
    pub const DOUT: usize = 0x08;
    pub const DATMSK: usize = 0x0C;
    pub const PIN: usize = 0x10;
    pub const DBEN: usize = 0x14;
    pub const INTTYPE: usize = 0x18;
    pub const INTEN: usize = 0x1C;
    pub const INTSRC: usize = 0x20;
    pub const PUSEL: usize = 0x30;

    /// Two-bit `MODE` field values.
    pub const MODE_INPUT: u32 = 0;
    pub const MODE_OUTPUT: u32 = 1;
    pub const MODE_OPEN_DRAIN: u32 = 2;
    pub const MODE_QUASI: u32 = 3;

    /// Two-bit `PUSEL` field values.
    pub const PUSEL_DISABLE: u32 = 0;
    pub const PUSEL_PULL_UP: u32 = 1;
    pub const PUSEL_PULL_DOWN: u32 = 2;

    /// `INTEN` holds the falling/low enable in bit `n` and the rising/high
    /// enable in bit `n + 16`.
    pub const INTEN_RISING_SHIFT: u32 = 16;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RegisterBlock {
        base: usize,
    }

    impl RegisterBlock {
        pub const fn new(bank: usize) -> Self {
            Self {
                base: BASE + bank * STRIDE,
            }
        }

        pub const fn base(&self) -> usize {
            self.base
        }

        pub const fn mode(&self) -> Reg {
            Reg::new(self.base + MODE)
        }

        pub const fn dout(&self) -> Reg {
            Reg::new(self.base + DOUT)
        }

        pub const fn pin(&self) -> Reg {
            Reg::new(self.base + PIN)
        }

        pub const fn inttype(&self) -> Reg {
            Reg::new(self.base + INTTYPE)
        }

        pub const fn inten(&self) -> Reg {
            Reg::new(self.base + INTEN)
        }

        pub const fn intsrc(&self) -> Reg {
            Reg::new(self.base + INTSRC)
        }

        pub const fn pusel(&self) -> Reg {
            Reg::new(self.base + PUSEL)
        }
    }
}

/// UART controllers.
pub mod uart {
    use super::Reg;

    pub const UART0_BASE: usize = 0x4007_0000;
    pub const UART1_BASE: usize = 0x4007_1000;
    pub const UART2_BASE: usize = 0x4007_2000;
    pub const UART3_BASE: usize = 0x4007_3000;
    pub const BASES: [usize; 4] = [UART0_BASE, UART1_BASE, UART2_BASE, UART3_BASE];

    pub const DAT: usize = 0x00;
    pub const INTEN: usize = 0x04;
    pub const FIFO: usize = 0x08;
    pub const LINE: usize = 0x0C;
    pub const MODEM: usize = 0x10;
    pub const MODEMSTS: usize = 0x14;
    pub const FIFOSTS: usize = 0x18;
    pub const INTSTS: usize = 0x1C;
    pub const BAUD: usize = 0x24;
    pub const FUNCSEL: usize = 0x30;

    pub const INTEN_RDAIEN: u32 = 1 << 0;
    pub const INTEN_THREIEN: u32 = 1 << 1;
    pub const INTEN_RLSIEN: u32 = 1 << 2;
    pub const INTEN_ATORTSEN: u32 = 1 << 12;
    pub const INTEN_ATOCTSEN: u32 = 1 << 13;

    pub const FIFO_RFITL_MASK: u32 = 0xf << 4;
    pub const FIFO_RTSTRGLV_MASK: u32 = 0xf << 16;

    pub const LINE_WLS_5: u32 = 0;
    pub const LINE_WLS_6: u32 = 1;
    pub const LINE_WLS_7: u32 = 2;
    pub const LINE_WLS_8: u32 = 3;
    pub const LINE_NSB: u32 = 1 << 2;
    pub const LINE_PBE: u32 = 1 << 3;
    pub const LINE_EPE: u32 = 1 << 4;
    pub const LINE_SPE: u32 = 1 << 5;

    pub const PARITY_NONE: u32 = 0;
    pub const PARITY_ODD: u32 = LINE_PBE;
    pub const PARITY_EVEN: u32 = LINE_PBE | LINE_EPE;
    pub const PARITY_MARK: u32 = LINE_PBE | LINE_SPE;
    pub const PARITY_SPACE: u32 = LINE_PBE | LINE_EPE | LINE_SPE;

    pub const MODEM_RTSACTLV: u32 = 1 << 9;
    pub const MODEMSTS_CTSACTLV: u32 = 1 << 8;

    pub const FIFOSTS_RXOVIF: u32 = 1 << 0;
    pub const FIFOSTS_PEF: u32 = 1 << 4;
    pub const FIFOSTS_FEF: u32 = 1 << 5;
    pub const FIFOSTS_BIF: u32 = 1 << 6;
    pub const FIFOSTS_RXEMPTY: u32 = 1 << 14;
    pub const FIFOSTS_TXEMPTY: u32 = 1 << 22;
    pub const FIFOSTS_TXFULL: u32 = 1 << 23;
    pub const FIFOSTS_TXEMPTYF: u32 = 1 << 28;

    pub const INTSTS_RDAINT: u32 = 1 << 8;
    pub const INTSTS_THREINT: u32 = 1 << 9;
    pub const INTSTS_RLSINT: u32 = 1 << 10;

    pub const BAUD_MODE0: u32 = 0;
    pub const BAUD_MODE2: u32 = 0x3000_0000;
    pub const BAUD_BRD_MASK: u32 = 0xffff;

    pub const FUNCSEL_UART: u32 = 0;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RegisterBlock {
        base: usize,
    }

    impl RegisterBlock {
        pub const fn new(base: usize) -> Self {
            Self { base }
        }

        pub const fn base(&self) -> usize {
            self.base
        }

        pub const fn dat(&self) -> Reg {
            Reg::new(self.base + DAT)
        }

        pub const fn inten(&self) -> Reg {
            Reg::new(self.base + INTEN)
        }

        pub const fn fifo(&self) -> Reg {
            Reg::new(self.base + FIFO)
        }

        pub const fn line(&self) -> Reg {
            Reg::new(self.base + LINE)
        }

        pub const fn modem(&self) -> Reg {
            Reg::new(self.base + MODEM)
        }

        pub const fn modemsts(&self) -> Reg {
            Reg::new(self.base + MODEMSTS)
        }

        pub const fn fifosts(&self) -> Reg {
            Reg::new(self.base + FIFOSTS)
        }

        pub const fn intsts(&self) -> Reg {
            Reg::new(self.base + INTSTS)
        }

        pub const fn baud(&self) -> Reg {
            Reg::new(self.base + BAUD)
        }

        pub const fn funcsel(&self) -> Reg {
            Reg::new(self.base + FUNCSEL)
        }
    }
}

/// NVIC lines of the peripherals driven by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(clippy::upper_case_acronyms)]
#[repr(u16)]
pub enum Interrupt {
    GPA = 16,
    GPB = 17,
    GPC = 18,
    GPD = 19,
    GPE = 20,
    GPF = 21,
    UART0 = 36,
    UART1 = 37,
    UART2 = 48,
    UART3 = 49,
    GPG = 72,
    GPH = 88,
}

// SAFETY: every variant is a valid M46x external interrupt number
unsafe impl cortex_m::interrupt::InterruptNumber for Interrupt {
    #[inline(always)]
    fn number(self) -> u16 {
        self as u16
    }
}
