//! SoC early init.

use crate::clocks::{self, ClockError, SystemClockConfig};

/// Core setup the vendor startup code does before anything else.
///
/// On targets with a hardware FPU this grants full access to CP10/CP11.
pub fn system_init() {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "arm", target_os = "none", target_abi = "eabihf"))] {
            // SAFETY: runs once before any other code touches the SCB
            let mut core = unsafe { cortex_m::Peripherals::steal() };
            core.SCB.enable_fpu();
        }
    }
}

/// Runs once, before the executor starts.
///
/// Brings up the oscillators, PCLK divider and core clock `config` asks for,
/// then records the resulting clock tree for [`clocks::with_clocks`].
pub fn early_init(config: &SystemClockConfig) -> Result<(), ClockError> {
    system_init();
    clocks::init(config)
}
