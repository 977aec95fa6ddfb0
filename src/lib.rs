#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]
//!
//! ## Feature flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

#[cfg(feature = "unstable-pac")]
pub mod pac;
#[cfg(not(feature = "unstable-pac"))]
pub(crate) mod pac;

pub mod clocks;
pub mod gpio;
pub mod pinctrl;
pub mod soc;
pub mod sys;
pub mod uart;

pub use embassy_hal_internal::{Peri, PeripheralType};

use crate::clocks::{ClockError, SystemClockConfig};

/// Interrupt lines and NVIC helpers.
pub mod interrupt {
    pub use embassy_hal_internal::interrupt::{InterruptExt, Priority};

    pub use crate::pac::Interrupt;
}

embassy_hal_internal::peripherals!(
    GPIOA, GPIOB, GPIOC, GPIOD, GPIOE, GPIOF, GPIOG, GPIOH, UART0, UART1, UART2, UART3,
);

/// HAL configuration.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// System clock setup applied by [`init`].
    pub clocks: SystemClockConfig,
}

/// Initializes the HAL.
///
/// Runs SoC early init with `config.clocks` and hands out the peripheral
/// singletons. Fails if the clocks cannot be brought up as asked, or if the
/// HAL was already initialized.
pub fn init(config: Config) -> Result<Peripherals, ClockError> {
    soc::early_init(&config.clocks)?;
    Ok(Peripherals::take())
}
