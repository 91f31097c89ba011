//! Target devices.
//!
//! [`chip`] describes the STM32 parts the bootloader can report and the
//! timing of the link in front of them; [`cortex`] drives a VEX Cortex
//! through a complete run.

pub mod chip;
pub mod cortex;

pub use chip::{CortexConfig, DeviceDescriptor, LinkTiming};
