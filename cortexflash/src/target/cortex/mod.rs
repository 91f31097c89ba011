//! VEX Cortex: VEXnet link control and the flashing orchestrator.

pub mod flasher;
pub mod link;

#[cfg(feature = "native")]
pub use flasher::execute;
pub use flasher::{CortexFlasher, Outcome, Stage, TerminalControl};
