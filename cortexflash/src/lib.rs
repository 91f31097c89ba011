//! # cortexflash
//!
//! A library for flashing VEX Cortex controllers.
//!
//! The Cortex is an STM32F10x behind a VEXnet link. This crate provides:
//!
//! - VEXnet link control (stop user code, system info, bootloader reset)
//! - The STM32 ROM bootloader command set (AN3155) over any [`Port`]
//! - A page-based file system in the flash beyond the program image
//! - An orchestrator that runs a complete upload with reconnect-and-resume
//!
//! ## Supported Devices
//!
//! Every STM32F10x density class the bootloader can report; see
//! [`target::chip::STM_DEVICES`].
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use cortexflash::{CancelToken, CortexConfig, NoOpProgress, Operation, UploadRequest};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = UploadRequest::new(Operation::Clean, "/dev/ttyUSB0", None, "firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let outcome = cortexflash::execute(
//!             &request,
//!             &CortexConfig::default(),
//!             CancelToken::new(),
//!             &mut NoOpProgress,
//!             None,
//!         )?;
//!         println!("{outcome:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

pub mod device;
pub mod error;
pub mod fs;
pub mod image;
pub mod port;
pub mod progress;
pub mod protocol;
pub mod request;
pub mod target;

/// Cooperative cancellation flag shared between a run and its caller.
///
/// Clones share the same flag. A run checks it between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0
            .store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0
            .load(Ordering::SeqCst)
    }
}

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use {
    device::auto_detect_port,
    port::NativePort,
    target::cortex::execute,
};
pub use {
    device::{DetectedPort, DeviceKind, detect_cortex_ports, detect_ports},
    error::{Error, Result},
    fs::{FileEntry, FileSystem, FlashMemory},
    image::BinaryImage,
    port::{Parity, Port, SerialConfig},
    progress::{NoOpProgress, ProgressCallback, ProgressEvent},
    protocol::stm32::Session,
    request::{Operation, UploadRequest},
    target::{
        chip::{CortexConfig, DeviceDescriptor, LinkTiming},
        cortex::{CortexFlasher, Outcome, Stage, TerminalControl},
    },
};
