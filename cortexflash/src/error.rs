//! Error types for cortexflash.

use std::io;
use thiserror::Error;

/// Result type for cortexflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cortexflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (local file operations, port I/O).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial port could not be opened or configured.
    #[error("Port {port} is unavailable: {reason}")]
    LinkUnavailable {
        /// Port name.
        port: String,
        /// What the operating system reported.
        reason: String,
    },

    /// A read did not receive enough bytes before the timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device stopped answering during a command or link stage.
    #[error("Cortex not responding: {0}")]
    NotResponding(String),

    /// The bootloader answered with something other than ACK.
    #[error("{command} was not acknowledged (received {byte:#04x})")]
    NonAcknowledge {
        /// Command that was being verified.
        command: &'static str,
        /// Byte received instead of ACK.
        byte: u8,
    },

    /// The product id reported by the bootloader is not in the device table.
    #[error("Unsupported device: product id {0:#05x}")]
    UnsupportedDevice(u16),

    /// The bootloader returned an identification frame of unexpected length.
    #[error("Unsupported device: {0}")]
    UnsupportedIdentity(String),

    /// No free region is large enough for the data.
    #[error("Insufficient space: {required} bytes required, {available} bytes available")]
    InsufficientSpace {
        /// Bytes needed, including the file header where one applies.
        required: usize,
        /// Largest contiguous region available.
        available: usize,
    },

    /// The requested file is not stored on the device.
    #[error("File not found on device: {0}")]
    FileNotFound(String),

    /// A chunk failed again after the link was reconnected.
    #[error("Transfer interrupted at {address:#010x}: {source}")]
    TransferInterrupted {
        /// Absolute flash address of the failed chunk.
        address: u32,
        /// Failure from the retried attempt.
        #[source]
        source: Box<Error>,
    },

    /// An operation was called with arguments or in a state it does not accept.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// An upload request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Port discovery found nothing to connect to.
    #[error("No VEX serial port found")]
    DeviceNotFound,

    /// Another run is already using the port.
    #[error("Port {0} is busy with another upload")]
    Busy(String),
}

impl Error {
    /// Returns true for failures caused by the serial link rather than by
    /// the request or the device contents.
    ///
    /// These are the errors a reconnect may clear.
    pub fn is_link_failure(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(_) | Self::NotResponding(_) | Self::NonAcknowledge { .. } => {
                true
            },
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }

    /// User-facing advice for this error, if there is any to give.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::LinkUnavailable { .. } | Self::Busy(_) => Some(
                "Close any terminal or program using the port, check the cable, and try again.",
            ),
            Self::NotResponding(_) | Self::NonAcknowledge { .. } | Self::Timeout(_) => Some(
                "Check that the Cortex is on and connected. If using VEXnet, try another set of \
                 VEXnet keys, or use the USB tether cable.",
            ),
            Self::TransferInterrupted { .. } => Some(
                "Connection lost during the transfer. Try another set of VEXnet keys, or use the \
                 USB tether cable.",
            ),
            Self::UnsupportedDevice(_) | Self::UnsupportedIdentity(_) => {
                Some("Only VEX Cortex controllers are supported by this tool.")
            },
            Self::InsufficientSpace { .. } => {
                Some("Remove files from the VEX device or upload a smaller program.")
            },
            Self::DeviceNotFound => Some(
                "Connect the VEX programming kit or USB tether cable, or name the port explicitly.",
            ),
            Self::Io(_) => Some("Could not read or write a file on the local computer."),
            _ => None,
        }
    }
}
