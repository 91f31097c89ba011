//! Port abstraction for the serial link to the Cortex.
//!
//! The bootloader protocol and the flash file system are written against the
//! [`Port`] trait rather than a concrete serial port, so they can run over
//! the native `serialport` backend or over a simulated device in tests.
//!
//! ```text
//! +-------------------+    +-------------------+
//! |   CortexFlasher   |--->|    FileSystem     |
//! +---------+---------+    +---------+---------+
//!           |                        |
//!           v                        v
//! +---------+------------------------+---------+
//! |        Session (STM32 bootloader)          |
//! +---------------------+----------------------+
//!                       |
//!                       v
//! +---------------------+----------------------+
//! |                 Port trait                 |
//! +---------------------+----------------------+
//!                       |
//!                       v
//! +---------------------+----------------------+
//! |  NativePort (serialport + reader thread)   |
//! +--------------------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use cortexflash::port::{Parity, Port};
//!
//! fn ping<P: Port>(port: &mut P) -> cortexflash::Result<u8> {
//!     port.set_params(115200, Parity::Even)?;
//!     port.purge()?;
//!     port.write_bytes(&[0x7F])?;
//!     port.read_byte()
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod sim;

use std::time::Duration;

use crate::error::{Error, Result};

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
    /// Parity used when the port is first opened.
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(700),
            parity: Parity::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Parity checking mode.
///
/// The VEXnet link layer runs without parity; the STM32 bootloader requires
/// even parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Byte-oriented duplex link with bounded reads.
///
/// Reads either return exactly the requested number of bytes or fail with
/// [`Error::Timeout`] once the configured timeout has elapsed. Bytes that did
/// arrive stay buffered until the next read or [`purge`](Port::purge).
pub trait Port: Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Change baud rate and parity (8 data bits, 1 stop bit).
    fn set_params(&mut self, baud_rate: u32, parity: Parity) -> Result<()>;

    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Queue bytes for transmission.
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Block until the output buffer has drained, failing once the read
    /// timeout passes.
    fn flush(&mut self) -> Result<()>;

    /// Discard any received bytes that have not been read yet.
    fn purge(&mut self) -> Result<()>;

    /// Read exactly `len` bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Read a single byte.
    fn read_byte(&mut self) -> Result<u8> {
        self.read_bytes(1)?
            .first()
            .copied()
            .ok_or_else(|| Error::Timeout("no byte received".to_string()))
    }

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

impl<P: Port + ?Sized> Port for &mut P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn set_params(&mut self, baud_rate: u32, parity: Parity) -> Result<()> {
        (**self).set_params(baud_rate, parity)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_bytes(data)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn purge(&mut self) -> Result<()> {
        (**self).purge()
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(len)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::NativePort;
