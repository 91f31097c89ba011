//! STM32 device geometry and Cortex link configuration.
//!
//! The bootloader reports a 12-bit product id through GID; [`DeviceDescriptor::lookup`]
//! maps it to the flash and RAM layout of that STM32F10x density class.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Start of main flash on every supported STM32F10x part.
pub const FLASH_START: u32 = 0x0800_0000;

/// Default offset of the file-system region from the start of flash.
pub const DEFAULT_FS_START: u32 = 128 * 1024;

/// Default baud rate of the Cortex link and bootloader.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Flash and RAM geometry of one STM32 density class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Product id reported by GID.
    pub product_id: u16,
    /// Density class name.
    pub name: &'static str,
    /// First RAM address usable by the bootloader's caller.
    pub ram_start: u32,
    /// End of RAM (exclusive).
    pub ram_end: u32,
    /// Start of main flash.
    pub flash_start: u32,
    /// End of main flash (exclusive).
    pub flash_end: u32,
    /// Pages per write-protection sector.
    pub pages_per_sector: u32,
    /// Erase page size in bytes.
    pub page_size: u32,
}

/// Every device the bootloader protocol is known to work with.
pub const STM_DEVICES: &[DeviceDescriptor] = &[
    DeviceDescriptor {
        product_id: 0x412,
        name: "Low-density",
        ram_start: 0x2000_0200,
        ram_end: 0x2000_2800,
        flash_start: FLASH_START,
        flash_end: 0x0800_8000,
        pages_per_sector: 4,
        page_size: 1024,
    },
    DeviceDescriptor {
        product_id: 0x410,
        name: "Medium-density",
        ram_start: 0x2000_0200,
        ram_end: 0x2000_5000,
        flash_start: FLASH_START,
        flash_end: 0x0802_0000,
        pages_per_sector: 4,
        page_size: 1024,
    },
    DeviceDescriptor {
        product_id: 0x414,
        name: "High-density",
        ram_start: 0x2000_0200,
        ram_end: 0x2001_0000,
        flash_start: FLASH_START,
        flash_end: 0x0806_0000,
        pages_per_sector: 2,
        page_size: 2048,
    },
    DeviceDescriptor {
        product_id: 0x418,
        name: "Connectivity line",
        ram_start: 0x2000_1000,
        ram_end: 0x2001_0000,
        flash_start: FLASH_START,
        flash_end: 0x0804_0000,
        pages_per_sector: 2,
        page_size: 2048,
    },
    DeviceDescriptor {
        product_id: 0x420,
        name: "Medium-density VL",
        ram_start: 0x2000_0200,
        ram_end: 0x2000_2000,
        flash_start: FLASH_START,
        flash_end: 0x0802_0000,
        pages_per_sector: 4,
        page_size: 1024,
    },
    DeviceDescriptor {
        product_id: 0x430,
        name: "XL-density",
        ram_start: 0x2000_0800,
        ram_end: 0x2001_8000,
        flash_start: FLASH_START,
        flash_end: 0x0810_0000,
        pages_per_sector: 2,
        page_size: 2048,
    },
];

impl DeviceDescriptor {
    /// Find the descriptor for a product id.
    pub fn lookup(product_id: u16) -> Result<&'static Self> {
        STM_DEVICES
            .iter()
            .find(|d| d.product_id == product_id)
            .ok_or(Error::UnsupportedDevice(product_id))
    }

    /// Size of main flash in bytes.
    pub fn flash_size(&self) -> u32 {
        self.flash_end - self.flash_start
    }

    /// Number of erase pages in main flash.
    pub fn page_count(&self) -> u32 {
        self.flash_size() / self.page_size
    }

    /// Size of RAM in bytes.
    pub fn ram_size(&self) -> u32 {
        self.ram_end - self.ram_start
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (PID {:#05x}, {} KiB flash, {} B pages)",
            self.name,
            self.product_id,
            self.flash_size() / 1024,
            self.page_size
        )
    }
}

/// Delays and timeouts used while talking to the Cortex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkTiming {
    /// Read timeout for ordinary commands.
    pub read_timeout: Duration,
    /// Read timeout while a page erase is running.
    pub erase_timeout: Duration,
    /// Pause after each stop-user-code byte.
    pub stop_byte_interval: Duration,
    /// A single stop-user-code byte taking longer than this means the link hung.
    pub stop_byte_limit: Duration,
    /// Pause between bootload triggers.
    pub bootload_interval: Duration,
    /// Pause after the last bootload trigger before syncing.
    pub bootload_settle: Duration,
    /// Pause between orchestrator stages.
    pub stage_settle: Duration,
    /// Pause after every chunked read or write command.
    pub chunk_delay: Duration,
    /// Pause before reconnecting after a failed chunk.
    pub reconnect_delay: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(700),
            erase_timeout: Duration::from_millis(2000),
            stop_byte_interval: Duration::from_millis(100),
            stop_byte_limit: Duration::from_millis(650),
            bootload_interval: Duration::from_millis(150),
            bootload_settle: Duration::from_millis(400),
            stage_settle: Duration::from_millis(100),
            chunk_delay: Duration::from_millis(20),
            reconnect_delay: Duration::from_millis(1000),
        }
    }
}

impl LinkTiming {
    /// Timing with every pause removed, keeping the read timeouts.
    ///
    /// Meant for links that answer instantly, such as a simulated device.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            stop_byte_interval: Duration::ZERO,
            bootload_interval: Duration::ZERO,
            bootload_settle: Duration::ZERO,
            stage_settle: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            reconnect_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Caller-owned configuration for one flashing run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CortexConfig {
    /// Baud rate of the link and the bootloader.
    pub baud_rate: u32,
    /// Offset of the file-system region from the start of flash.
    pub fs_start: u32,
    /// Delays and timeouts.
    pub timing: LinkTiming,
}

impl CortexConfig {
    /// Create the default Cortex configuration.
    pub fn new() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD,
            fs_start: DEFAULT_FS_START,
            timing: LinkTiming::default(),
        }
    }

    /// Set the baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set the file-system offset from flash start.
    #[must_use]
    pub fn with_fs_start(mut self, offset: u32) -> Self {
        self.fs_start = offset;
        self
    }

    /// Replace the timing table.
    #[must_use]
    pub fn with_timing(mut self, timing: LinkTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Reject a file-system start that splits a flash page of `device`.
    pub fn check_fs_start(&self, device: &DeviceDescriptor) -> Result<()> {
        if self.fs_start % device.page_size == 0 {
            Ok(())
        } else {
            Err(Error::Precondition(format!(
                "file system start {:#x} is not a multiple of the {}-byte page size of {}",
                self.fs_start, device.page_size, device.name
            )))
        }
    }
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self::new()
    }
}
