//! Configuration file support for cortexflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (CORTEXFLASH_*)
//! 3. Local config file (./cortexflash.toml)
//! 4. Global config file (~/.config/cortexflash/config.toml)
//!
//! ```toml
//! [port.connection]
//! serial = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [[port.usb_device]]
//! vid = 0x0403
//! pid = 0x6001
//!
//! [flash]
//! fs_start = 131072
//!
//! [timing]
//! read_timeout_ms = 700
//! erase_timeout_ms = 2000
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use cortexflash::CortexConfig;
use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Name of the per-project configuration file.
pub const LOCAL_CONFIG: &str = "cortexflash.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate of the link.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Extra USB adapters to treat as VEX interfaces.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Flash layout configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Offset of the file-system region from flash start, in bytes.
    pub fs_start: Option<u32>,
}

/// Timeout overrides, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Read timeout for ordinary bootloader commands.
    pub read_timeout_ms: Option<u64>,
    /// Read timeout while erasing.
    pub erase_timeout_ms: Option<u64>,
    /// Pause before reconnecting after a failed transfer.
    pub reconnect_delay_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash layout.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Timing overrides.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "cortexflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        for device in other.port.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }

        if other.flash.fs_start.is_some() {
            self.flash.fs_start = other.flash.fs_start;
        }

        if other.timing.read_timeout_ms.is_some() {
            self.timing.read_timeout_ms = other.timing.read_timeout_ms;
        }
        if other.timing.erase_timeout_ms.is_some() {
            self.timing.erase_timeout_ms = other.timing.erase_timeout_ms;
        }
        if other.timing.reconnect_delay_ms.is_some() {
            self.timing.reconnect_delay_ms = other.timing.reconnect_delay_ms;
        }
    }

    /// Library configuration with file overrides applied; `baud` from the
    /// command line wins over the file.
    pub fn cortex_config(&self, baud: Option<u32>) -> CortexConfig {
        let mut device = CortexConfig::new();
        if let Some(baud) = baud.or(self.port.connection.baud) {
            device = device.with_baud(baud);
        }
        if let Some(offset) = self.flash.fs_start {
            device = device.with_fs_start(offset);
        }
        if let Some(ms) = self.timing.read_timeout_ms {
            device.timing.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timing.erase_timeout_ms {
            device.timing.erase_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timing.reconnect_delay_ms {
            device.timing.reconnect_delay = Duration::from_millis(ms);
        }
        device
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        // Prefer the local file when the project already has one
        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };

        let mut stored = Self::load_from_file(&path).unwrap_or_default();
        stored.port.usb_device.push(device.clone());
        self.port.usb_device.push(device);

        let content = toml::to_string_pretty(&stored)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}
