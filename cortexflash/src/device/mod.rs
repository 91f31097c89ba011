//! Serial port discovery and classification of VEX USB interfaces.
//!
//! A Cortex is reached either through the VEX programming kit, a Prolific
//! PL2303 bridge feeding the joystick, or through the USB tether / VEXnet
//! joystick's own USB interface.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB interfaces in front of a Cortex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// VEX programming kit (Prolific PL2303 USB-to-Serial).
    ProgrammingKit,
    /// VEX direct USB: tethered Cortex or VEXnet joystick.
    VexDirect,
    /// Unknown device.
    Unknown,
}

/// USB vendor ids of VEX interfaces.
const KNOWN_USB_VENDORS: &[(u16, DeviceKind)] = &[
    (0x067B, DeviceKind::ProgrammingKit),
    (0x04D8, DeviceKind::VexDirect),
];

impl DeviceKind {
    /// Classify a USB vendor id.
    #[must_use]
    pub fn from_vid(vid: u16) -> Self {
        KNOWN_USB_VENDORS
            .iter()
            .find(|(known, _)| *known == vid)
            .map_or(Self::Unknown, |&(_, kind)| kind)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProgrammingKit => "VEX Programming Kit",
            Self::VexDirect => "VEX USB",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known VEX interface.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// A port with no USB metadata.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Check if this port is likely connected to a Cortex.
    pub fn is_likely_cortex(&self) -> bool {
        self.device
            .is_known()
    }
}

/// Detect all available serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort::plain(port_info.port_name);

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.device = DeviceKind::from_vid(usb_info.vid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        detected.name, usb_info.vid, usb_info.pid, detected.device
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Detect all available serial ports (no backend - always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Detect ports that are likely connected to a Cortex.
pub fn detect_cortex_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_cortex)
        .collect()
}

/// Pick the best port from `ports`: a VEX interface if there is one,
/// otherwise the first port listed.
pub fn select_port(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    if let Some(port) = ports
        .iter()
        .find(|p| p.device == DeviceKind::VexDirect)
    {
        return Ok(port.clone());
    }

    if let Some(port) = ports
        .iter()
        .find(|p| p.device == DeviceKind::ProgrammingKit)
    {
        return Ok(port.clone());
    }

    ports
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound)
}

/// Auto-detect a single Cortex port.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let port = select_port(detect_ports())?;
    if port.is_likely_cortex() {
        info!("Auto-detected {}: {}", port.device.name(), port.name);
    } else {
        info!("Using first available port: {}", port.name);
    }
    Ok(port)
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}
