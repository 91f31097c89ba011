//! STM32 ROM bootloader command set (AN3155).
//!
//! Every command starts with the opcode and its complement, answered by a
//! single verification byte:
//!
//! ```text
//! host:    [ OP | !OP ]            [ payload ... | XOR ]
//! device:               [ ACK ]                         [ ACK ]
//! ```
//!
//! A [`Session`] starts [`Unversioned`]. [`Session::get`] runs GET, which
//! reports the device's opcodes, and yields a [`Versioned`] session; every
//! other command is only reachable from there. GID then attaches a
//! [`DeviceDescriptor`], which flash-size computations require.

use std::fmt;

use log::{debug, trace, warn};

use crate::{
    error::{Error, Result},
    port::Port,
    protocol::encoding::{checksum, encode_address},
    target::chip::DeviceDescriptor,
};

/// Acknowledge byte.
pub const ACK: u8 = 0x79;

/// Non-acknowledge byte.
pub const NACK: u8 = 0x1F;

/// Autobaud synchronisation byte.
pub const SYNC: u8 = 0x7F;

/// Opcode of GET, the only command with a fixed code.
pub const GET_OPCODE: u8 = 0x00;

/// Erase argument selecting every page.
pub const ERASE_ALL_PAGES: u8 = 0xFF;

/// Largest WM and RD payload.
pub const MAX_TRANSFER: usize = 256;

/// Smallest WM payload.
pub const MIN_WRITE: usize = 4;

/// Pages per selective erase command.
pub const ERASE_BATCH: usize = 16;

/// Pages reachable by ER, whose page numbers are a single byte.
pub const ERASABLE_PAGES: u32 = 256;

/// Reads of the verification byte before the device is declared silent.
const ACK_ATTEMPTS: usize = 5;

/// Bootloader commands after GET, in the order GET lists their opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Get version and read protection status.
    GetVersion,
    /// Get product id.
    GetId,
    /// Read memory.
    ReadMemory,
    /// Jump to an address.
    Go,
    /// Write memory.
    WriteMemory,
    /// Erase pages.
    Erase,
    /// Enable write protection for sectors.
    WriteProtect,
    /// Disable write protection.
    WriteUnprotect,
    /// Enable readout protection.
    ReadoutProtect,
    /// Disable readout protection.
    ReadoutUnprotect,
}

impl Command {
    /// All commands in GET order.
    pub const ALL: [Self; 10] = [
        Self::GetVersion,
        Self::GetId,
        Self::ReadMemory,
        Self::Go,
        Self::WriteMemory,
        Self::Erase,
        Self::WriteProtect,
        Self::WriteUnprotect,
        Self::ReadoutProtect,
        Self::ReadoutUnprotect,
    ];

    /// Short mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetVersion => "GVR",
            Self::GetId => "GID",
            Self::ReadMemory => "RD",
            Self::Go => "GO",
            Self::WriteMemory => "WM",
            Self::Erase => "ER",
            Self::WriteProtect => "WP",
            Self::WriteUnprotect => "UW",
            Self::ReadoutProtect => "RP",
            Self::ReadoutUnprotect => "UR",
        }
    }

    /// Opcode assigned by AN3155 for bootloader version 2.x.
    pub const fn standard_opcode(self) -> u8 {
        match self {
            Self::GetVersion => 0x01,
            Self::GetId => 0x02,
            Self::ReadMemory => 0x11,
            Self::Go => 0x21,
            Self::WriteMemory => 0x31,
            Self::Erase => 0x43,
            Self::WriteProtect => 0x63,
            Self::WriteUnprotect => 0x73,
            Self::ReadoutProtect => 0x82,
            Self::ReadoutUnprotect => 0x92,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opcodes reported by GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSet {
    opcodes: [u8; 10],
}

impl CommandSet {
    /// Build from the ten opcodes that follow GET's own code.
    pub fn from_opcodes(opcodes: [u8; 10]) -> Self {
        Self { opcodes }
    }

    /// Opcode for `command` on this device.
    pub fn opcode(&self, command: Command) -> u8 {
        self.opcodes[command.index()]
    }
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::from_opcodes(Command::ALL.map(Command::standard_opcode))
    }
}

/// Session state before GET.
#[derive(Debug)]
pub struct Unversioned;

/// Session state after GET: opcodes and bootloader version are known.
#[derive(Debug)]
pub struct Versioned {
    commands: CommandSet,
    bootloader_version: u8,
}

/// Version information returned by GVR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    /// Bootloader version (BCD, e.g. 0x22 for 2.2).
    pub version: u8,
    /// Option bytes reported with the version.
    pub option_bytes: [u8; 2],
}

/// A bootloader conversation over a borrowed port.
pub struct Session<'p, P: Port + ?Sized, S> {
    port: &'p mut P,
    state: S,
    device: Option<&'static DeviceDescriptor>,
    version_info: Option<VersionInfo>,
}

impl<P: Port + ?Sized, S> Session<'_, P, S> {
    /// Access the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut *self.port
    }

    /// Access the underlying port.
    pub fn port(&self) -> &P {
        &*self.port
    }

    /// Send the sync byte so the bootloader can measure the baud rate.
    ///
    /// A bootloader that is already synchronised answers NACK, so callers
    /// usually treat a failure here as non-fatal.
    pub fn negotiate(&mut self) -> Result<()> {
        debug!("Sending bootloader sync");
        self.port
            .write_bytes(&[SYNC])?;
        self.verify("SYNC")
    }

    fn send_command(&mut self, opcode: u8, name: &'static str) -> Result<()> {
        trace!("{name}: opcode {opcode:#04x}");
        self.port
            .write_bytes(&[opcode, !opcode])?;
        self.verify(name)
    }

    /// Wait for the verification byte of `name`.
    fn verify(&mut self, name: &'static str) -> Result<()> {
        for attempt in 1..=ACK_ATTEMPTS {
            match self
                .port
                .read_byte()
            {
                Ok(ACK) => return Ok(()),
                Ok(byte) => return Err(Error::NonAcknowledge {
                    command: name,
                    byte,
                }),
                Err(Error::Timeout(_)) => {
                    trace!("{name}: no verification byte (attempt {attempt}/{ACK_ATTEMPTS})");
                },
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotResponding(format!("no acknowledgement for {name}")))
    }

    fn read_frame(&mut self, len: usize, name: &'static str) -> Result<Vec<u8>> {
        self.port
            .read_bytes(len)
            .map_err(|e| match e {
                Error::Timeout(detail) => Error::NotResponding(format!("{name} reply: {detail}")),
                other => other,
            })
    }
}

impl<'p, P: Port + ?Sized> Session<'p, P, Unversioned> {
    /// Start a session on a port already switched to bootloader parity.
    pub fn new(port: &'p mut P) -> Self {
        Self {
            port,
            state: Unversioned,
            device: None,
            version_info: None,
        }
    }

    /// Run GET, learning the bootloader version and the device's opcodes.
    pub fn get(mut self) -> Result<Session<'p, P, Versioned>> {
        let state = self.read_command_set()?;
        debug!(
            "Bootloader version {}.{}",
            state.bootloader_version >> 4,
            state.bootloader_version & 0x0F
        );
        Ok(Session {
            port: self.port,
            state,
            device: None,
            version_info: None,
        })
    }
}

impl<P: Port + ?Sized, S> Session<'_, P, S> {
    fn read_command_set(&mut self) -> Result<Versioned> {
        self.send_command(GET_OPCODE, "GET")?;
        let count = usize::from(self.read_frame(1, "GET")?[0]) + 1;
        let data = self.read_frame(count, "GET")?;
        self.verify("GET")?;

        // [version, GET, GVR, GID, RD, GO, WM, ER, WP, UW, RP, UR]
        let opcodes: [u8; 10] = data
            .get(2..12)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| {
                Error::UnsupportedIdentity(format!("GET listed only {count} bytes of commands"))
            })?;
        Ok(Versioned {
            commands: CommandSet::from_opcodes(opcodes),
            bootloader_version: data[0],
        })
    }
}

impl<'p, P: Port + ?Sized> Session<'p, P, Versioned> {
    /// Bootloader version reported by GET.
    pub fn bootloader_version(&self) -> u8 {
        self.state
            .bootloader_version
    }

    /// Opcodes reported by GET.
    pub fn commands(&self) -> &CommandSet {
        &self.state.commands
    }

    /// Descriptor of the identified device.
    pub fn device(&self) -> Result<&'static DeviceDescriptor> {
        self.device
            .ok_or_else(|| Error::Precondition("device has not been identified (GID)".to_string()))
    }

    /// Version and option bytes from the last GVR, if one ran.
    pub fn version_info(&self) -> Option<VersionInfo> {
        self.version_info
    }

    fn command(&mut self, command: Command) -> Result<()> {
        let opcode = self
            .state
            .commands
            .opcode(command);
        self.send_command(opcode, command.name())
    }

    /// Run GID and attach the matching device descriptor.
    ///
    /// Any previously attached descriptor is dropped first, so a failure
    /// leaves the session unidentified.
    pub fn identify(&mut self) -> Result<&'static DeviceDescriptor> {
        self.device = None;
        self.command(Command::GetId)?;
        let len = usize::from(self.read_frame(1, "GID")?[0]) + 1;
        let id = self.read_frame(len, "GID")?;
        self.verify("GID")?;

        let &[hi, lo] = id.as_slice() else {
            return Err(Error::UnsupportedIdentity(format!(
                "GID returned {len} bytes, expected 2"
            )));
        };
        let product_id = u16::from_be_bytes([hi, lo]);
        let device = DeviceDescriptor::lookup(product_id)?;
        debug!("Identified {device}");
        self.device = Some(device);
        Ok(device)
    }

    /// Run GVR.
    pub fn get_version(&mut self) -> Result<VersionInfo> {
        self.command(Command::GetVersion)?;
        let data = self.read_frame(3, "GVR")?;
        self.verify("GVR")?;
        let info = VersionInfo {
            version: data[0],
            option_bytes: [data[1], data[2]],
        };
        self.version_info = Some(info);
        Ok(info)
    }

    /// Rerun sync, GET and GID after the link was re-established.
    pub fn resync(&mut self) -> Result<&'static DeviceDescriptor> {
        if let Err(e) = self.negotiate() {
            debug!("Sync after reconnect not acknowledged: {e}");
        }
        self.state = self.read_command_set()?;
        self.identify()
    }

    /// Read `len` bytes (1 to 256) starting at `address`.
    pub fn read_memory(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        if !(1..=MAX_TRANSFER).contains(&len) {
            return Err(Error::Precondition(format!(
                "RD length {len} is outside 1..={MAX_TRANSFER}"
            )));
        }
        trace!("RD {len} bytes @ {address:#010x}");
        self.command(Command::ReadMemory)?;
        self.port
            .write_bytes(&encode_address(address))?;
        self.verify("RD address")?;
        let n = (len - 1) as u8;
        self.port
            .write_bytes(&[n, !n])?;
        self.verify("RD length")?;
        self.read_frame(len, "RD")
    }

    /// Write `data` (4 to 256 bytes, a multiple of 4) at `address`.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let len = data.len();
        if !(MIN_WRITE..=MAX_TRANSFER).contains(&len) || len % 4 != 0 {
            return Err(Error::Precondition(format!(
                "WM payload of {len} bytes must be a multiple of 4 within {MIN_WRITE}..={MAX_TRANSFER}"
            )));
        }
        trace!("WM {len} bytes @ {address:#010x}");
        self.command(Command::WriteMemory)?;
        self.port
            .write_bytes(&encode_address(address))?;
        self.verify("WM address")?;

        let n = (len - 1) as u8;
        let mut frame = Vec::with_capacity(len + 2);
        frame.push(n);
        frame.extend_from_slice(data);
        frame.push(checksum(n, data));
        self.port
            .write_bytes(&frame)?;
        self.verify("WM data")
    }

    /// Erase all of main flash.
    pub fn erase_all(&mut self) -> Result<()> {
        debug!("Erasing all pages");
        self.command(Command::Erase)?;
        self.send_command(ERASE_ALL_PAGES, "ER all")
    }

    /// Erase the given pages, sixteen per command.
    pub fn erase_pages(&mut self, pages: &[u32]) -> Result<()> {
        if let Some(page) = pages
            .iter()
            .find(|&&p| p >= ERASABLE_PAGES)
        {
            return Err(Error::Precondition(format!(
                "page {page} cannot be addressed by a one-byte erase"
            )));
        }
        for batch in pages.chunks(ERASE_BATCH) {
            let numbers: Vec<u8> = batch
                .iter()
                .map(|&p| p as u8)
                .collect();
            debug!("Erasing pages {numbers:?}");
            self.command(Command::Erase)?;
            self.send_list(&numbers, "ER pages")?;
        }
        Ok(())
    }

    /// Enable write protection on the given sectors.
    pub fn write_protect(&mut self, sectors: &[u8]) -> Result<()> {
        if sectors.is_empty() || sectors.len() > 256 {
            return Err(Error::Precondition(format!(
                "WP needs 1 to 256 sectors, got {}",
                sectors.len()
            )));
        }
        self.command(Command::WriteProtect)?;
        self.send_list(sectors, "WP sectors")
    }

    /// Disable write protection on all sectors.
    pub fn write_unprotect(&mut self) -> Result<()> {
        self.command(Command::WriteUnprotect)?;
        self.verify("UW")
    }

    /// Enable readout protection. The device resets, ending the session.
    pub fn readout_protect(mut self) -> Result<Session<'p, P, Unversioned>> {
        self.command(Command::ReadoutProtect)?;
        self.verify("RP")?;
        warn!("Readout protection enabled; the device is resetting");
        Ok(Session::new(self.port))
    }

    /// Disable readout protection. This mass-erases flash and resets the
    /// device, ending the session.
    pub fn readout_unprotect(mut self) -> Result<Session<'p, P, Unversioned>> {
        self.command(Command::ReadoutUnprotect)?;
        self.verify("UR")?;
        warn!("Readout protection removed; flash erased and the device is resetting");
        Ok(Session::new(self.port))
    }

    /// Jump to `address`. No verification follows the address, since the
    /// bootloader is no longer in control once it is accepted.
    pub fn go(&mut self, address: u32) -> Result<()> {
        debug!("GO {address:#010x}");
        self.command(Command::Go)?;
        self.port
            .write_bytes(&encode_address(address))?;
        self.port
            .flush()
    }

    fn send_list(&mut self, items: &[u8], name: &'static str) -> Result<()> {
        let n = (items.len() - 1) as u8;
        let mut frame = Vec::with_capacity(items.len() + 2);
        frame.push(n);
        frame.extend_from_slice(items);
        frame.push(checksum(n, items));
        self.port
            .write_bytes(&frame)?;
        self.verify(name)
    }
}
