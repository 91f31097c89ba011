//! On-flash file header.
//!
//! Every stored file starts on a page boundary with a 16-byte header:
//!
//! ```text
//! +-------+--------+----------+------------------+
//! | magic | status |  length  |       name       |
//! | u16   | u16    |  u32     |  [u8; 8], NUL    |
//! | LE    | LE     |  LE      |  padded          |
//! +-------+--------+----------+------------------+
//!  0       2        4          8                 16
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Magic number marking a file header.
pub const FILE_MAGIC: u16 = 0xDEDE;

/// Status of a live file; also the erased value of flash.
pub const STATUS_VALID: u16 = 0xFFFF;

/// Status of a file that has been trimmed and no longer counts as stored.
pub const STATUS_TRIMMED: u16 = 0xA50A;

/// Value of two erased flash bytes.
pub const ERASED_HALFWORD: u16 = 0xFFFF;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Longest stored file name.
pub const NAME_LEN: usize = 8;

/// Decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Magic number; [`FILE_MAGIC`] for a file.
    pub magic: u16,
    /// Status halfword.
    pub status: u16,
    /// Payload length in bytes.
    pub length: u32,
    /// NUL-padded name.
    pub name: [u8; NAME_LEN],
}

impl FileHeader {
    /// Header for a new live file.
    pub fn new(name: &str, length: u32) -> Self {
        let mut raw = [0u8; NAME_LEN];
        let short = truncate_name(name);
        raw[..short.len()].copy_from_slice(short.as_bytes());
        Self {
            magic: FILE_MAGIC,
            status: STATUS_VALID,
            length,
            name: raw,
        }
    }

    /// Decode the first 16 bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Precondition(format!(
                "file header needs {HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&bytes[8..HEADER_SIZE]);
        Ok(Self {
            magic: LittleEndian::read_u16(&bytes[0..2]),
            status: LittleEndian::read_u16(&bytes[2..4]),
            length: LittleEndian::read_u32(&bytes[4..8]),
            name,
        })
    }

    /// Encode to the on-flash layout.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        LittleEndian::write_u16(&mut bytes[0..2], self.magic);
        LittleEndian::write_u16(&mut bytes[2..4], self.status);
        LittleEndian::write_u32(&mut bytes[4..8], self.length);
        bytes[8..].copy_from_slice(&self.name);
        bytes
    }

    /// Magic and status both read as erased flash.
    pub fn is_erased(&self) -> bool {
        self.magic == ERASED_HALFWORD && self.status == ERASED_HALFWORD
    }

    /// Carries the file magic.
    pub fn is_file(&self) -> bool {
        self.magic == FILE_MAGIC
    }

    /// Status has not been overwritten.
    pub fn is_live(&self) -> bool {
        self.status == STATUS_VALID
    }

    /// Name with NUL padding removed.
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

/// Cut `name` to the longest prefix of at most eight bytes that ends on a
/// character boundary.
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= NAME_LEN {
        return name;
    }
    let mut end = NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
