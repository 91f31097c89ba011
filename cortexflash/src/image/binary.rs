//! Raw binary images.
//!
//! A Cortex program is a flat `.bin` file written from the start of flash;
//! a file sent to the flash file system is stored byte for byte. Either way
//! the input is read whole, since every image fits in device flash.

use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// A binary loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    name: String,
    data: Vec<u8>,
}

impl BinaryImage {
    /// Wrap bytes under a name.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Read a binary from a file, named after the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| {
                n.to_string_lossy()
                    .into_owned()
            })
            .ok_or_else(|| {
                Error::InvalidRequest(format!("{} does not name a file", path.display()))
            })?;
        let data = std::fs::read(path)?;
        debug!("Loaded {} ({} bytes)", path.display(), data.len());
        Ok(Self { name, data })
    }

    /// File name the image was loaded from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether the image holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }
}
