//! What a caller asks the flasher to do.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

/// Operation performed by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Operation {
    /// Erase all flash and write the program.
    Clean = 0,
    /// Write the program, keeping the file-system region.
    PreservingReflash = 1,
    /// Copy every stored file to a local directory.
    FsUpload = 2,
    /// Store a local file in the device file system.
    FsDownload = 3,
}

impl Operation {
    /// Whether the target is a program image written from flash start.
    pub fn is_program(self) -> bool {
        matches!(self, Self::Clean | Self::PreservingReflash)
    }
}

impl TryFrom<u8> for Operation {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Clean),
            1 => Ok(Self::PreservingReflash),
            2 => Ok(Self::FsUpload),
            3 => Ok(Self::FsDownload),
            other => Err(Error::InvalidRequest(format!(
                "operation code {other} is not between 0 and 3"
            ))),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "clean reflash",
            Self::PreservingReflash => "reflash preserving files",
            Self::FsUpload => "file retrieval",
            Self::FsDownload => "file upload",
        })
    }
}

/// One validated job for [`CortexFlasher`](crate::target::cortex::CortexFlasher).
///
/// `target` is the program image for [`Operation::Clean`] and
/// [`Operation::PreservingReflash`], the destination directory for
/// [`Operation::FsUpload`], and the file to store for
/// [`Operation::FsDownload`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UploadRequest {
    operation: Operation,
    port: String,
    project: Option<String>,
    target: PathBuf,
}

impl UploadRequest {
    /// Build a request, rejecting an empty port name or target path.
    pub fn new(
        operation: Operation,
        port: impl Into<String>,
        project: Option<String>,
        target: impl Into<PathBuf>,
    ) -> Result<Self> {
        let port = port.into();
        let target = target.into();
        if port
            .trim()
            .is_empty()
        {
            return Err(Error::InvalidRequest("no serial port given".to_string()));
        }
        if target
            .as_os_str()
            .is_empty()
        {
            return Err(Error::InvalidRequest("no target path given".to_string()));
        }
        Ok(Self {
            operation,
            port,
            project,
            target,
        })
    }

    /// Requested operation.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Serial port name.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Project label, if the caller gave one.
    pub fn project(&self) -> Option<&str> {
        self.project
            .as_deref()
    }

    /// Target path.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Final component of the target path, or the whole path.
    pub fn target_name(&self) -> String {
        self.target
            .file_name()
            .unwrap_or(self.target.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Human-readable job title.
    pub fn description(&self) -> String {
        match self.operation {
            Operation::Clean | Operation::PreservingReflash => format!(
                "Uploading {} to VEX device",
                self.project()
                    .unwrap_or("project")
            ),
            Operation::FsUpload => {
                format!("Retrieving files on VEX device to {}", self.target_name())
            },
            Operation::FsDownload => {
                format!("Sending file {} to VEX device", self.target_name())
            },
        }
    }
}
