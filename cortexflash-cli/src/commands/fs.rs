//! File-system transfers: `fs put` and `fs pull`.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use cortexflash::{Operation, UploadRequest};
use log::warn;

use super::execute_request;
use crate::{CliError, RunContext};

/// Longest name the device stores.
const DEVICE_NAME_LEN: usize = 8;

/// Check the file to store and warn when its name will be shortened.
pub(crate) fn validate_put(file: &Path) -> Result<()> {
    if !file.is_file() {
        return Err(CliError::Usage(format!("File not found: {}", file.display())).into());
    }
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if name.len() > DEVICE_NAME_LEN {
        warn!("'{name}' is longer than {DEVICE_NAME_LEN} bytes and will be shortened on the device");
    }
    Ok(())
}

/// Create the destination directory for `fs pull`.
pub(crate) fn prepare_pull(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(CliError::Usage(format!("Not a directory: {}", dir.display())).into());
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))
}

/// Store one file on the device.
pub(crate) fn cmd_put(ctx: &RunContext, file: &Path) -> Result<()> {
    let request = UploadRequest::new(Operation::FsDownload, ctx.port.as_str(), None, file)?;
    execute_request(ctx, &request)
}

/// Copy every stored file into `dir`.
pub(crate) fn cmd_pull(ctx: &RunContext, dir: &Path) -> Result<()> {
    let request = UploadRequest::new(Operation::FsUpload, ctx.port.as_str(), None, dir)?;
    execute_request(ctx, &request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_put() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LOG.TXT");
        assert!(validate_put(&path).is_err());

        fs::write(&path, b"hello").unwrap();
        assert!(validate_put(&path).is_ok());
    }

    #[test]
    fn test_prepare_pull_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("robot").join("files");
        prepare_pull(&target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_prepare_pull_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken");
        fs::write(&path, b"x").unwrap();
        let err = prepare_pull(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }
}
