//! Program upload.

use std::path::Path;

use anyhow::Result;
use console::style;
use cortexflash::{Operation, UploadRequest};

use super::execute_request;
use crate::{CliError, RunContext};

/// Reject a missing program image before touching any port.
pub(crate) fn validate(file: &Path) -> Result<()> {
    if file.is_file() {
        Ok(())
    } else {
        Err(CliError::Usage(format!("Program file not found: {}", file.display())).into())
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    ctx: &RunContext,
    file: &Path,
    preserve_fs: bool,
    project: Option<String>,
) -> Result<()> {
    let operation = if preserve_fs {
        Operation::PreservingReflash
    } else {
        Operation::Clean
    };

    if !ctx.quiet {
        eprintln!(
            "{} Using port {} at {} baud ({operation})",
            style("🔌").cyan(),
            ctx.port,
            ctx.device
                .baud_rate
        );
    }

    let request = UploadRequest::new(operation, ctx.port.as_str(), project, file)?;
    execute_request(ctx, &request)
}
