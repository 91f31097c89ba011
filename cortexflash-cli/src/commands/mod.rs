//! Command implementations.
//!
//! Each subcommand is implemented in its own module; the device commands
//! share [`execute_request`].

pub(crate) mod flash;
pub(crate) mod fs;
pub(crate) mod list_ports;

use anyhow::Result;
use console::style;
use cortexflash::{Outcome, UploadRequest};
use log::debug;

use crate::{CliError, RunContext, progress::TerminalProgress};

/// Run one request against the device and turn a cancelled run into an error.
pub(crate) fn execute_request(ctx: &RunContext, request: &UploadRequest) -> Result<()> {
    debug!(
        "Running {} on {} at {} baud",
        request.operation(),
        ctx.port,
        ctx.device
            .baud_rate
    );

    let mut progress = TerminalProgress::new(ctx.quiet);
    let outcome = cortexflash::execute(
        request,
        &ctx.device,
        ctx.cancel
            .clone(),
        &mut progress,
        None,
    )?;

    match outcome {
        Outcome::Completed => {
            if !ctx.quiet {
                eprintln!("{} Finished", style("✓").green().bold());
            }
            Ok(())
        },
        Outcome::Cancelled(stage) => {
            Err(CliError::Cancelled(format!("Cancelled before stage: {stage}")).into())
        },
    }
}
