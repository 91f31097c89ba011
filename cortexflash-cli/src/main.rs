//! cortexflash CLI - Command-line tool for flashing VEX Cortex controllers.
//!
//! ## Features
//!
//! - Upload a program, optionally keeping the on-device file system
//! - Store a file on the Cortex or retrieve every stored file
//! - Interactive serial port selection
//! - Environment variable support
//! - Ctrl-C cancels at the next stage boundary

use std::{
    env,
    path::PathBuf,
    process::ExitCode,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use cortexflash::{CancelToken, CortexConfig};
use env_logger::Env;
use log::debug;

mod commands;
mod config;
mod progress;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// cortexflash - Flash VEX Cortex controllers over the STM32 bootloader.
///
/// Environment variables:
///   CORTEXFLASH_PORT              - Default serial port
///   CORTEXFLASH_BAUD              - Baud rate (default: 115200)
///   CORTEXFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "cortexflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    cortexflash flash bin/output.bin\n  \
    cortexflash flash --preserve-fs bin/output.bin\n  \
    cortexflash fs put LOG.TXT\n  \
    cortexflash fs pull ./robot-files")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "CORTEXFLASH_PORT")]
    port: Option<String>,

    /// Baud rate of the link (overrides the configuration file).
    #[arg(short, long, global = true, env = "CORTEXFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "CORTEXFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Offer all available ports, not only known VEX interfaces.
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a program image to the Cortex.
    Flash {
        /// Raw binary produced by the robot project build.
        file: PathBuf,

        /// Keep the on-device file system (program must fit below it).
        #[arg(long)]
        preserve_fs: bool,

        /// Project name shown while uploading.
        #[arg(long)]
        project: Option<String>,
    },

    /// Manage files stored in the Cortex flash.
    Fs {
        #[command(subcommand)]
        command: FsCommands,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
}

/// File-system subcommands.
#[derive(Subcommand)]
enum FsCommands {
    /// Store a local file on the Cortex, replacing one with the same name.
    Put {
        /// File to send; its name is cut to eight bytes on the device.
        file: PathBuf,
    },

    /// Copy every file stored on the Cortex into a local directory.
    Pull {
        /// Destination directory (created if missing).
        dir: PathBuf,
    },
}

/// Failures that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// Everything a device command needs once the port is chosen.
pub(crate) struct RunContext {
    /// Serial port name.
    pub port: String,
    /// Link configuration for the library.
    pub device: CortexConfig,
    /// Suppress non-essential output.
    pub quiet: bool,
    /// Set by the Ctrl-C handler.
    pub cancel: CancelToken,
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<cortexflash::Error>() {
        Some(cortexflash::Error::DeviceNotFound) => 4,
        Some(cortexflash::Error::InvalidRequest(_)) => 2,
        _ => 1,
    }
}

/// Print an error and, for library errors, what the user can do about it.
fn report_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", style("Error:").red().bold());
    let hint = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<cortexflash::Error>())
        .and_then(cortexflash::Error::remediation);
    if let Some(hint) = hint {
        eprintln!("  {} {hint}", style("hint:").yellow());
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_cancel_handler() -> CancelToken {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            std::process::exit(130);
        }
        handler_token.cancel();
        eprintln!(
            "\n{} Cancelling after the current step (press Ctrl-C again to abort)",
            style("!").yellow()
        );
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    cancel
}

/// Resolve the serial port for a device command.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };
    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected
        .port
        .name)
}

fn run_context(cli: &Cli, config: &mut Config, cancel: CancelToken) -> Result<RunContext> {
    let port = get_port(cli, config)?;
    Ok(RunContext {
        port,
        device: config.cortex_config(cli.baud),
        quiet: cli.quiet,
        cancel,
    })
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            file,
            preserve_fs,
            project,
        } => {
            commands::flash::validate(file)?;
            let ctx = run_context(cli, &mut config, install_cancel_handler())?;
            commands::flash::cmd_flash(&ctx, file, *preserve_fs, project.clone())
        },
        Commands::Fs {
            command: FsCommands::Put { file },
        } => {
            commands::fs::validate_put(file)?;
            let ctx = run_context(cli, &mut config, install_cancel_handler())?;
            commands::fs::cmd_put(&ctx, file)
        },
        Commands::Fs {
            command: FsCommands::Pull { dir },
        } => {
            commands::fs::prepare_pull(dir)?;
            let ctx = run_context(cli, &mut config, install_cancel_handler())?;
            commands::fs::cmd_pull(&ctx, dir)
        },
        Commands::ListPorts { json } => commands::list_ports::cmd_list_ports(*json),
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "cortexflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::from(exit_code_for(&err))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            exit_code_for(&CliError::Usage("bad".to_string()).into()),
            2
        );
        assert_eq!(
            exit_code_for(&CliError::Cancelled("stop".to_string()).into()),
            130
        );
        assert_eq!(
            exit_code_for(&cortexflash::Error::DeviceNotFound.into()),
            4
        );
        assert_eq!(
            exit_code_for(&cortexflash::Error::Busy("COM3".to_string()).into()),
            1
        );
        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_parse_fs_subcommands() {
        let cli = Cli::try_parse_from(["cortexflash", "fs", "put", "LOG.TXT"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Fs {
                command: FsCommands::Put { .. }
            }
        ));

        let cli = Cli::try_parse_from(["cortexflash", "-p", "COM3", "fs", "pull", "out"]).unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert!(matches!(
            cli.command,
            Commands::Fs {
                command: FsCommands::Pull { .. }
            }
        ));
    }

    #[test]
    fn test_parse_flash_flags() {
        let cli =
            Cli::try_parse_from(["cortexflash", "flash", "--preserve-fs", "output.bin"]).unwrap();
        match cli.command {
            Commands::Flash {
                file,
                preserve_fs,
                project,
            } => {
                assert_eq!(file, PathBuf::from("output.bin"));
                assert!(preserve_fs);
                assert!(project.is_none());
            },
            _ => panic!("expected flash"),
        }
    }
}
