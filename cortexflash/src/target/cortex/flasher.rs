//! End-to-end Cortex flashing.
//!
//! A run walks the same stages for every operation:
//!
//! ```text
//! wake link -> query link -> bootloader handshake -> erase -> program -> GO
//!                                                 \-> file transfer ---/
//! restore link (always)
//! ```
//!
//! Raw programming and file-system transfers both go through
//! [`FileSystem`], over a flash handle whose recovery re-runs the link
//! handshake, so a chunk lost mid-transfer is retried once after a full
//! reconnect.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    CancelToken,
    error::{Error, Result},
    fs::{FileSystem, FlashMemory},
    image::BinaryImage,
    port::Port,
    progress::{NoOpProgress, ProgressCallback},
    protocol::{
        encoding::delay,
        stm32::{Session, Versioned},
    },
    request::{Operation, UploadRequest},
    target::{
        chip::{CortexConfig, DeviceDescriptor},
        cortex::link,
    },
};

/// Stage of a run, as reported when it is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Stopping the user program.
    WakeLink,
    /// Asking the link for system information.
    QueryLink,
    /// Resetting into the bootloader and identifying the device.
    Handshake,
    /// Erasing flash before programming.
    Erase,
    /// Writing the program image.
    Program,
    /// Reading or writing the file system.
    FileTransfer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WakeLink => "stopping user code",
            Self::QueryLink => "querying the VEX system",
            Self::Handshake => "bootloader handshake",
            Self::Erase => "erasing",
            Self::Program => "programming",
            Self::FileTransfer => "file transfer",
        })
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every stage finished.
    Completed,
    /// The cancel token was set; the run stopped before this stage.
    Cancelled(Stage),
}

/// Optional control over a terminal view attached to the same port.
///
/// The flasher releases the terminal before opening the port and hands it
/// back once the run is over, whatever the result.
pub trait TerminalControl {
    /// Detach from `port` so the flasher can open it.
    fn release(&mut self, port: &str) -> Result<()>;

    /// Reattach to `port`.
    fn reattach(&mut self, port: &str);
}

static ACTIVE_PORTS: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());

/// Marks a port as in use for the lifetime of the guard.
#[derive(Debug)]
pub(crate) struct RunGuard {
    port: String,
}

impl RunGuard {
    pub(crate) fn acquire(port: &str) -> Result<Self> {
        let mut active = ACTIVE_PORTS
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !active.insert(port.to_string()) {
            return Err(Error::Busy(port.to_string()));
        }
        Ok(Self {
            port: port.to_string(),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        ACTIVE_PORTS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port);
    }
}

/// Run the link handshake up to the point where the bootloader listens.
///
/// Returns the stage that was about to start if `cancel` is set between
/// stages.
fn connect<P: Port + ?Sized>(
    port: &mut P,
    config: &CortexConfig,
    cancel: &CancelToken,
    progress: &mut dyn ProgressCallback,
) -> Result<Option<Stage>> {
    if cancel.is_cancelled() {
        return Ok(Some(Stage::WakeLink));
    }
    progress.message_begin("Stopping user code");
    link::stop_user_code(port, config)?;
    progress.message_end("done.");
    delay(config.timing.stage_settle);

    if cancel.is_cancelled() {
        return Ok(Some(Stage::QueryLink));
    }
    progress.message_begin("Interrogating VEX system");
    link::query_system_info(port, config)?;
    progress.message_end("done.");

    if cancel.is_cancelled() {
        return Ok(Some(Stage::Handshake));
    }
    progress.message_begin("Initializing controller");
    link::trigger_bootloader(port, config)?;
    progress.message_end("done.");
    delay(config.timing.bootload_settle);
    link::parity_stm(port, config)?;
    Ok(None)
}

/// Session handle whose recovery reconnects the whole link.
struct ReconnectingFlash<'s, 'p, P: Port + ?Sized> {
    session: &'s mut Session<'p, P, Versioned>,
    config: &'s CortexConfig,
}

impl<P: Port + ?Sized> FlashMemory for ReconnectingFlash<'_, '_, P> {
    fn device(&self) -> Result<&'static DeviceDescriptor> {
        self.session
            .device()
    }

    fn read(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.session
            .read_memory(address, len)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.session
            .write_memory(address, data)
    }

    fn erase(&mut self, pages: &[u32]) -> Result<()> {
        self.session
            .erase_pages(pages)
    }

    fn timeout(&self) -> Duration {
        self.session
            .port()
            .timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.session
            .port_mut()
            .set_timeout(timeout)
    }

    fn recover(&mut self) -> Result<()> {
        info!("Reconnecting to the Cortex");
        connect(
            self.session
                .port_mut(),
            self.config,
            &CancelToken::new(),
            &mut NoOpProgress,
        )?;
        self.session
            .resync()
            .map(|_| ())
    }
}

/// Drives one [`UploadRequest`] against a Cortex.
pub struct CortexFlasher<P: Port> {
    port: P,
    config: CortexConfig,
    cancel: CancelToken,
}

impl<P: Port> CortexFlasher<P> {
    /// Create a flasher over an opened port.
    pub fn new(port: P, config: CortexConfig) -> Self {
        Self {
            port,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Use `cancel` to stop the run between stages.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this flasher's runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel
            .clone()
    }

    /// Configuration in use.
    pub fn config(&self) -> &CortexConfig {
        &self.config
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Carry out `request`.
    ///
    /// Only one run per port name may be in flight in the process; another
    /// fails immediately with [`Error::Busy`]. Whatever happens, the link
    /// is returned to terminal mode and the port is closed before this
    /// returns.
    pub fn run(
        &mut self,
        request: &UploadRequest,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Outcome> {
        let _guard = RunGuard::acquire(request.port())?;
        self.run_guarded(request, progress)
    }

    fn run_guarded(
        &mut self,
        request: &UploadRequest,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Outcome> {
        info!("{} ({})", request.description(), request.operation());
        progress.message(&request.description());

        let result = self.run_stages(request, progress);

        link::restore_terminal(&mut self.port, &self.config);
        if let Err(e) = self
            .port
            .close()
        {
            debug!("Closing {} failed: {e}", request.port());
        }

        match &result {
            Ok(Outcome::Completed) => info!("Finished: {}", request.description()),
            Ok(Outcome::Cancelled(stage)) => warn!("Cancelled before {stage}"),
            Err(e) => {
                warn!("{e}");
                if let Some(hint) = e.remediation() {
                    warn!("{hint}");
                }
            },
        }
        result
    }

    fn run_stages(
        &mut self,
        request: &UploadRequest,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Outcome> {
        let payload = match request.operation() {
            Operation::FsUpload => None,
            _ => Some(BinaryImage::from_file(request.target())?),
        };
        let config = self
            .config
            .clone();
        let cancel = self
            .cancel
            .clone();

        self.port
            .set_timeout(config.timing.read_timeout)?;
        if let Some(stage) = connect(&mut self.port, &config, &cancel, progress)? {
            return Ok(Outcome::Cancelled(stage));
        }

        let mut session = Session::new(&mut self.port);
        if let Err(e) = session.negotiate() {
            warn!("Bootloader sync not acknowledged, continuing: {e}");
        }
        let mut session = session.get()?;
        let device = session.identify()?;
        info!(
            "Connected to {device}, bootloader {}.{}",
            session.bootloader_version() >> 4,
            session.bootloader_version() & 0x0F
        );

        let result = operate(
            &mut session,
            &config,
            &cancel,
            request,
            payload.as_ref(),
            progress,
        );

        match result {
            Ok(Outcome::Completed) => {
                progress.message("Starting user code");
                session.go(device.flash_start)?;
                delay(config.timing.stage_settle);
                Ok(Outcome::Completed)
            },
            other => {
                if let Err(e) = session.go(device.flash_start) {
                    debug!("Could not restart user code: {e}");
                }
                other
            },
        }
    }
}

/// Stages between the handshake and GO.
fn operate<P: Port + ?Sized>(
    session: &mut Session<'_, P, Versioned>,
    config: &CortexConfig,
    cancel: &CancelToken,
    request: &UploadRequest,
    payload: Option<&BinaryImage>,
    progress: &mut dyn ProgressCallback,
) -> Result<Outcome> {
    let device = session.device()?;
    let operation = request.operation();
    config.check_fs_start(device)?;

    if operation.is_program() {
        let image = payload
            .ok_or_else(|| Error::Precondition("no program image loaded".to_string()))?;
        let limit = match operation {
            Operation::PreservingReflash => config
                .fs_start
                .min(device.flash_size()),
            _ => device.flash_size(),
        };
        if image.len() > limit as usize || image.len() >= device.flash_size() as usize {
            return Err(Error::InsufficientSpace {
                required: image.len(),
                available: limit as usize,
            });
        }

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled(Stage::Erase));
        }
        progress.message_begin("Erasing memory");
        if operation == Operation::Clean {
            erase_all(session, config)?;
        } else {
            let pages = limit / device.page_size;
            let mut flash = ReconnectingFlash {
                session: &mut *session,
                config,
            };
            let mut fs = FileSystem::new(&mut flash, config)?;
            if pages > 0 {
                fs.erase_range(0, pages - 1)?;
            }
        }
        progress.message_end("done.");
        delay(config.timing.stage_settle);

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled(Stage::Program));
        }
        info!("Writing {} ({} bytes)", image.name(), image.len());
        let mut flash = ReconnectingFlash { session, config };
        FileSystem::new(&mut flash, config)?.write_data(0, None, image.data(), progress)?;
        return Ok(Outcome::Completed);
    }

    if cancel.is_cancelled() {
        return Ok(Outcome::Cancelled(Stage::FileTransfer));
    }
    let mut flash = ReconnectingFlash { session, config };
    let mut fs = FileSystem::new(&mut flash, config)?;
    match (operation, payload) {
        (Operation::FsDownload, Some(file)) => {
            fs.download(file.name(), file.data(), progress)?;
        },
        (Operation::FsUpload, _) => {
            let written = fs.upload_all(request.target(), progress)?;
            info!(
                "Retrieved {} file(s) into {}",
                written.len(),
                request
                    .target()
                    .display()
            );
        },
        _ => {
            return Err(Error::Precondition(
                "no file loaded to send to the device".to_string(),
            ));
        },
    }
    Ok(Outcome::Completed)
}

/// Global erase with the read timeout raised for its duration.
fn erase_all<P: Port + ?Sized>(
    session: &mut Session<'_, P, Versioned>,
    config: &CortexConfig,
) -> Result<()> {
    let saved = session
        .port()
        .timeout();
    session
        .port_mut()
        .set_timeout(config.timing.erase_timeout)?;
    let result = session.erase_all();
    let restored = session
        .port_mut()
        .set_timeout(saved);
    result.and(restored)
}

/// Open `request.port()` and carry out the request on it.
///
/// `terminal`, if given, is released before the port is opened and
/// reattached afterwards.
#[cfg(feature = "native")]
pub fn execute(
    request: &UploadRequest,
    config: &CortexConfig,
    cancel: CancelToken,
    progress: &mut dyn ProgressCallback,
    mut terminal: Option<&mut dyn TerminalControl>,
) -> Result<Outcome> {
    use crate::port::{NativePort, SerialConfig};

    let _guard = RunGuard::acquire(request.port())?;
    if let Some(terminal) = terminal.as_deref_mut() {
        terminal.release(request.port())?;
    }

    let serial = SerialConfig::new(request.port(), config.baud_rate)
        .with_timeout(config.timing.read_timeout);
    let result = NativePort::open(&serial).and_then(|port| {
        CortexFlasher::new(port, config.clone())
            .with_cancel(cancel)
            .run_guarded(request, progress)
    });

    if let Some(terminal) = terminal {
        terminal.reattach(request.port());
    }
    result
}
