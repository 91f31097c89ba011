//! Native serial port implementation using the `serialport` crate.
//!
//! Received bytes are collected by a background reader thread into a shared
//! buffer. Each arrival notifies a condition variable, so a blocked
//! [`Port::read_bytes`] wakes as soon as enough data is present and gives up
//! when the configured timeout elapses.

use {
    crate::{
        error::{Error, Result},
        port::{Parity, Port, SerialConfig},
    },
    log::{debug, trace},
    serialport::{ClearBuffer, DataBits, FlowControl, SerialPort, StopBits},
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
};

/// How long the reader thread blocks in one OS read before checking for shutdown.
const READER_POLL: Duration = Duration::from_millis(20);

/// Interval between checks of the driver's transmit queue while flushing.
const DRAIN_POLL: Duration = Duration::from_millis(1);

/// Wait until `pending` reports an empty transmit queue, for at most `limit`.
fn drain_output(mut pending: impl FnMut() -> Result<u32>, limit: Duration) -> Result<()> {
    let deadline = Instant::now() + limit;
    loop {
        let queued = pending()?;
        if queued == 0 {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "{queued} bytes still queued for transmission after {limit:?}"
            )));
        }
        thread::sleep(DRAIN_POLL);
    }
}

#[derive(Default)]
struct RxState {
    buffer: VecDeque<u8>,
    stop: bool,
    failure: Option<String>,
}

#[derive(Default)]
struct RxShared {
    state: Mutex<RxState>,
    ready: Condvar,
}

impl RxShared {
    fn lock(&self) -> MutexGuard<'_, RxState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn SerialPort>>,
    reader: Option<JoinHandle<()>>,
    shared: Arc<RxShared>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
    parity: Parity,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    ///
    /// Any failure to open, including the port being held by another
    /// process, is reported as [`Error::LinkUnavailable`].
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let unavailable = |reason: String| Error::LinkUnavailable {
            port: config
                .port_name
                .clone(),
            reason,
        };

        let mut port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(config.parity.into())
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| unavailable(e.to_string()))?;

        port.write_data_terminal_ready(false)?;
        port.write_request_to_send(false)?;

        let mut reader = port
            .try_clone()
            .map_err(|e| unavailable(e.to_string()))?;
        reader.set_timeout(READER_POLL)?;

        let shared = Arc::new(RxShared::default());
        let handle = spawn_reader(reader, Arc::clone(&shared))?;

        debug!(
            "Opened {} at {} baud ({:?} parity)",
            config.port_name, config.baud_rate, config.parity
        );

        Ok(Self {
            port: Some(port),
            reader: Some(handle),
            shared,
            name: config
                .port_name
                .clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
            parity: config.parity,
        })
    }

    /// Current baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Current parity.
    pub fn parity(&self) -> Parity {
        self.parity
    }

    fn handle(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed").into())
    }

    fn stop_reader(&mut self) {
        self.shared
            .lock()
            .stop = true;
        self.shared
            .ready
            .notify_all();
        if let Some(handle) = self
            .reader
            .take()
        {
            let _ = handle.join();
        }
    }
}

fn spawn_reader(mut reader: Box<dyn SerialPort>, shared: Arc<RxShared>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("cortexflash-rx".to_string())
        .spawn(move || {
            let mut chunk = [0u8; 256];
            loop {
                if shared
                    .lock()
                    .stop
                {
                    break;
                }
                match reader.read(&mut chunk) {
                    Ok(0) => {},
                    Ok(n) => {
                        trace!("RX {:02X?}", &chunk[..n]);
                        shared
                            .lock()
                            .buffer
                            .extend(&chunk[..n]);
                        shared
                            .ready
                            .notify_all();
                    },
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut
                                | io::ErrorKind::WouldBlock
                                | io::ErrorKind::Interrupted
                        ) => {},
                    Err(e) => {
                        debug!("Serial reader stopped: {e}");
                        shared
                            .lock()
                            .failure = Some(e.to_string());
                        shared
                            .ready
                            .notify_all();
                        break;
                    },
                }
            }
        })?;
    Ok(handle)
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_params(&mut self, baud_rate: u32, parity: Parity) -> Result<()> {
        let name = self
            .name
            .clone();
        let unavailable = |e: serialport::Error| Error::LinkUnavailable {
            port: name.clone(),
            reason: e.to_string(),
        };
        let port = self.handle()?;
        port.set_baud_rate(baud_rate)
            .map_err(unavailable)?;
        port.set_parity(parity.into())
            .map_err(unavailable)?;
        trace!("Link set to {baud_rate} baud, {parity:?} parity");
        self.baud_rate = baud_rate;
        self.parity = parity;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.handle()?
            .set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        trace!("TX {data:02X?}");
        self.handle()?
            .write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let limit = self.timeout;
        let port = self.handle()?;
        drain_output(|| Ok(port.bytes_to_write()?), limit)
    }

    fn purge(&mut self) -> Result<()> {
        self.handle()?
            .clear(ClearBuffer::Input)?;
        self.shared
            .lock()
            .buffer
            .clear();
        Ok(())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if self
            .port
            .is_none()
        {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed").into());
        }

        let deadline = Instant::now() + self.timeout;
        let mut state = self.shared.lock();
        loop {
            if state
                .buffer
                .len()
                >= len
            {
                return Ok(state
                    .buffer
                    .drain(..len)
                    .collect());
            }
            if let Some(reason) = &state.failure {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, reason.clone()).into());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "expected {len} bytes, received {}",
                    state
                        .buffer
                        .len()
                )));
            }
            state = match self
                .shared
                .ready
                .wait_timeout(state, deadline - now)
            {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned
                    .into_inner()
                    .0,
            };
        }
    }

    fn close(&mut self) -> Result<()> {
        self.stop_reader();
        if self
            .port
            .take()
            .is_some()
        {
            debug!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}
