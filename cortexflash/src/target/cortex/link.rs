//! VEXnet link-layer control.
//!
//! Before the STM32 bootloader can be reached, the joystick or programming
//! kit in front of the Cortex has to be told to stop the user program and
//! to reset the Cortex into its ROM bootloader. These messages travel with
//! no parity; the bootloader itself talks even parity.

use std::time::Instant;

use log::{debug, trace};

use crate::{
    error::{Error, Result},
    port::{Parity, Port},
    protocol::encoding::delay,
    target::chip::CortexConfig,
};

/// Stops the running user program and returns the Cortex to its firmware.
pub const STOP_USER_CODE: [u8; 11] = [
    0x0F, 0x0F, 0x21, 0xDE, 0x08, 0x00, 0x00, 0x00, 0x08, 0xF1, 0x04,
];

/// Asks the link for system information.
pub const SYSINFO: [u8; 5] = [0xC9, 0x36, 0xB8, 0x47, 0x21];

/// Resets the Cortex into the STM32 bootloader.
pub const BOOTLOAD: [u8; 5] = [0xC9, 0x36, 0xB8, 0x47, 0x25];

/// Returns the link to terminal mode.
pub const TERMINAL_MODE: u8 = 0x14;

/// Length of the system information reply.
pub const SYSINFO_REPLY_LEN: usize = 14;

/// Times the bootload trigger is sent.
pub const BOOTLOAD_REPEAT: usize = 5;

fn not_responding(detail: impl std::fmt::Display) -> Error {
    Error::NotResponding(format!(
        "VEX joystick or tethered Cortex is not responding ({detail})"
    ))
}

fn switch_parity<P: Port + ?Sized>(port: &mut P, baud: u32, parity: Parity) -> Result<()> {
    port.flush()?;
    port.set_params(baud, parity)?;
    port.purge()
}

/// Drain output, switch to the link layer's 8N1 and drop stale input.
pub fn parity_none<P: Port + ?Sized>(port: &mut P, config: &CortexConfig) -> Result<()> {
    switch_parity(port, config.baud_rate, Parity::None)
}

/// Drain output, switch to the bootloader's 8E1 and drop stale input.
pub fn parity_stm<P: Port + ?Sized>(port: &mut P, config: &CortexConfig) -> Result<()> {
    switch_parity(port, config.baud_rate, Parity::Even)
}

/// Send the stop-user-code sequence one byte at a time.
///
/// A stuck USB serial adapter can block in a write without ever reporting
/// an error, so any single byte taking longer than
/// [`LinkTiming::stop_byte_limit`](crate::target::chip::LinkTiming::stop_byte_limit)
/// fails the stage with [`Error::NotResponding`].
pub fn stop_user_code<P: Port + ?Sized>(port: &mut P, config: &CortexConfig) -> Result<()> {
    parity_stm(port, config)?;
    for &byte in &STOP_USER_CODE {
        let started = Instant::now();
        port.write_bytes(&[byte])
            .and_then(|()| port.flush())
            .map_err(not_responding)?;
        let elapsed = started.elapsed();
        if elapsed > config.timing.stop_byte_limit {
            return Err(not_responding(format!(
                "writing one byte took {} ms",
                elapsed.as_millis()
            )));
        }
        delay(config.timing.stop_byte_interval);
    }
    debug!("Stop-user-code sent");
    Ok(())
}

/// Query system information and return the raw reply.
pub fn query_system_info<P: Port + ?Sized>(
    port: &mut P,
    config: &CortexConfig,
) -> Result<Vec<u8>> {
    parity_none(port, config)?;
    port.write_bytes(&SYSINFO)
        .and_then(|()| port.flush())
        .map_err(not_responding)?;
    let reply = port
        .read_bytes(SYSINFO_REPLY_LEN)
        .map_err(not_responding)?;
    trace!("System information: {reply:02X?}");
    Ok(reply)
}

/// Send the bootload trigger [`BOOTLOAD_REPEAT`] times.
pub fn trigger_bootloader<P: Port + ?Sized>(port: &mut P, config: &CortexConfig) -> Result<()> {
    parity_none(port, config)?;
    for _ in 0..BOOTLOAD_REPEAT {
        port.write_bytes(&BOOTLOAD)
            .and_then(|()| port.flush())
            .map_err(|e| not_responding(format!("failed to initialize controller: {e}")))?;
        delay(config.timing.bootload_interval);
    }
    debug!("Bootload trigger sent {BOOTLOAD_REPEAT} times");
    Ok(())
}

/// Put the link back into terminal mode. Failures are logged and ignored.
pub fn restore_terminal<P: Port + ?Sized>(port: &mut P, config: &CortexConfig) {
    let result = parity_none(port, config)
        .and_then(|()| port.write_bytes(&[TERMINAL_MODE]))
        .and_then(|()| port.flush());
    if let Err(e) = result {
        debug!("Could not return link to terminal mode: {e}");
    }
}
