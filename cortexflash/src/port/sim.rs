//! Simulated Cortex for tests.
//!
//! Models both sides of the link: with no parity the bytes go to the VEXnet
//! link layer (system info, bootload trigger, terminal mode), with even
//! parity they go to the STM32 ROM bootloader once it is running, or to the
//! user program otherwise. Replies are queued synchronously, so reads never
//! wait: a read that asks for more than is queued times out at once.

use std::{collections::VecDeque, io, time::Duration};

use crate::{
    error::{Error, Result},
    port::{Parity, Port},
    protocol::{
        encoding::{checksum, decode_address},
        stm32::{ACK, Command, NACK, SYNC},
    },
    target::{
        chip::DeviceDescriptor,
        cortex::link::{BOOTLOAD, STOP_USER_CODE, SYSINFO, TERMINAL_MODE},
    },
};

/// Bootloader version reported by GET and GVR.
const BOOTLOADER_VERSION: u8 = 0x22;

/// Length of the system information reply.
const SYSINFO_REPLY: [u8; 14] = [0x4A, 0x59, 0x02, 0x0A, 0x00, 0x7E, 0x00, 0x00, 0x96, 0x00, 0x00, 0x00, 0x00, 0x00];

/// One-shot misbehaviour, consumed when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Answer NACK to the next command with this opcode.
    NackOpcode(u8),
    /// Swallow the next WM address frame for this address without replying.
    DropWrite(u32),
    /// Swallow the next RD address frame for this address without replying.
    DropRead(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    UserCode,
    Bootloader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressFor {
    Read,
    Write,
    Go,
}

#[derive(Debug)]
enum Expect {
    Opcode,
    Complement(u8),
    Address(AddressFor, Vec<u8>),
    ReadLength(u32, Vec<u8>),
    WriteData(u32, Vec<u8>),
    EraseArgs(Vec<u8>),
    ProtectList(Vec<u8>),
}

/// In-memory Cortex behind a [`Port`].
#[derive(Debug)]
pub(crate) struct SimulatedCortex {
    device: &'static DeviceDescriptor,
    reported_pid: u16,
    ack_byte: u8,
    silent: bool,
    write_latency: Duration,
    flash: Vec<u8>,
    mode: Mode,
    synced: bool,
    expect: Expect,
    parity: Parity,
    baud_rate: u32,
    timeout: Duration,
    max_timeout: Duration,
    rx: VecDeque<u8>,
    link_bytes: Vec<u8>,
    user_bytes: Vec<u8>,
    faults: Vec<Fault>,
    closed: bool,
    purges: usize,
    stop_sequences: usize,
    sysinfo_queries: usize,
    bootload_triggers: usize,
    terminal_resets: usize,
    written: Vec<(u32, usize)>,
    erase_batches: Vec<Vec<u8>>,
    global_erases: usize,
    protected: Vec<u8>,
    jumped_to: Option<u32>,
}

impl SimulatedCortex {
    /// A powered Cortex running user code, with erased flash.
    ///
    /// # Panics
    ///
    /// Panics if `product_id` is not in the device table.
    pub(crate) fn new(product_id: u16) -> Self {
        let device = DeviceDescriptor::lookup(product_id).expect("simulated device must be known");
        Self {
            device,
            reported_pid: product_id,
            ack_byte: ACK,
            silent: false,
            write_latency: Duration::ZERO,
            flash: vec![0xFF; device.flash_size() as usize],
            mode: Mode::UserCode,
            synced: false,
            expect: Expect::Opcode,
            parity: Parity::None,
            baud_rate: 115_200,
            timeout: Duration::from_millis(700),
            max_timeout: Duration::from_millis(700),
            rx: VecDeque::new(),
            link_bytes: Vec::new(),
            user_bytes: Vec::new(),
            faults: Vec::new(),
            closed: false,
            purges: 0,
            stop_sequences: 0,
            sysinfo_queries: 0,
            bootload_triggers: 0,
            terminal_resets: 0,
            written: Vec::new(),
            erase_batches: Vec::new(),
            global_erases: 0,
            protected: Vec::new(),
            jumped_to: None,
        }
    }

    /// Report a different product id through GID.
    pub(crate) fn with_reported_pid(mut self, pid: u16) -> Self {
        self.reported_pid = pid;
        self
    }

    /// Use `byte` wherever ACK would be sent.
    pub(crate) fn with_ack_byte(mut self, byte: u8) -> Self {
        self.ack_byte = byte;
        self
    }

    /// Sleep this long in every write.
    pub(crate) fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Never answer anything, as if powered off.
    pub(crate) fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Put the device straight into the bootloader with even parity.
    pub(crate) fn enter_bootloader(&mut self) {
        self.mode = Mode::Bootloader;
        self.parity = Parity::Even;
        self.synced = false;
        self.expect = Expect::Opcode;
    }

    /// Arm a one-shot fault.
    pub(crate) fn inject(&mut self, fault: Fault) {
        self.faults
            .push(fault);
    }

    /// Overwrite flash directly.
    pub(crate) fn fill_flash(&mut self, address: u32, data: &[u8]) {
        let start = (address - self.device.flash_start) as usize;
        self.flash[start..start + data.len()].copy_from_slice(data);
    }

    /// Copy of flash contents.
    pub(crate) fn flash_at(&self, address: u32, len: usize) -> Vec<u8> {
        let start = (address - self.device.flash_start) as usize;
        self.flash[start..start + len].to_vec()
    }

    /// Address and length of every accepted WM, in order.
    pub(crate) fn written_chunks(&self) -> Vec<(u32, usize)> {
        self.written
            .clone()
    }

    /// Page numbers of every selective erase, one entry per command.
    pub(crate) fn erase_batches(&self) -> Vec<Vec<u8>> {
        self.erase_batches
            .clone()
    }

    pub(crate) fn global_erases(&self) -> usize {
        self.global_erases
    }

    pub(crate) fn protected_sectors(&self) -> Vec<u8> {
        self.protected
            .clone()
    }

    /// Target of the last GO.
    pub(crate) fn jumped_to(&self) -> Option<u32> {
        self.jumped_to
    }

    pub(crate) fn stop_sequences(&self) -> usize {
        self.stop_sequences
    }

    pub(crate) fn sysinfo_queries(&self) -> usize {
        self.sysinfo_queries
    }

    pub(crate) fn bootload_triggers(&self) -> usize {
        self.bootload_triggers
    }

    pub(crate) fn terminal_resets(&self) -> usize {
        self.terminal_resets
    }

    pub(crate) fn purges(&self) -> usize {
        self.purges
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn parity(&self) -> Parity {
        self.parity
    }

    /// Longest read timeout ever configured.
    pub(crate) fn max_timeout_seen(&self) -> Duration {
        self.max_timeout
    }

    fn reply(&mut self, bytes: &[u8]) {
        if !self.silent {
            self.rx
                .extend(bytes);
        }
    }

    fn ack(&mut self) {
        self.reply(&[self.ack_byte]);
    }

    fn nack(&mut self) {
        self.reply(&[NACK]);
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        match self
            .faults
            .iter()
            .position(|&f| f == fault)
        {
            Some(index) => {
                self.faults
                    .remove(index);
                true
            },
            None => false,
        }
    }

    fn offset_of(&self, address: u32, len: usize) -> Option<usize> {
        let start = address.checked_sub(self.device.flash_start)? as usize;
        (start + len <= self.flash.len()).then_some(start)
    }

    fn erase_page(&mut self, page: u32) {
        let size = self.device.page_size as usize;
        let start = page as usize * size;
        if let Some(range) = self
            .flash
            .get_mut(start..start + size)
        {
            range.fill(0xFF);
        }
    }

    fn link_byte(&mut self, byte: u8) {
        if byte == TERMINAL_MODE {
            self.terminal_resets += 1;
            self.link_bytes
                .clear();
            return;
        }
        self.link_bytes
            .push(byte);
        if self
            .link_bytes
            .ends_with(&SYSINFO)
        {
            self.sysinfo_queries += 1;
            self.link_bytes
                .clear();
            self.reply(&SYSINFO_REPLY);
        } else if self
            .link_bytes
            .ends_with(&BOOTLOAD)
        {
            self.bootload_triggers += 1;
            self.link_bytes
                .clear();
            self.mode = Mode::Bootloader;
            self.synced = false;
            self.expect = Expect::Opcode;
        }
    }

    fn user_byte(&mut self, byte: u8) {
        self.user_bytes
            .push(byte);
        if self
            .user_bytes
            .ends_with(&STOP_USER_CODE)
        {
            self.stop_sequences += 1;
            self.user_bytes
                .clear();
        }
    }

    fn bootloader_byte(&mut self, byte: u8) {
        let expect = std::mem::replace(&mut self.expect, Expect::Opcode);
        self.expect = match expect {
            Expect::Opcode if byte == SYNC => {
                if self.synced {
                    self.nack();
                } else {
                    self.synced = true;
                    self.ack();
                }
                Expect::Opcode
            },
            Expect::Opcode => Expect::Complement(byte),
            Expect::Complement(opcode) => {
                self.synced = true;
                if byte != !opcode || self.take_fault(Fault::NackOpcode(opcode)) {
                    self.nack();
                    Expect::Opcode
                } else {
                    self.command(opcode)
                }
            },
            Expect::Address(purpose, mut frame) => {
                frame.push(byte);
                if frame.len() < 5 {
                    Expect::Address(purpose, frame)
                } else {
                    self.address(purpose, &frame)
                }
            },
            Expect::ReadLength(address, mut frame) => {
                frame.push(byte);
                if frame.len() < 2 {
                    Expect::ReadLength(address, frame)
                } else {
                    self.read(address, frame[0], frame[1]);
                    Expect::Opcode
                }
            },
            Expect::WriteData(address, mut frame) => {
                frame.push(byte);
                if frame.len() < usize::from(frame[0]) + 3 {
                    Expect::WriteData(address, frame)
                } else {
                    self.write(address, &frame);
                    Expect::Opcode
                }
            },
            Expect::EraseArgs(mut frame) => {
                frame.push(byte);
                let needed = if frame[0] == 0xFF { 2 } else { usize::from(frame[0]) + 3 };
                if frame.len() < needed {
                    Expect::EraseArgs(frame)
                } else {
                    self.erase(&frame);
                    Expect::Opcode
                }
            },
            Expect::ProtectList(mut frame) => {
                frame.push(byte);
                if frame.len() < usize::from(frame[0]) + 3 {
                    Expect::ProtectList(frame)
                } else {
                    let (items, check) = split_list(&frame);
                    if check {
                        self.protected
                            .extend_from_slice(items);
                        self.ack();
                    } else {
                        self.nack();
                    }
                    Expect::Opcode
                }
            },
        };
    }

    fn command(&mut self, opcode: u8) -> Expect {
        let standard = |command: Command| command.standard_opcode();
        match opcode {
            0x00 => {
                self.ack();
                let mut frame = vec![11, BOOTLOADER_VERSION, 0x00];
                frame.extend(Command::ALL.map(Command::standard_opcode));
                self.reply(&frame);
                self.ack();
                Expect::Opcode
            },
            op if op == standard(Command::GetVersion) => {
                self.ack();
                self.reply(&[BOOTLOADER_VERSION, 0x00, 0x00]);
                self.ack();
                Expect::Opcode
            },
            op if op == standard(Command::GetId) => {
                self.ack();
                let [hi, lo] = self
                    .reported_pid
                    .to_be_bytes();
                self.reply(&[1, hi, lo]);
                self.ack();
                Expect::Opcode
            },
            op if op == standard(Command::ReadMemory) => {
                self.ack();
                Expect::Address(AddressFor::Read, Vec::new())
            },
            op if op == standard(Command::Go) => {
                self.ack();
                Expect::Address(AddressFor::Go, Vec::new())
            },
            op if op == standard(Command::WriteMemory) => {
                self.ack();
                Expect::Address(AddressFor::Write, Vec::new())
            },
            op if op == standard(Command::Erase) => {
                self.ack();
                Expect::EraseArgs(Vec::new())
            },
            op if op == standard(Command::WriteProtect) => {
                self.ack();
                Expect::ProtectList(Vec::new())
            },
            op if op == standard(Command::WriteUnprotect) => {
                self.ack();
                self.protected
                    .clear();
                self.ack();
                Expect::Opcode
            },
            op if op == standard(Command::ReadoutProtect) => {
                self.ack();
                self.ack();
                self.synced = false;
                Expect::Opcode
            },
            op if op == standard(Command::ReadoutUnprotect) => {
                self.ack();
                self.flash
                    .fill(0xFF);
                self.ack();
                self.synced = false;
                Expect::Opcode
            },
            _ => {
                self.nack();
                Expect::Opcode
            },
        }
    }

    fn address(&mut self, purpose: AddressFor, frame: &[u8]) -> Expect {
        let Some(address) = frame
            .try_into()
            .ok()
            .and_then(decode_address)
        else {
            self.nack();
            return Expect::Opcode;
        };
        match purpose {
            AddressFor::Read if self.take_fault(Fault::DropRead(address)) => Expect::Opcode,
            AddressFor::Write if self.take_fault(Fault::DropWrite(address)) => Expect::Opcode,
            AddressFor::Read => {
                self.ack();
                Expect::ReadLength(address, Vec::new())
            },
            AddressFor::Write => {
                self.ack();
                Expect::WriteData(address, Vec::new())
            },
            AddressFor::Go => {
                self.ack();
                self.jumped_to = Some(address);
                self.mode = Mode::UserCode;
                self.user_bytes
                    .clear();
                Expect::Opcode
            },
        }
    }

    fn read(&mut self, address: u32, n: u8, complement: u8) {
        let len = usize::from(n) + 1;
        match self.offset_of(address, len) {
            Some(start) if complement == !n => {
                self.ack();
                let data = self.flash[start..start + len].to_vec();
                self.reply(&data);
            },
            _ => self.nack(),
        }
    }

    fn write(&mut self, address: u32, frame: &[u8]) {
        let (data, check) = split_list(frame);
        match self.offset_of(address, data.len()) {
            Some(start) if check => {
                for (cell, byte) in self.flash[start..start + data.len()]
                    .iter_mut()
                    .zip(data)
                {
                    *cell &= byte;
                }
                self.written
                    .push((address, data.len()));
                self.ack();
            },
            _ => self.nack(),
        }
    }

    fn erase(&mut self, frame: &[u8]) {
        if frame[0] == 0xFF {
            if frame[1] == 0x00 {
                self.flash
                    .fill(0xFF);
                self.global_erases += 1;
                self.ack();
            } else {
                self.nack();
            }
            return;
        }
        let (pages, check) = split_list(frame);
        if !check {
            self.nack();
            return;
        }
        let pages = pages.to_vec();
        for &page in &pages {
            self.erase_page(u32::from(page));
        }
        self.erase_batches
            .push(pages);
        self.ack();
    }
}

/// Split `[n, items.., xor]` into the items and whether the checksum holds.
fn split_list(frame: &[u8]) -> (&[u8], bool) {
    let n = frame[0];
    let items = &frame[1..frame.len() - 1];
    let check = frame[frame.len() - 1];
    (items, checksum(n, items) == check)
}

impl Port for SimulatedCortex {
    fn name(&self) -> &str {
        "sim"
    }

    fn set_params(&mut self, baud_rate: u32, parity: Parity) -> Result<()> {
        self.baud_rate = baud_rate;
        self.parity = parity;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.max_timeout = self
            .max_timeout
            .max(timeout);
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Io(io::Error::from(io::ErrorKind::NotConnected)));
        }
        if !self
            .write_latency
            .is_zero()
        {
            std::thread::sleep(self.write_latency);
        }
        for &byte in data {
            match (self.parity, self.mode) {
                (Parity::Even, Mode::Bootloader) => self.bootloader_byte(byte),
                (Parity::Even, Mode::UserCode) => self.user_byte(byte),
                (Parity::None, _) => self.link_byte(byte),
                (Parity::Odd, _) => {},
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn purge(&mut self) -> Result<()> {
        self.purges += 1;
        self.rx
            .clear();
        Ok(())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::Io(io::Error::from(io::ErrorKind::NotConnected)));
        }
        if self.rx.len() < len {
            return Err(Error::Timeout(format!(
                "expected {len} bytes, {} available",
                self.rx.len()
            )));
        }
        Ok(self
            .rx
            .drain(..len)
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_layer_sequences() {
        let mut sim = SimulatedCortex::new(0x414);
        sim.write_bytes(&SYSINFO)
            .unwrap();
        assert_eq!(
            sim.read_bytes(14)
                .unwrap()
                .len(),
            14
        );
        sim.write_bytes(&BOOTLOAD)
            .unwrap();
        sim.write_bytes(&[TERMINAL_MODE])
            .unwrap();
        assert_eq!(sim.sysinfo_queries(), 1);
        assert_eq!(sim.bootload_triggers(), 1);
        assert_eq!(sim.terminal_resets(), 1);
    }

    #[test]
    fn test_sync_then_nack_when_synced() {
        let mut sim = SimulatedCortex::new(0x414);
        sim.enter_bootloader();
        sim.write_bytes(&[SYNC, SYNC])
            .unwrap();
        assert_eq!(
            sim.read_bytes(2)
                .unwrap(),
            vec![ACK, NACK]
        );
    }

    #[test]
    fn test_short_read_times_out_and_keeps_bytes() {
        let mut sim = SimulatedCortex::new(0x414);
        sim.enter_bootloader();
        sim.write_bytes(&[SYNC])
            .unwrap();
        assert!(matches!(sim.read_bytes(2), Err(Error::Timeout(_))));
        assert_eq!(
            sim.read_byte()
                .unwrap(),
            ACK
        );
    }

    #[test]
    fn test_stop_user_code_in_user_mode() {
        let mut sim = SimulatedCortex::new(0x414);
        sim.set_params(115_200, Parity::Even)
            .unwrap();
        sim.write_bytes(&STOP_USER_CODE)
            .unwrap();
        assert_eq!(sim.stop_sequences(), 1);
        assert_eq!(sim.parity(), Parity::Even);
    }
}
