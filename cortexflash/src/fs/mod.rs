//! Page-based file system in the flash beyond the program image.
//!
//! Files start on a page boundary with a [`FileHeader`] and run contiguously
//! for as many pages as header plus payload need. Nothing is cached between
//! operations: each lookup or placement rescans the page headers, filling a
//! [`PageBitmap`] of free pages along the way.
//!
//! ```text
//! flash_start            flash_start + fs_start                  flash_end
//! |  program image ...   | page 0 | page 1 | page 2 | ... | last |
//!                        | LOG ...         | free   | CFG  |
//! ```

pub mod bitmap;
pub mod header;

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};

pub use {
    bitmap::PageBitmap,
    header::{FILE_MAGIC, FileHeader, HEADER_SIZE, NAME_LEN, STATUS_TRIMMED, truncate_name},
};
use crate::{
    error::{Error, Result},
    port::Port,
    progress::{NoOpProgress, PercentReporter, ProgressCallback, percent},
    protocol::{
        encoding::delay,
        stm32::{ERASABLE_PAGES, MAX_TRANSFER, Session, Versioned},
    },
    target::chip::{CortexConfig, DeviceDescriptor, LinkTiming},
};

/// Bytes per write command while streaming data.
pub const WRITE_CHUNK: usize = MAX_TRANSFER;

/// Bytes per read command while streaming data.
pub const READ_CHUNK: usize = 32;

/// Erased flash value, used to pad the last write chunk.
pub const ERASED_BYTE: u8 = 0xFF;

/// Flash operations the file system is built on.
///
/// [`Session`] implements this directly; the flasher wraps a session to
/// replace [`recover`](FlashMemory::recover) with a full reconnect.
pub trait FlashMemory {
    /// Geometry of the identified device.
    fn device(&self) -> Result<&'static DeviceDescriptor>;

    /// Read `len` bytes (1 to 256) at an absolute address.
    fn read(&mut self, address: u32, len: usize) -> Result<Vec<u8>>;

    /// Write one chunk at an absolute address.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Erase pages, numbered from the start of flash.
    fn erase(&mut self, pages: &[u32]) -> Result<()>;

    /// Current read timeout.
    fn timeout(&self) -> Duration;

    /// Change the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Try to bring the link back after a failed command.
    fn recover(&mut self) -> Result<()>;
}

impl<P: Port + ?Sized> FlashMemory for Session<'_, P, Versioned> {
    fn device(&self) -> Result<&'static DeviceDescriptor> {
        Session::device(self)
    }

    fn read(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.read_memory(address, len)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.write_memory(address, data)
    }

    fn erase(&mut self, pages: &[u32]) -> Result<()> {
        self.erase_pages(pages)
    }

    fn timeout(&self) -> Duration {
        self.port()
            .timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port_mut()
            .set_timeout(timeout)
    }

    fn recover(&mut self) -> Result<()> {
        self.port_mut()
            .purge()
    }
}

/// A stored file found by scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// First page, relative to the file-system region.
    pub start_page: u32,
    /// Payload length in bytes.
    pub byte_count: u32,
    /// Pages covered by header and payload.
    pub page_span: u32,
    /// Stored name.
    pub name: String,
}

impl FileEntry {
    fn new(start_page: u32, byte_count: u32, name: String, page_size: u32) -> Self {
        let bytes = u64::from(byte_count) + HEADER_SIZE as u64;
        let span = bytes.div_ceil(u64::from(page_size));
        Self {
            start_page,
            byte_count,
            page_span: u32::try_from(span).unwrap_or(u32::MAX),
            name,
        }
    }

    /// First page after this file.
    pub fn end_page(&self) -> u32 {
        self.start_page
            .saturating_add(self.page_span)
    }
}

/// File-system view of an identified device.
pub struct FileSystem<'f, F: FlashMemory + ?Sized> {
    flash: &'f mut F,
    device: &'static DeviceDescriptor,
    fs_start: u32,
    last_page: u32,
    timing: LinkTiming,
}

impl<'f, F: FlashMemory + ?Sized> FileSystem<'f, F> {
    /// Open the file system region described by `config`.
    ///
    /// The region ends at the flash end or at the last page ER can address,
    /// whichever comes first.
    ///
    /// Fails with [`Error::Precondition`] if the device has not been identified
    /// or the region does not start on a page boundary.
    pub fn new(flash: &'f mut F, config: &CortexConfig) -> Result<Self> {
        let device = flash.device()?;
        config.check_fs_start(device)?;
        let fs_start = config
            .fs_start
            .min(device.flash_size());
        let first_page = fs_start / device.page_size;
        let last_page = ((device.flash_size() - fs_start) / device.page_size)
            .min(ERASABLE_PAGES.saturating_sub(first_page));
        debug!(
            "File system at {:#010x}, {last_page} pages of {} bytes",
            device.flash_start + fs_start,
            device.page_size
        );
        Ok(Self {
            flash,
            device,
            fs_start,
            last_page,
            timing: config.timing,
        })
    }

    /// Number of pages in the file-system region.
    pub fn last_page(&self) -> u32 {
        self.last_page
    }

    /// Device the file system lives on.
    pub fn device(&self) -> &'static DeviceDescriptor {
        self.device
    }

    /// First flash page of the file-system region.
    pub fn first_flash_page(&self) -> u32 {
        self.fs_start / self.device.page_size
    }

    fn page_address(&self, page: u32) -> u32 {
        self.device.flash_start + self.fs_start + page * self.device.page_size
    }

    /// Every stored file, in page order.
    pub fn list(&mut self) -> Result<Vec<FileEntry>> {
        let mut files = Vec::new();
        let mut next = 0;
        while let Some(entry) = self.next_file(next, None)? {
            next = entry.end_page();
            files.push(entry);
        }
        Ok(files)
    }

    /// Find a file by name (case-sensitive, first eight bytes).
    pub fn find(&mut self, name: &str) -> Result<Option<FileEntry>> {
        self.look_for(name, None)
    }

    /// Store `data` as `name`, replacing any file of the same name.
    ///
    /// Placement is decided before anything is erased, so a file that does
    /// not fit leaves the device unchanged.
    pub fn download(
        &mut self,
        name: &str,
        data: &[u8],
        progress: &mut dyn ProgressCallback,
    ) -> Result<FileEntry> {
        let length = u32::try_from(data.len()).map_err(|_| Error::InsufficientSpace {
            required: data.len(),
            available: self.device.flash_size() as usize,
        })?;
        let required = data.len() + HEADER_SIZE;
        let page_size = self.device.page_size;

        let mut bitmap = PageBitmap::occupied(self.last_page);
        let existing = self.look_for(name, Some(&mut bitmap))?;
        if let Some(old) = &existing {
            bitmap.clear_range(old.start_page, old.end_page());
        }

        let Some(start) = bitmap.first_fit(required, page_size) else {
            return Err(Error::InsufficientSpace {
                required,
                available: bitmap.largest_free_run(page_size),
            });
        };

        if let Some(old) = existing {
            info!(
                "Replacing {} ({} bytes at page {})",
                old.name, old.byte_count, old.start_page
            );
            let first = self.first_flash_page() + old.start_page;
            let last = first + old.page_span.min(self.last_page - old.start_page) - 1;
            self.erase_range(first, last)?;
        }

        let header = FileHeader::new(name, length);
        info!(
            "Storing {} ({} bytes) at page {start}",
            header.name(),
            data.len()
        );
        self.write_data(
            self.fs_start + start * page_size,
            Some(&header.to_bytes()),
            data,
            progress,
        )?;
        Ok(FileEntry::new(start, length, header.name(), page_size))
    }

    /// Read the payload of a stored file.
    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find(name)?
            .ok_or_else(|| Error::FileNotFound(truncate_name(name).to_string()))?;
        self.read_entry(&entry, &mut NoOpProgress)
    }

    /// Copy a stored file into `dir`, returning the path written.
    pub fn upload(&mut self, name: &str, dir: &Path) -> Result<PathBuf> {
        let entry = self
            .find(name)?
            .ok_or_else(|| Error::FileNotFound(truncate_name(name).to_string()))?;
        self.export(&entry, dir)
    }

    /// Copy every stored file into `dir`.
    pub fn upload_all(
        &mut self,
        dir: &Path,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Vec<PathBuf>> {
        progress.begin();
        let result = self.export_all(dir, progress);
        progress.end();
        result
    }

    fn export_all(
        &mut self,
        dir: &Path,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Vec<PathBuf>> {
        let mut reporter = PercentReporter::new();
        let mut written = Vec::new();
        let mut next = 0;
        reporter.report(progress, 0);
        while let Some(entry) = self.next_file(next, None)? {
            written.push(self.export(&entry, dir)?);
            progress.message(&entry.name);
            reporter.report(
                progress,
                percent(entry.start_page as usize, self.last_page as usize),
            );
            next = entry.end_page();
        }
        reporter.report(progress, 100);
        Ok(written)
    }

    fn export(&mut self, entry: &FileEntry, dir: &Path) -> Result<PathBuf> {
        let payload = self.read_entry(entry, &mut NoOpProgress)?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(local_file_name(&entry.name));
        std::fs::write(&path, payload)?;
        debug!("Exported {} to {}", entry.name, path.display());
        Ok(path)
    }

    fn read_entry(
        &mut self,
        entry: &FileEntry,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Vec<u8>> {
        let len = HEADER_SIZE + entry.byte_count as usize;
        let offset = self.fs_start + entry.start_page * self.device.page_size;
        let mut bytes = self.read_data(offset, len, progress)?;
        Ok(bytes.split_off(HEADER_SIZE))
    }

    /// Erase flash pages `first..=last`, numbered from the start of flash.
    ///
    /// The read timeout is raised to the erase timeout for the duration.
    pub fn erase_range(&mut self, first: u32, last: u32) -> Result<()> {
        if last < first {
            return Ok(());
        }
        debug!("Erasing flash pages {first}..={last}");
        let pages: Vec<u32> = (first..=last).collect();
        let saved = self
            .flash
            .timeout();
        self.flash
            .set_timeout(self.timing.erase_timeout)?;
        let result = self
            .flash
            .erase(&pages);
        let restored = self
            .flash
            .set_timeout(saved);
        result.and(restored)
    }

    /// Stream `preamble` followed by `data` into flash at `offset` from the
    /// start of flash, in 256-byte write commands.
    ///
    /// The final chunk is padded with 0xFF. A chunk that fails on the link is
    /// retried once after [`FlashMemory::recover`].
    pub fn write_data(
        &mut self,
        offset: u32,
        preamble: Option<&[u8]>,
        data: &[u8],
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        let image: Cow<'_, [u8]> = match preamble {
            Some(head) => Cow::Owned([head, data].concat()),
            None => Cow::Borrowed(data),
        };
        let size = image.len();
        let flash_size = self.device.flash_size() as usize;
        let room = flash_size.saturating_sub(offset as usize);
        if size >= flash_size || size > room {
            return Err(Error::InsufficientSpace {
                required: size,
                available: room,
            });
        }

        progress.begin();
        let result = self.stream_write(offset, &image, progress);
        progress.end();
        result
    }

    fn stream_write(
        &mut self,
        offset: u32,
        image: &[u8],
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        let base = self.device.flash_start + offset;
        let mut reporter = PercentReporter::new();
        let mut written = 0usize;
        let mut chunk = [ERASED_BYTE; WRITE_CHUNK];

        reporter.report(progress, 0);
        for piece in image.chunks(WRITE_CHUNK) {
            chunk[..piece.len()].copy_from_slice(piece);
            chunk[piece.len()..].fill(ERASED_BYTE);
            self.write_chunk(base + written as u32, &chunk)?;
            written += piece.len();
            reporter.report(progress, percent(written, image.len()));
        }
        Ok(())
    }

    fn write_chunk(&mut self, address: u32, chunk: &[u8]) -> Result<()> {
        let result = match self
            .flash
            .write(address, chunk)
        {
            Err(e) if e.is_link_failure() => {
                warn!("Write at {address:#010x} failed: {e}; reconnecting");
                delay(self.timing.reconnect_delay);
                self.flash
                    .recover()
                    .and_then(|()| {
                        self.flash
                            .write(address, chunk)
                    })
                    .map_err(|source| Error::TransferInterrupted {
                        address,
                        source: Box::new(source),
                    })
            },
            other => other,
        };
        delay(self.timing.chunk_delay);
        result
    }

    /// Read `len` bytes at `offset` from the start of flash, in 32-byte
    /// read commands, with the same single retry as [`write_data`](Self::write_data).
    pub fn read_data(
        &mut self,
        offset: u32,
        len: usize,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Vec<u8>> {
        progress.begin();
        let result = self.stream_read(self.device.flash_start + offset, len, progress);
        progress.end();
        result
    }

    fn stream_read(
        &mut self,
        base: u32,
        len: usize,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Vec<u8>> {
        let mut reporter = PercentReporter::new();
        let mut data = Vec::with_capacity(len);
        reporter.report(progress, 0);
        while data.len() < len {
            let want = READ_CHUNK.min(len - data.len());
            let chunk = self.read_chunk(base + data.len() as u32, want)?;
            data.extend_from_slice(&chunk);
            reporter.report(progress, percent(data.len(), len));
        }
        Ok(data)
    }

    fn read_chunk(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        let result = match self
            .flash
            .read(address, len)
        {
            Err(e) if e.is_link_failure() => {
                warn!("Read at {address:#010x} failed: {e}; reconnecting");
                delay(self.timing.reconnect_delay);
                self.flash
                    .recover()
                    .and_then(|()| {
                        self.flash
                            .read(address, len)
                    })
                    .map_err(|source| Error::TransferInterrupted {
                        address,
                        source: Box::new(source),
                    })
            },
            other => other,
        };
        delay(self.timing.chunk_delay);
        result
    }

    /// Scan from page `from` for the next live file.
    ///
    /// When `bitmap` is given, every visited page is recorded: erased pages
    /// as free, anything else as occupied. Pages inside a file are skipped
    /// and keep whatever the bitmap already held.
    fn next_file(
        &mut self,
        from: u32,
        mut bitmap: Option<&mut PageBitmap>,
    ) -> Result<Option<FileEntry>> {
        let page_size = self.device.page_size;
        let flash_size = self.device.flash_size();
        let mut page = from;
        while page < self.last_page {
            let raw = self.read_chunk(self.page_address(page), HEADER_SIZE)?;
            let header = FileHeader::parse(&raw)?;

            if let Some(map) = bitmap.as_deref_mut() {
                if header.is_erased() {
                    map.clear(page);
                } else {
                    map.set(page);
                }
            }

            if header.is_file() {
                let entry = FileEntry::new(page, header.length, header.name(), page_size);
                if header.is_live() && header.length < flash_size {
                    return Ok(Some(entry));
                }
                debug!(
                    "Skipping {} page(s) of {} file {} at page {page}",
                    entry.page_span,
                    if header.is_live() { "oversized" } else { "trimmed" },
                    entry.name
                );
                page = page
                    .saturating_add(entry.page_span)
                    .max(page + 1);
                continue;
            }
            page += 1;
        }
        Ok(None)
    }

    fn look_for(
        &mut self,
        name: &str,
        mut bitmap: Option<&mut PageBitmap>,
    ) -> Result<Option<FileEntry>> {
        let wanted = truncate_name(name);
        let mut found = None;
        let mut next = 0;
        while let Some(entry) = self.next_file(next, bitmap.as_deref_mut())? {
            next = entry.end_page();
            if found.is_none() && entry.name == wanted {
                found = Some(entry);
                if bitmap.is_none() {
                    break;
                }
            }
        }
        Ok(found)
    }
}

/// File name to use on the local computer for a stored file.
fn local_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{cleaned}"),
        _ => cleaned,
    }
}
