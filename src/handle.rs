//! Device handle.
//!
//! A [`DeviceHandle`] owns one open session on a storage media device. It
//! keeps its own read cursor, resolves the device geometry on first use and
//! clamps every read to the media size, so reading at or past the end of
//! the media returns no data rather than an error.

use crate::device::{Device, RawDevice};
use crate::error::{Error, Result};
use crate::error_ranges::{ErrorRange, ErrorRanges};
use crate::geometry::{resolve_geometry, Geometry};
use crate::media::{BusType, MediaInformation, MediaType, SectorRange, TableOfContents, Track};
use crate::notify::notify;
use crate::options::{AccessMode, Options, MAXIMUM_READ_SIZE};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Origin of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the media.
    Start,
    /// From the current offset.
    Current,
    /// From the end of the media.
    End,
}

impl TryFrom<i32> for Whence {
    type Error = Error;

    /// Convert a `SEEK_SET`, `SEEK_CUR` or `SEEK_END` value.
    fn try_from(whence: i32) -> Result<Self> {
        match whence {
            libc::SEEK_SET => Ok(Whence::Start),
            libc::SEEK_CUR => Ok(Whence::Current),
            libc::SEEK_END => Ok(Whence::End),
            _ => Err(Error::invalid_argument(format!(
                "unsupported whence: {}",
                whence
            ))),
        }
    }
}

/// Requests cancellation of reads on a [`DeviceHandle`].
///
/// The handle can be cloned and moved to another thread. The signal stays
/// set until the device handle is opened again.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Signal the device handle to abort the current read.
    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether an abort was signalled.
    pub fn is_signalled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// State that only exists while the handle is open.
struct Session {
    path: PathBuf,
    device: Box<dyn Device>,
    geometry: Option<Geometry>,
    media: Option<MediaInformation>,
    table_of_contents: Option<TableOfContents>,
    /// Position of the underlying device, if known.
    device_position: Option<u64>,
}

impl Session {
    fn geometry(&mut self) -> Result<Geometry> {
        if let Some(geometry) = self.geometry {
            return Ok(geometry);
        }
        let geometry = resolve_geometry(&mut self.device);
        // Size probing may have moved the device position.
        self.device_position = None;
        let geometry = geometry?;
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    fn media_information(&mut self) -> Result<&MediaInformation> {
        if self.media.is_none() {
            let information = self
                .device
                .query_media_information()
                .map_err(|e| Error::platform("unable to determine media information", e))?
                .unwrap_or_default();
            notify!(
                "media_information",
                "media type: {}, bus type: {}",
                information.media_type,
                information.bus_type
            );
            self.media = Some(information);
        }
        Ok(&*self.media.get_or_insert_with(MediaInformation::default))
    }

    fn table_of_contents(&mut self) -> Result<&TableOfContents> {
        if self.table_of_contents.is_none() {
            let toc = self
                .device
                .query_table_of_contents()
                .map_err(|e| Error::platform("unable to read table of contents", e))?
                .unwrap_or_default();
            notify!(
                "table_of_contents",
                "sessions: {}, tracks: {}",
                toc.sessions.len(),
                toc.tracks.len()
            );
            self.table_of_contents = Some(toc);
        }
        Ok(&*self
            .table_of_contents
            .get_or_insert_with(TableOfContents::default))
    }

    fn sync_position(&mut self, position: u64) -> Result<()> {
        if self.device_position != Some(position) {
            self.device
                .seek(position)
                .map_err(|e| Error::platform("unable to seek offset in device", e))?;
            self.device_position = Some(position);
        }
        Ok(())
    }
}

/// Handle to a storage media device opened for reading.
///
/// # Example
///
/// ```no_run
/// use smdev::{DeviceHandle, Whence};
///
/// let mut handle = DeviceHandle::new();
/// handle.open("/dev/sda").unwrap();
///
/// let size = handle.media_size().unwrap();
/// handle.seek(-512, Whence::End).unwrap();
/// let last_sector = handle.read(4096).unwrap();
/// assert_eq!(last_sector.len() as u64, size.min(512));
///
/// handle.close().unwrap();
/// ```
pub struct DeviceHandle {
    session: Option<Session>,
    cursor: u64,
    options: Options,
    errors: ErrorRanges,
    abort: AbortHandle,
}

impl Default for DeviceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.filename())
            .field("cursor", &self.cursor)
            .field(
                "geometry",
                &self.session.as_ref().and_then(|session| session.geometry),
            )
            .field("options", &self.options)
            .field("errors", &self.errors)
            .finish()
    }
}

impl DeviceHandle {
    /// Create a closed handle with default options.
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    /// Create a closed handle with the given options.
    pub fn with_options(options: Options) -> Self {
        Self {
            session: None,
            cursor: 0,
            options,
            errors: ErrorRanges::new(),
            abort: AbortHandle::default(),
        }
    }

    /// Options used by reads.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Replace the options. Takes effect with the next read, also while
    /// the handle is open.
    pub fn set_options(&mut self, options: Options) {
        self.options = options;
    }

    /// Whether the handle is open.
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Path of the open device.
    pub fn filename(&self) -> Option<&Path> {
        self.session.as_ref().map(|session| session.path.as_path())
    }

    /// Open the device at `path` for reading.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.open_with_mode(path, "r")
    }

    /// Open the device at `path` with the given access mode.
    ///
    /// Only the read mode (`"r"` or `"rb"`) is supported.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if `path` is empty or `mode` is not a read mode
    /// * [`Error::AlreadyOpen`] if the handle is already open
    /// * [`Error::Platform`] if the device could not be opened
    pub fn open_with_mode<P: AsRef<Path>>(&mut self, path: P, mode: &str) -> Result<()> {
        const FUNCTION: &str = "open";

        let path = validate_path(path.as_ref())?;
        let AccessMode::Read = mode.parse::<AccessMode>()?;
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let device = RawDevice::open(path).map_err(|e| Error::platform("unable to open device", e))?;
        if self.options.sequential_access {
            if let Err(e) = device.advise_sequential() {
                notify!(FUNCTION, "unable to set sequential access behavior: {}", e);
            }
        }
        self.start_session(path, Box::new(device));
        Ok(())
    }

    /// Open the handle on an already opened `device`.
    ///
    /// `path` only names the device; it is returned by [`filename`](Self::filename).
    pub fn open_device<P, D>(&mut self, path: P, device: D) -> Result<()>
    where
        P: AsRef<Path>,
        D: Device + 'static,
    {
        let path = validate_path(path.as_ref())?;
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }
        self.start_session(path, Box::new(device));
        Ok(())
    }

    fn start_session(&mut self, path: &Path, device: Box<dyn Device>) {
        notify!("open", "opened device: {}", path.display());
        self.cursor = 0;
        self.errors.clear();
        self.abort.clear();
        self.session = Some(Session {
            path: path.to_path_buf(),
            device,
            geometry: None,
            media: None,
            table_of_contents: None,
            device_position: None,
        });
    }

    /// Close the device.
    ///
    /// Releases the underlying device and clears the offset, the cached
    /// geometry and media information, and the recorded read errors.
    pub fn close(&mut self) -> Result<()> {
        let session = self.session.take().ok_or(Error::NotOpen)?;
        notify!("close", "closing device: {}", session.path.display());
        drop(session);
        self.cursor = 0;
        self.errors.clear();
        Ok(())
    }

    /// Signal the handle to abort the current read.
    ///
    /// Safe to call in any state. A read in progress, or the next read,
    /// fails with [`Error::Aborted`] until the handle is opened again.
    pub fn signal_abort(&self) {
        self.abort.signal();
    }

    /// Handle for signalling an abort from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(Error::NotOpen)
    }

    /// Geometry of the media, resolved on first use.
    pub fn geometry(&mut self) -> Result<Geometry> {
        self.session_mut()?.geometry()
    }

    /// Size of the media in bytes.
    pub fn media_size(&mut self) -> Result<u64> {
        Ok(self.geometry()?.media_size)
    }

    /// Logical sector size in bytes, if the device reports one.
    pub fn bytes_per_sector(&mut self) -> Result<Option<u32>> {
        Ok(self.geometry()?.bytes_per_sector)
    }

    /// Largest single transfer in bytes, if the device reports one.
    pub fn max_transfer_size(&mut self) -> Result<Option<u32>> {
        Ok(self.geometry()?.max_transfer_size)
    }

    /// Media type, bus type and identification strings of the device.
    ///
    /// Values the device does not report are unknown or `None`.
    pub fn media_information(&mut self) -> Result<MediaInformation> {
        self.session_mut()?.media_information().cloned()
    }

    /// Kind of media behind the device.
    pub fn media_type(&mut self) -> Result<MediaType> {
        Ok(self.session_mut()?.media_information()?.media_type)
    }

    /// Bus the device is attached to.
    pub fn bus_type(&mut self) -> Result<BusType> {
        Ok(self.session_mut()?.media_information()?.bus_type)
    }

    /// Identification string named `identifier`: `"vendor"`, `"model"` or
    /// `"serial_number"`.
    ///
    /// Returns `None` for unknown identifiers and values the device does not
    /// report.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if `identifier` is empty
    /// * [`Error::NotOpen`] if the handle is closed
    pub fn information_value(&mut self, identifier: &str) -> Result<Option<String>> {
        if identifier.is_empty() {
            return Err(Error::invalid_argument("empty information value identifier"));
        }
        let information = self.session_mut()?.media_information()?;
        Ok(information.value(identifier).map(str::to_string))
    }

    /// Number of sessions on an optical disc; 0 for other media.
    pub fn number_of_sessions(&mut self) -> Result<usize> {
        Ok(self.session_mut()?.table_of_contents()?.sessions.len())
    }

    /// Session at `index`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if there is no session at `index`
    /// * [`Error::NotOpen`] if the handle is closed
    pub fn session(&mut self, index: usize) -> Result<SectorRange> {
        let toc = self.session_mut()?.table_of_contents()?;
        toc.sessions.get(index).copied().ok_or_else(|| {
            Error::invalid_argument(format!("session index out of bounds: {}", index))
        })
    }

    /// Number of tracks on an optical disc; 0 for other media.
    pub fn number_of_tracks(&mut self) -> Result<usize> {
        Ok(self.session_mut()?.table_of_contents()?.tracks.len())
    }

    /// Track at `index`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if there is no track at `index`
    /// * [`Error::NotOpen`] if the handle is closed
    pub fn track(&mut self, index: usize) -> Result<Track> {
        let toc = self.session_mut()?.table_of_contents()?;
        toc.tracks.get(index).copied().ok_or_else(|| {
            Error::invalid_argument(format!("track index out of bounds: {}", index))
        })
    }

    /// Current offset.
    pub fn offset(&self) -> Result<u64> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        Ok(self.cursor)
    }

    /// Move the offset and return the new offset.
    ///
    /// Seeking beyond the end of the media is allowed; reading there
    /// returns no data.
    ///
    /// # Errors
    ///
    /// * [`Error::NotOpen`] if the handle is closed
    /// * [`Error::OutOfBounds`] if the resulting offset is negative or overflows
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let session = self.session.as_mut().ok_or(Error::NotOpen)?;
        let out_of_bounds = || Error::OutOfBounds { offset, whence };

        let base = match whence {
            Whence::Start => 0,
            Whence::Current => i64::try_from(self.cursor).map_err(|_| out_of_bounds())?,
            Whence::End => {
                i64::try_from(session.geometry()?.media_size).map_err(|_| out_of_bounds())?
            }
        };
        let target = base
            .checked_add(offset)
            .filter(|target| *target >= 0)
            .ok_or_else(out_of_bounds)?;

        self.cursor = target as u64;
        Ok(self.cursor)
    }

    /// Read into `buf` at the current offset.
    ///
    /// Returns the number of bytes read, which is 0 at or beyond the end of
    /// the media. A device read error fails the read, unless
    /// [`Options::tolerate_errors`] is set: then regions that cannot be read
    /// after the configured retries are zero-filled and recorded (see
    /// [`errors`](Self::errors)).
    pub fn read_buffer(&mut self, buf: &mut [u8]) -> Result<usize> {
        let session = self.session.as_mut().ok_or(Error::NotOpen)?;
        let media_size = session.geometry()?.media_size;

        let available = media_size.saturating_sub(self.cursor);
        let read_size = usize::try_from(available).map_or(buf.len(), |a| a.min(buf.len()));
        if read_size == 0 {
            return Ok(0);
        }

        let mut ctx = ReadContext {
            session,
            options: &self.options,
            errors: ErrorRanges::new(),
            abort: &self.abort,
            offset: self.cursor,
        };
        let bytes_read = ctx.read(&mut buf[..read_size])?;
        // Skipped regions are only recorded once the whole read succeeded.
        self.errors.merge(&ctx.errors);
        self.cursor += bytes_read as u64;
        Ok(bytes_read)
    }

    /// Read into `buf` at `offset`.
    pub fn read_buffer_at_offset(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let offset = i64::try_from(offset)
            .map_err(|_| Error::invalid_argument("offset exceeds maximum"))?;
        self.seek(offset, Whence::Start)?;
        self.read_buffer(buf)
    }

    /// Read up to `size` bytes at the current offset.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if `size` is negative or exceeds
    ///   [`MAXIMUM_READ_SIZE`]
    /// * [`Error::NotOpen`] if the handle is closed
    pub fn read(&mut self, size: i64) -> Result<Vec<u8>> {
        let size = validate_size(size)?;
        self.read_to_vec(size)
    }

    /// Read up to [`Options::default_read_size`] bytes at the current offset.
    pub fn read_default(&mut self) -> Result<Vec<u8>> {
        let size = check_read_size(self.options.default_read_size)?;
        self.read_to_vec(size)
    }

    /// Read up to `size` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if `size` or `offset` is negative, or
    ///   `size` exceeds [`MAXIMUM_READ_SIZE`]
    /// * [`Error::NotOpen`] if the handle is closed
    pub fn read_at(&mut self, size: i64, offset: i64) -> Result<Vec<u8>> {
        let size = validate_size(size)?;
        if offset < 0 {
            return Err(Error::invalid_argument(format!(
                "offset value less than zero: {}",
                offset
            )));
        }
        self.seek(offset, Whence::Start)?;
        self.read_to_vec(size)
    }

    fn read_to_vec(&mut self, size: usize) -> Result<Vec<u8>> {
        let media_size = self.media_size()?;
        let available = media_size.saturating_sub(self.cursor);
        let capacity = usize::try_from(available).map_or(size, |a| a.min(size));

        let mut buf = vec![0u8; capacity];
        let bytes_read = self.read_buffer(&mut buf)?;
        buf.truncate(bytes_read);
        Ok(buf)
    }

    /// Number of regions that could not be read since the handle was opened.
    pub fn number_of_errors(&self) -> usize {
        self.errors.len()
    }

    /// Unreadable region at `index`.
    pub fn error(&self, index: usize) -> Option<ErrorRange> {
        self.errors.get(index).copied()
    }

    /// All unreadable regions, sorted by offset.
    pub fn errors(&self) -> &ErrorRanges {
        &self.errors
    }
}

impl io::Read for DeviceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_buffer(buf)?)
    }
}

impl io::Seek for DeviceHandle {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(offset) => (
                i64::try_from(offset)
                    .map_err(|_| Error::invalid_argument("offset exceeds maximum"))?,
                Whence::Start,
            ),
            io::SeekFrom::Current(offset) => (offset, Whence::Current),
            io::SeekFrom::End(offset) => (offset, Whence::End),
        };
        Ok(DeviceHandle::seek(self, offset, whence)?)
    }
}

fn validate_path(path: &Path) -> Result<&Path> {
    if path.as_os_str().is_empty() {
        return Err(Error::invalid_argument("empty path"));
    }
    Ok(path)
}

fn validate_size(size: i64) -> Result<usize> {
    if size < 0 {
        return Err(Error::invalid_argument(format!(
            "read size value less than zero: {}",
            size
        )));
    }
    let size = usize::try_from(size).map_err(|_| {
        Error::invalid_argument(format!("read size value exceeds maximum: {}", size))
    })?;
    check_read_size(size)
}

fn check_read_size(size: usize) -> Result<usize> {
    if size > MAXIMUM_READ_SIZE {
        return Err(Error::invalid_argument(format!(
            "read size value exceeds maximum: {}",
            size
        )));
    }
    Ok(size)
}

/// Whether a failed read may succeed when retried.
fn is_retryable(err: &io::Error) -> bool {
    !matches!(
        err.raw_os_error(),
        Some(libc::ESPIPE | libc::EPERM | libc::ENXIO | libc::ENODEV)
    )
}

/// Internal helper to perform a single clamped read.
struct ReadContext<'a> {
    session: &'a mut Session,
    options: &'a Options,
    /// Regions skipped by this read.
    errors: ErrorRanges,
    abort: &'a AbortHandle,
    /// Media offset of `buf[0]`.
    offset: u64,
}

impl ReadContext<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        const FUNCTION: &str = "read_buffer";

        let length = buf.len();
        let mut buffer_offset = 0usize;
        let mut failures = 0u16;

        while buffer_offset < length {
            if self.abort.is_signalled() {
                notify!(FUNCTION, "aborted at offset: {}", self.offset + buffer_offset as u64);
                self.session.device_position = None;
                return Err(Error::Aborted);
            }

            let position = self.offset + buffer_offset as u64;
            self.session.sync_position(position)?;

            match self.session.device.read(&mut buf[buffer_offset..]) {
                // The device ended before its reported media size.
                Ok(0) => break,
                Ok(count) if count > length - buffer_offset => {
                    self.session.device_position = None;
                    return Err(Error::platform(
                        "invalid read count value exceeds read size",
                        io::Error::new(io::ErrorKind::InvalidData, format!("{} bytes", count)),
                    ));
                }
                Ok(count) => {
                    buffer_offset += count;
                    self.session.device_position = Some(position + count as u64);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.session.device_position = None;
                }
                Err(e) if !self.options.tolerate_errors || !is_retryable(&e) => {
                    self.session.device_position = None;
                    return Err(Error::platform("unable to read from device", e));
                }
                Err(e) => {
                    self.session.device_position = None;
                    failures += 1;
                    notify!(FUNCTION, "read error: {} at offset: {}: {}", failures, position, e);

                    if failures > u16::from(self.options.error_retries) {
                        buffer_offset += self.skip_error(buf, buffer_offset);
                        failures = 0;
                    }
                }
            }
        }
        Ok(buffer_offset)
    }

    /// Zero-fill and record the region around a read error at `buf[buffer_offset]`.
    ///
    /// Returns the number of bytes to skip.
    fn skip_error(&mut self, buf: &mut [u8], buffer_offset: usize) -> usize {
        const FUNCTION: &str = "read_buffer";

        let start = self.offset;
        let end = start + buf.len() as u64;
        let position = start + buffer_offset as u64;

        // Error blocks are aligned to the media, not to the buffer.
        let (block_start, block_end) = match self.options.error_granularity as u64 {
            0 => (start, end),
            granularity => {
                let block_start = position / granularity * granularity;
                (block_start, block_start.saturating_add(granularity))
            }
        };
        let skip_end = block_end.min(end);

        let zero_start = if self.options.zero_on_error {
            block_start.max(start)
        } else {
            position
        };
        let zero_range = (zero_start - start) as usize..(skip_end - start) as usize;
        buf[zero_range].fill(0);
        self.errors.insert(zero_start, skip_end - zero_start);

        notify!(
            FUNCTION,
            "zeroed {} bytes at offset: {}, skipping {} bytes",
            skip_end - zero_start,
            zero_start,
            skip_end - position
        );
        (skip_end - position) as usize
    }
}
