//! # smdev
//!
//! A Rust crate for bounds-safe read access to storage media devices.
//!
//! ## Overview
//!
//! `smdev` reads raw data from disks, optical media and other device nodes
//! that do not always behave like regular files. A [`DeviceHandle`] treats
//! the device as a seekable byte stream while:
//!
//! - Resolving the media size lazily, from device metadata or by probing
//! - Clamping every read to the media size, so reading at or past the end
//!   of the media returns no data instead of failing
//! - Allowing seeks beyond the end of the media
//! - Optionally tolerating read errors: retrying failed reads and
//!   zero-filling regions that stay unreadable
//! - Reporting media type, bus type, identification strings and the
//!   sessions and tracks of optical discs
//! - Supporting cooperative cancellation of reads from another thread
//!
//! ## Example
//!
//! ```no_run
//! use smdev::Whence;
//!
//! let mut handle = smdev::open("/dev/sdb").unwrap();
//! println!("Media size: {}", handle.media_size().unwrap());
//!
//! // Read the first sector.
//! let data = handle.read_at(512, 0).unwrap();
//!
//! // Read the last 16 bytes, even if more are requested.
//! handle.seek(-16, Whence::End).unwrap();
//! let tail = handle.read(4096).unwrap();
//! assert!(tail.len() <= 16);
//! ```
//!
//! Reading a damaged disk, with unreadable sectors zero-filled:
//!
//! ```no_run
//! use smdev::{DeviceHandle, Options};
//!
//! let options = Options::new()
//!     .with_error_tolerance(true)
//!     .with_error_retries(2)
//!     .with_error_granularity(512);
//! let mut handle = DeviceHandle::with_options(options);
//! handle.open("/dev/sdb").unwrap();
//! let data = handle.read(1024 * 1024).unwrap();
//! println!("Read {} bytes", data.len());
//!
//! for range in handle.errors() {
//!     println!("Unreadable: {} bytes at {}", range.size, range.offset);
//! }
//! ```
//!
//! ## Safety
//!
//! Reading device nodes usually requires root privileges. The `smdevinfo`
//! tool requests sudo permissions when it is given a device node.

mod device;
mod error;
mod error_ranges;
mod geometry;
mod handle;
mod media;
pub mod notify;
mod options;

use std::path::Path;

pub use device::{Device, RawDevice};
pub use error::{Error, Result};
pub use error_ranges::{ErrorRange, ErrorRanges};
pub use geometry::{resolve_geometry, resolve_media_size, Geometry};
pub use handle::{AbortHandle, DeviceHandle, Whence};
pub use media::{
    BusType, MediaInformation, MediaType, SectorRange, TableOfContents, Track, TrackType,
};
pub use options::{AccessMode, Options, DEFAULT_READ_SIZE, MAXIMUM_READ_SIZE};

/// Open the device at `path` for reading and return the handle.
///
/// # Errors
///
/// * [`Error::InvalidArgument`] if `path` is empty
/// * [`Error::Platform`] if the device could not be opened
pub fn open<P: AsRef<Path>>(path: P) -> Result<DeviceHandle> {
    let mut handle = DeviceHandle::new();
    handle.open(path)?;
    Ok(handle)
}

/// Version of the library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_helper() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 300]).unwrap();
        file.flush().unwrap();

        let mut handle = open(file.path()).unwrap();
        assert!(handle.is_open());
        assert_eq!(handle.media_size().unwrap(), 300);
        assert_eq!(handle.read(4096).unwrap(), vec![1u8; 300]);
        handle.close().unwrap();

        assert!(matches!(open(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            open("/nonexistent/smdev/device"),
            Err(Error::Platform { .. })
        ));
    }

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }
}
