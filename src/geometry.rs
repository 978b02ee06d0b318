//! Device geometry resolution.
//!
//! The media size is determined from device metadata when the platform
//! reports it, and by seeking to the end of the device otherwise. Sector
//! and transfer sizes are optional: devices that do not report them
//! resolve to `None`.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::notify::notify;

/// Size and I/O granularity of an opened device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Total addressable size in bytes.
    pub media_size: u64,

    /// Logical sector size in bytes, the minimum I/O granularity.
    pub bytes_per_sector: Option<u32>,

    /// Largest single transfer in bytes, the maximum I/O granularity.
    pub max_transfer_size: Option<u32>,
}

impl Geometry {
    /// Number of whole sectors on the media, if the sector size is known.
    pub fn number_of_sectors(&self) -> Option<u64> {
        self.bytes_per_sector
            .map(|bytes_per_sector| self.media_size / u64::from(bytes_per_sector))
    }
}

/// Determine the total media size of `device` in bytes.
///
/// A zero size reported by the metadata query is treated as unknown, since
/// character devices and some optical drives report 0 until probed.
pub fn resolve_media_size<D: Device + ?Sized>(device: &mut D) -> Result<u64> {
    const FUNCTION: &str = "resolve_media_size";

    match device.query_media_size() {
        Ok(Some(size)) if size > 0 => {
            notify!(FUNCTION, "media size from metadata: {}", size);
            return Ok(size);
        }
        Ok(_) => {
            notify!(FUNCTION, "media size not reported by metadata");
        }
        Err(e) => {
            notify!(FUNCTION, "unable to query media size: {}", e);
        }
    }

    match device.seek_end() {
        Ok(size) => {
            notify!(FUNCTION, "media size from seek to end: {}", size);
            Ok(size)
        }
        Err(e) => {
            notify!(FUNCTION, "unable to seek to end of device: {}", e);
            Err(Error::GeometryUnavailable)
        }
    }
}

/// Determine the full geometry of `device`.
///
/// Only the media size is required; failing granularity queries are
/// reported as `None`.
pub fn resolve_geometry<D: Device + ?Sized>(device: &mut D) -> Result<Geometry> {
    const FUNCTION: &str = "resolve_geometry";

    let media_size = resolve_media_size(device)?;

    let bytes_per_sector = device.query_bytes_per_sector().unwrap_or_else(|e| {
        notify!(FUNCTION, "unable to query bytes per sector: {}", e);
        None
    });
    let max_transfer_size = device.query_max_transfer_size().unwrap_or_else(|e| {
        notify!(FUNCTION, "unable to query maximum transfer size: {}", e);
        None
    });

    Ok(Geometry {
        media_size,
        bytes_per_sector,
        max_transfer_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Device that only answers geometry queries.
    struct GeometryOnly {
        metadata: io::Result<Option<u64>>,
        probed: io::Result<u64>,
        sector: io::Result<Option<u32>>,
    }

    fn clone_result<T: Copy>(result: &io::Result<T>) -> io::Result<T> {
        match result {
            Ok(value) => Ok(*value),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        }
    }

    impl Device for GeometryOnly {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn seek(&mut self, offset: u64) -> io::Result<u64> {
            Ok(offset)
        }

        fn query_media_size(&mut self) -> io::Result<Option<u64>> {
            clone_result(&self.metadata)
        }

        fn seek_end(&mut self) -> io::Result<u64> {
            clone_result(&self.probed)
        }

        fn query_bytes_per_sector(&mut self) -> io::Result<Option<u32>> {
            clone_result(&self.sector)
        }
    }

    fn unsupported() -> io::Error {
        io::Error::from_raw_os_error(libc::ENOTTY)
    }

    #[test]
    fn test_metadata_strategy() {
        let mut device = GeometryOnly {
            metadata: Ok(Some(1 << 20)),
            probed: Ok(42),
            sector: Ok(Some(512)),
        };
        let geometry = resolve_geometry(&mut device).unwrap();
        assert_eq!(geometry.media_size, 1 << 20);
        assert_eq!(geometry.bytes_per_sector, Some(512));
        assert_eq!(geometry.max_transfer_size, None);
        assert_eq!(geometry.number_of_sectors(), Some(2048));
    }

    #[test]
    fn test_probe_fallback() {
        let mut device = GeometryOnly {
            metadata: Ok(None),
            probed: Ok(2352 * 10),
            sector: Ok(None),
        };
        assert_eq!(resolve_media_size(&mut device).unwrap(), 23520);

        let mut device = GeometryOnly {
            metadata: Ok(Some(0)),
            probed: Ok(4096),
            sector: Ok(None),
        };
        assert_eq!(resolve_media_size(&mut device).unwrap(), 4096);

        let mut device = GeometryOnly {
            metadata: Err(unsupported()),
            probed: Ok(512),
            sector: Err(unsupported()),
        };
        let geometry = resolve_geometry(&mut device).unwrap();
        assert_eq!(geometry.media_size, 512);
        assert_eq!(geometry.bytes_per_sector, None);
        assert_eq!(geometry.number_of_sectors(), None);
    }

    #[test]
    fn test_geometry_unavailable() {
        let mut device = GeometryOnly {
            metadata: Err(unsupported()),
            probed: Err(io::Error::from_raw_os_error(libc::ESPIPE)),
            sector: Ok(None),
        };
        assert!(matches!(
            resolve_media_size(&mut device),
            Err(Error::GeometryUnavailable)
        ));
        assert!(matches!(
            resolve_geometry(&mut device),
            Err(Error::GeometryUnavailable)
        ));
    }

    #[test]
    fn test_empty_regular_media() {
        let mut device = GeometryOnly {
            metadata: Ok(Some(0)),
            probed: Ok(0),
            sector: Ok(None),
        };
        assert_eq!(resolve_media_size(&mut device).unwrap(), 0);
    }
}
