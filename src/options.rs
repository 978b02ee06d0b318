//! Configuration options for device handles.

use crate::error::Error;
use std::str::FromStr;

/// Default number of bytes returned by [`DeviceHandle::read_default`](crate::DeviceHandle::read_default).
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// Largest number of bytes a single read may request.
pub const MAXIMUM_READ_SIZE: usize = i32::MAX as usize;

/// Options for controlling how a device handle reads.
#[derive(Debug, Clone)]
pub struct Options {
    /// Tolerate read errors instead of failing the read.
    ///
    /// When disabled (default), a device read error is returned to the
    /// caller. When enabled, failed reads are retried and regions that stay
    /// unreadable are zero-filled and recorded in the handle's error list.
    pub tolerate_errors: bool,

    /// Number of times a failed read is retried before the failing
    /// region is skipped. Only used when `tolerate_errors` is enabled.
    pub error_retries: u8,

    /// Size of the region skipped after all retries failed.
    ///
    /// A value of 0 means the whole read request.
    pub error_granularity: usize,

    /// Zero the whole granularity-aligned block that contains a read error.
    ///
    /// When disabled (default), only the unread remainder of the block is
    /// zeroed and recorded as an error. When enabled, data that was already
    /// read from that block is discarded as well, so the recorded error
    /// ranges always start on a granularity boundary.
    pub zero_on_error: bool,

    /// Advise the kernel that the device is read sequentially.
    pub sequential_access: bool,

    /// Number of bytes returned by a read without an explicit size.
    ///
    /// Reads fail with `InvalidArgument` if this exceeds [`MAXIMUM_READ_SIZE`].
    pub default_read_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tolerate_errors: false,
            error_retries: 0,
            error_granularity: 0,
            zero_on_error: false,
            sequential_access: true,
            default_read_size: DEFAULT_READ_SIZE,
        }
    }
}

impl Options {
    /// Create a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable tolerating read errors.
    pub fn with_error_tolerance(mut self, tolerate: bool) -> Self {
        self.tolerate_errors = tolerate;
        self
    }

    /// Set the number of read retries.
    pub fn with_error_retries(mut self, retries: u8) -> Self {
        self.error_retries = retries;
        self
    }

    /// Set the error granularity in bytes (0 for the whole request).
    pub fn with_error_granularity(mut self, granularity: usize) -> Self {
        self.error_granularity = granularity;
        self
    }

    /// Enable or disable zeroing the whole block around a read error.
    pub fn with_zero_on_error(mut self, zero: bool) -> Self {
        self.zero_on_error = zero;
        self
    }

    /// Enable or disable the sequential access hint.
    pub fn with_sequential_access(mut self, sequential: bool) -> Self {
        self.sequential_access = sequential;
        self
    }

    /// Set the default read size.
    pub fn with_default_read_size(mut self, size: usize) -> Self {
        self.default_read_size = size;
        self
    }
}

/// Access mode of a device handle. Only reading is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    Read,
}

impl FromStr for AccessMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "r" | "rb" => Ok(AccessMode::Read),
            _ => Err(Error::invalid_argument(format!(
                "unsupported mode: {:?}",
                mode
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(!opts.tolerate_errors);
        assert_eq!(opts.error_retries, 0);
        assert_eq!(opts.error_granularity, 0);
        assert!(!opts.zero_on_error);
        assert!(opts.sequential_access);
        assert_eq!(opts.default_read_size, DEFAULT_READ_SIZE);
    }

    #[test]
    fn test_builder_pattern() {
        let opts = Options::new()
            .with_error_tolerance(true)
            .with_error_retries(3)
            .with_error_granularity(512)
            .with_zero_on_error(true)
            .with_sequential_access(false)
            .with_default_read_size(4096);

        assert!(opts.tolerate_errors);
        assert_eq!(opts.error_retries, 3);
        assert_eq!(opts.error_granularity, 512);
        assert!(opts.zero_on_error);
        assert!(!opts.sequential_access);
        assert_eq!(opts.default_read_size, 4096);
    }

    #[test]
    fn test_access_mode_parse() {
        assert_eq!("r".parse::<AccessMode>().unwrap(), AccessMode::Read);
        assert_eq!("rb".parse::<AccessMode>().unwrap(), AccessMode::Read);

        for mode in ["w", "a", "r+", "rw", "wb", ""] {
            assert!(matches!(
                mode.parse::<AccessMode>(),
                Err(Error::InvalidArgument(_))
            ));
        }
    }
}
