//! Error type returned by device handle operations.

use crate::handle::Whence;
use std::io;
use thiserror::Error;

/// Errors that can occur when accessing a storage media device.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input such as an empty path, a negative size or an
    /// unsupported access mode.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A seek resolved to an offset before the start of the device
    /// or beyond the representable range.
    #[error("seek offset {offset} from {whence:?} is out of bounds")]
    OutOfBounds { offset: i64, whence: Whence },

    #[error("device handle is not open")]
    NotOpen,

    #[error("device handle is already open")]
    AlreadyOpen,

    /// The media size could not be determined by any strategy.
    #[error("unable to determine media size")]
    GeometryUnavailable,

    /// The operation was unwound by `signal_abort`.
    #[error("operation aborted")]
    Aborted,

    /// The underlying device primitive failed.
    #[error("{context}: {source}")]
    Platform {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Result type alias for device handle operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn platform(context: &'static str, source: io::Error) -> Self {
        Error::Platform { context, source }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::Platform { source, .. } => return source,
            Error::InvalidArgument(_) | Error::OutOfBounds { .. } => io::ErrorKind::InvalidInput,
            Error::NotOpen => io::ErrorKind::NotConnected,
            Error::AlreadyOpen => io::ErrorKind::AlreadyExists,
            Error::GeometryUnavailable => io::ErrorKind::Unsupported,
            Error::Aborted => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let err: io::Error = Error::NotOpen.into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let err: io::Error = Error::OutOfBounds {
            offset: -1,
            whence: Whence::Start,
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err: io::Error = Error::invalid_argument("negative size").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_platform_error_passthrough() {
        let source = io::Error::from_raw_os_error(libc::ENODEV);
        let err: io::Error = Error::platform("unable to read", source).into();
        assert_eq!(err.raw_os_error(), Some(libc::ENODEV));
    }

    #[test]
    fn test_display() {
        let err = Error::platform(
            "unable to seek",
            io::Error::new(io::ErrorKind::Other, "boom"),
        );
        assert_eq!(err.to_string(), "unable to seek: boom");
        assert_eq!(
            Error::invalid_argument("empty path").to_string(),
            "invalid argument: empty path"
        );
    }
}
