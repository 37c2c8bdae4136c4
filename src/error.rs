//! Device error model.
//!
//! Every device carries one sticky error slot. Once an operation fails the
//! kind is recorded and subsequent operations on the same device short-circuit
//! with the recorded error until [`Device::clear_error`] is called. End-of-data
//! is not an error: it is tracked by a separate sticky EOF flag on the device.
//!
//! The kind set is closed. A filter that observes an error on its underlying
//! device mirrors the kind unchanged into its own slot; coarsening is not
//! permitted.
//!
//! [`Device::clear_error`]: crate::device::Device::clear_error

use std::io;

/// Result alias used throughout the crate.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// The closed set of device error kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid open mode: {0:?}")]
    InvalidMode(String),

    #[error("operation not legal in the current device state")]
    BadState,

    #[error("device is not seekable")]
    NotSeekable,

    #[error("padding bytes are invalid")]
    PadInvalid,

    #[error("input is truncated or malformed")]
    Truncated,

    #[error("underlying I/O error: {0}")]
    Io(String),

    #[error("configured byte limit reached")]
    LimitReached,

    #[error("pipe closed")]
    PipeClosed,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<io::Error> for DeviceError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::OutOfMemory => DeviceError::OutOfMemory,
            _ => DeviceError::Io(err.to_string()),
        }
    }
}

impl From<DeviceError> for io::Error {
    fn from(err: DeviceError) -> Self {
        io::Error::new(io::ErrorKind::Other, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let e = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        match DeviceError::from(e) {
            DeviceError::Io(msg) => assert!(msg.contains("denied")),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(DeviceError::PadInvalid.to_string(), "padding bytes are invalid");
        assert_eq!(DeviceError::PipeClosed.to_string(), "pipe closed");
    }
}
