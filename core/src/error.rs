//! Classified device errors
//!
//! Every failure surfaced by a device is a [`DeviceError`], and every variant
//! answers [`DeviceError::is_fatal`]. Fatal errors mean the link can no longer
//! be trusted (desynchronized stream, I/O failure, timeout): the lifecycle
//! manager closes and forgets the connection. Non-fatal errors leave the
//! connection open for the next caller.

use crate::asm::AsmError;
use crate::device::Capabilities;
use crate::mapping::MappingError;

/// Convenience alias used throughout the device layer
pub type Result<T, E = DeviceError> = std::result::Result<T, E>;

/// Any failure from a device operation
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// I/O failure on the underlying link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Deadline passed while waiting
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Malformed frame: wrong magic, wrong response opcode, truncated data
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Device answered with a non-zero status code
    #[error("{op}: device returned error code {code}")]
    Status {
        op: &'static str,
        code: u8,
        fatal: bool,
    },

    /// Operation not offered by this device
    #[error("device does not support {0:?}")]
    Unsupported(Capabilities),

    /// Address could not be resolved to a device address
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Code generation precondition violated
    #[error(transparent)]
    Asm(#[from] AsmError),

    /// Request rejected before any I/O
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No such device or driver
    #[error("not found: {0}")]
    NotFound(String),

    /// Connection has already been closed
    #[error("device is closed")]
    Closed,
}

impl DeviceError {
    /// Whether the connection must be torn down after this error
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_) | Self::Serial(_) | Self::Timeout(_) | Self::Protocol(_) | Self::Closed => true,
            Self::Status { fatal, .. } => *fatal,
            Self::Unsupported(_)
            | Self::Mapping(_)
            | Self::Asm(_)
            | Self::InvalidArgument(_)
            | Self::NotFound(_) => false,
        }
    }

    /// Device status error that desynchronizes the link
    pub fn fatal_status(op: &'static str, code: u8) -> Self {
        Self::Status { op, code, fatal: true }
    }

    /// Device status error that leaves the link usable
    pub fn soft_status(op: &'static str, code: u8) -> Self {
        Self::Status {
            op,
            code,
            fatal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{AddressSpace, AddressTuple};

    #[test]
    fn test_classification() {
        assert!(DeviceError::Protocol("bad magic".into()).is_fatal());
        assert!(DeviceError::Timeout("response".into()).is_fatal());
        assert!(DeviceError::Closed.is_fatal());
        assert!(DeviceError::fatal_status("get", 1).is_fatal());

        assert!(!DeviceError::soft_status("vget", 1).is_fatal());
        assert!(!DeviceError::Unsupported(Capabilities::PAUSE_UNPAUSE).is_fatal());
        assert!(!DeviceError::InvalidArgument("size".into()).is_fatal());

        let unknown = MappingError::UnknownMapping(AddressTuple::pak(0x8000), AddressSpace::SnesBus);
        assert!(!DeviceError::from(unknown).is_fatal());
    }

    #[test]
    fn test_io_error_is_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        let err: DeviceError = io.into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("unplugged"));
    }

    #[test]
    fn test_status_display() {
        let err = DeviceError::fatal_status("boot", 3);
        assert_eq!(err.to_string(), "boot: device returned error code 3");
    }
}
