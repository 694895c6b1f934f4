//! Common error types

use protocol::ProtocolError;
use thiserror::Error;

use crate::usb_types::UsbError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Failed to {operation}: {source}")]
    Device {
        operation: &'static str,
        #[source]
        source: UsbError,
    },

    #[error("Unknown operation: {0:#06x}")]
    UnknownOpcode(u16),

    #[error("Unknown request command: {0}")]
    UnknownCommand(u32),

    #[error("Bad device requested: {0:?}")]
    InvalidBusId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the peer simply went away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Protocol(e) if e.is_disconnect())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach the failed operation to a host-controller error
pub trait DeviceContext<T> {
    fn device_context(self, operation: &'static str) -> Result<T>;
}

impl<T> DeviceContext<T> for std::result::Result<T, UsbError> {
    fn device_context(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| Error::Device { operation, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_context_names_operation() {
        let result: std::result::Result<(), UsbError> = Err(UsbError::Pipe);
        let err = result.device_context("get device descriptor").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to get device descriptor: endpoint stalled"
        );
    }

    #[test]
    fn test_disconnect_only_for_eof() {
        let eof = Error::Protocol(ProtocolError::Io(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof,
        )));
        assert!(eof.is_disconnect());
        assert!(!Error::UnknownCommand(7).is_disconnect());
    }
}
