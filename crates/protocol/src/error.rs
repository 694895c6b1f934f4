//! Protocol error types

use thiserror::Error;

/// Wire-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer speaks a different protocol version
    #[error("Protocol version mismatch: {found:#06x} (expected {expected:#06x})")]
    VersionMismatch { found: u16, expected: u16 },

    /// A write did not hand the whole record to the stream
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// A zero-length exact read was requested
    #[error("Exact read of zero bytes requested")]
    EmptyRead,

    /// A string does not fit its fixed-size wire field
    #[error("Field too long: {len} bytes (max: {max})")]
    FieldTooLong { len: usize, max: usize },

    /// I/O error on the underlying stream (includes short reads)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True when the peer closed the stream before a record was complete
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
