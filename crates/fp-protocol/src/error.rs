//! Protocol error types

use thiserror::Error;

use crate::command::Command;

/// Errors that can occur while framing tracker packets
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Header carried a negative body length
    #[error("Invalid body length in header: {0}")]
    InvalidLength(i64),

    /// Body exceeds the configured maximum
    #[error("Body too large: {size} bytes exceeds maximum of {max} bytes")]
    BodyTooLarge { size: usize, max: usize },

    /// Peer answered with a different command than expected
    #[error("Unexpected response command: expected {expected}, got {actual}")]
    UnexpectedCommand { expected: Command, actual: Command },

    /// Peer answered with a non-zero status byte
    #[error("Tracker returned error status {0}")]
    ErrorStatus(u8),

    /// Connection closed before a complete packet arrived
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
