//! Driver error types.

use thiserror::Error;
use tnt_wire::WireError;

/// Errors surfaced to callers of the driver.
///
/// Transport and protocol errors are delivered to the specific pending
/// request they belong to, or to every queued request on teardown; they
/// are never raised without a receiver.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Sending on a terminally closed connection
    #[error("connection is closed")]
    ConnectionClosed,

    /// Duplicate connect attempt while connecting or ready
    #[error("connection is already connecting or connected")]
    AlreadyConnecting,

    /// Socket-level failure
    #[error("transport: {0}")]
    Transport(String),

    /// Server returned a nonzero status
    #[error("server error {code:#x}: {message}")]
    Protocol {
        /// Status code from the response header
        code: u32,
        /// Server-supplied error message
        message: String,
    },

    /// The authentication handshake was rejected
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Malformed caller input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Frame encoding or decoding failure
    #[error("wire: {0}")]
    Wire(String),
}

impl From<WireError> for DriverError {
    fn from(err: WireError) -> Self {
        DriverError::Wire(err.to_string())
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Transport(err.to_string())
    }
}
