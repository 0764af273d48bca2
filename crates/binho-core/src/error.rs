//! Error types for adapter communication

use std::time::Duration;

use thiserror::Error;

use crate::capabilities::Capabilities;
use crate::state::ConnectionState;

/// Errors raised by the communication layer and the protocol drivers
///
/// Every variant carries owned data so a single transport fault can be
/// handed to the waiting caller and recorded on the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Operation attempted while the connection is not `Ready`
    #[error("Adapter not connected (state: {state})")]
    NotConnected {
        /// State observed when the operation was refused
        state: ConnectionState,
    },

    /// No matching response arrived before the deadline
    #[error("Timed out after {timeout:?} waiting for reply to '{command}'")]
    Timeout {
        /// Command text that went unanswered
        command: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// The reply did not carry the expected prefix
    #[error("Unexpected response: expected '{expected}', got '{actual}'")]
    UnexpectedResponse {
        /// Prefix the issuing driver expected
        expected: String,
        /// Raw line the adapter sent
        actual: String,
    },

    /// Outgoing command cannot be framed
    #[error("Cannot encode command: {0}")]
    Encoding(String),

    /// I/O failure on the underlying channel
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reply payload could not be parsed by the issuing driver
    #[error("Invalid payload '{payload}' in reply to '{command}'")]
    InvalidPayload {
        /// Command text that produced the payload
        command: String,
        /// Payload that failed to parse
        payload: String,
    },

    /// The adapter variant does not expose the required API
    #[error("Adapter does not support {0:?}")]
    Unsupported(Capabilities),

    /// A driver argument is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection configuration is malformed
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl Error {
    /// Whether the failure is local to one exchange and may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::UnexpectedResponse { .. })
    }
}
