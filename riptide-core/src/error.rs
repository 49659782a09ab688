//! Error types for the riptide core library.

use thiserror::Error;

/// Main error type for riptide core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid topic name or message content.
    #[error("Invalid message: {message}")]
    InvalidMessage {
        /// Description of the violation.
        message: String,
    },

    /// Wire protocol violation.
    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    /// Configuration errors.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// I/O errors from the network or filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal system errors.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal failure.
        message: String,
    },
}

impl Error {
    /// Create a configuration error from any displayable value.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error from any displayable value.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

/// Result type alias for riptide operations.
pub type Result<T> = std::result::Result<T, Error>;
