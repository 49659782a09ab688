//! Protocol-specific error types.

use thiserror::Error;

/// Wire-protocol violations.
///
/// Every variant is protocol-fatal for the connection that produced it:
/// the server answers `ERROR\r\n` and closes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command line not recognized in LINE state.
    #[error("Unrecognized command line: {line:?}")]
    UnknownCommand {
        /// The offending line (lossily decoded).
        line: String,
    },

    /// `set` line with an unknown command token.
    #[error("Unknown store command: {command:?}")]
    UnknownStoreCommand {
        /// The command token found after `set`.
        command: String,
    },

    /// `set` line that does not match `set <command> <flags> <exptime> <bytes>`.
    #[error("Malformed store line: {line:?}")]
    MalformedStoreLine {
        /// The offending line (lossily decoded).
        line: String,
    },

    /// Command line exceeds the maximum accepted length.
    #[error("Command line too long: {actual} bytes (max {max})")]
    LineTooLong {
        /// Bytes buffered without a line terminator.
        actual: usize,
        /// Maximum accepted line length.
        max: usize,
    },

    /// Announced body size exceeds the maximum accepted payload size.
    #[error("Body size {actual} exceeds maximum {max}")]
    BodyTooLarge {
        /// Announced body size.
        actual: usize,
        /// Maximum accepted body size.
        max: usize,
    },

    /// More bytes arrived for a framed body than it announced.
    #[error("Excess body bytes: expected {expected}, got {actual}")]
    ExcessBodyBytes {
        /// Announced body size including its trailing CRLF.
        expected: usize,
        /// Bytes received for the body.
        actual: usize,
    },

    /// Framed body did not end with CRLF.
    #[error("Framed body missing CRLF terminator")]
    MissingBodyTerminator,

    /// Publish-block entry that does not follow the `MESSAGE` grammar.
    #[error("Malformed block entry: {message}")]
    MalformedEntry {
        /// Description of the grammar violation.
        message: String,
    },
}

impl ProtocolError {
    /// Create a malformed-entry error from any displayable value.
    pub fn malformed_entry(message: impl Into<String>) -> Self {
        Self::MalformedEntry { message: message.into() }
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
