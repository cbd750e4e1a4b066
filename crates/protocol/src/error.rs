//! Error types for the protocol crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of failure reported back to a caller.
///
/// Every error surfaced by the daemon maps to exactly one kind, so clients
/// can branch on it instead of parsing message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The path resolves outside the root.
    AccessDenied,
    /// The target does not exist.
    NotFound,
    /// A directory was required but the target is something else.
    NotADirectory,
    /// A file was required but the target is a directory.
    IsADirectory,
    /// The content exceeds a configured ceiling.
    TooLarge,
    /// The destination already exists.
    Conflict,
    /// A supplied name contains separators or parent references.
    InvalidName,
    /// The request is malformed.
    InvalidInput,
    /// The underlying filesystem operation failed.
    IoError,
    /// The archive codec reported an error.
    BuildFailed,
    /// The archive build succeeded but produced no output.
    CreationFailed,
    /// The archive format or extension is not recognized.
    UnsupportedFormat,
    /// Transport-level failure between client and daemon.
    Internal,
}

impl ErrorKind {
    /// Whether the caller can reasonably retry the same request.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::IoError | Self::BuildFailed | Self::Internal)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AccessDenied => "access denied",
            Self::NotFound => "not found",
            Self::NotADirectory => "not a directory",
            Self::IsADirectory => "is a directory",
            Self::TooLarge => "too large",
            Self::Conflict => "conflict",
            Self::InvalidName => "invalid name",
            Self::InvalidInput => "invalid input",
            Self::IoError => "I/O error",
            Self::BuildFailed => "build failed",
            Self::CreationFailed => "creation failed",
            Self::UnsupportedFormat => "unsupported format",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// Error payload carried in `Response::Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error kind for programmatic handling.
    pub kind: ErrorKind,
    /// Human-readable error message.
    pub message: String,
    /// Optional context (usually the offending path).
    pub context: Option<String>,
}

impl ErrorMessage {
    /// Create a new error message without context.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Attach context to the error message.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Failures while encoding or decoding protocol envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version this build understands.
        expected: u8,
        /// Version received from the peer.
        got: u8,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
