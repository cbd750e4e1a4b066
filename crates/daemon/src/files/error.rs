//! Error type shared by every file operation.

use std::path::PathBuf;

use protocol::{ErrorKind, ErrorMessage};
use thiserror::Error;

/// Errors that can occur during file operations.
#[derive(Debug, Error)]
pub enum FileError {
    /// The path resolves outside the root, or contains a parent/absolute component.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The requested path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested path is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The requested path is a directory, not a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Content exceeds a configured ceiling.
    #[error("too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    /// The destination already exists.
    #[error("already exists: {0}")]
    Conflict(String),

    /// A supplied name is empty, a dot entry, or contains separators.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// The request cannot be carried out as given.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Upload content does not match the supplied digest.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Underlying filesystem failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The archive codec failed.
    #[error("archive build failed: {0}")]
    BuildFailed(String),

    /// The archive was reported built but is missing on disk.
    #[error("archive was not created: {0}")]
    CreationFailed(PathBuf),

    /// The archive format or extension is not recognized.
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),
}

/// Result type alias for file operations.
pub type Result<T> = std::result::Result<T, FileError>;

impl FileError {
    /// Wrap an IO error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FileError::Io {
            context: context.into(),
            source,
        }
    }

    /// Map an IO error on `path`, turning `NotFound` into the dedicated variant.
    pub fn from_io(path: &str, context: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound(path.to_string()),
            _ => FileError::io(format!("{context} {path}"), source),
        }
    }

    /// The protocol error kind this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FileError::AccessDenied(_) => ErrorKind::AccessDenied,
            FileError::NotFound(_) => ErrorKind::NotFound,
            FileError::NotADirectory(_) => ErrorKind::NotADirectory,
            FileError::IsADirectory(_) => ErrorKind::IsADirectory,
            FileError::TooLarge { .. } => ErrorKind::TooLarge,
            FileError::Conflict(_) => ErrorKind::Conflict,
            FileError::InvalidName(_) => ErrorKind::InvalidName,
            FileError::InvalidInput(_) | FileError::ChecksumMismatch { .. } => {
                ErrorKind::InvalidInput
            }
            FileError::Io { .. } => ErrorKind::IoError,
            FileError::BuildFailed(_) => ErrorKind::BuildFailed,
            FileError::CreationFailed(_) => ErrorKind::CreationFailed,
            FileError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
        }
    }

    /// Convert to a protocol error message.
    pub fn to_error_message(&self) -> ErrorMessage {
        ErrorMessage::new(self.kind(), self.to_string())
    }
}
