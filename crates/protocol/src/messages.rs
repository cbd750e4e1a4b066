//! Request and response definitions for rootfm.
//!
//! Clients send a `Request` wrapped in an `Envelope`; the daemon answers with
//! a `Response` in an envelope carrying the same sequence number. Envelopes
//! are encoded as single-line JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ErrorMessage, ProtocolError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope wrapper for all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number pairing a response with its request.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: T) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serialize the envelope to a single JSON line (without the newline).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    /// Deserialize an envelope and reject foreign protocol versions.
    pub fn from_json(line: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(line.trim())?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: envelope.version,
            });
        }
        Ok(envelope)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Every operation a client can ask of the daemon.
///
/// All path fields are relative to the daemon root and use `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Request {
    /// Liveness check.
    Ping,
    /// Daemon status.
    Status,
    /// Ask the daemon to stop accepting requests.
    Shutdown,
    /// List one directory level.
    List {
        /// Directory to list.
        path: String,
    },
    /// Read a file for editing or inspection.
    Read {
        /// File to read.
        path: String,
        /// Decode as text or return raw bytes.
        #[serde(default)]
        mode: ReadMode,
    },
    /// Replace a file's content, creating ancestors as needed.
    Write {
        /// File to write.
        path: String,
        /// New text content.
        content: String,
    },
    /// Rename an entry within its parent directory.
    Rename {
        /// Entry to rename.
        old_path: String,
        /// New name (no separators).
        new_name: String,
    },
    /// Delete a file, or a directory tree when `recursive` is set.
    Delete {
        /// Entry to delete.
        path: String,
        /// Remove directories and everything below them.
        #[serde(default)]
        recursive: bool,
    },
    /// Move several entries into a target directory.
    Move {
        /// Entries to move.
        items: Vec<String>,
        /// Destination directory.
        target_path: String,
    },
    /// Copy several entries into a target directory.
    Copy {
        /// Entries to copy.
        items: Vec<String>,
        /// Destination directory.
        target_path: String,
    },
    /// Create a folder under a parent directory.
    CreateFolder {
        /// Folder name; unsafe characters are replaced.
        name: String,
        /// Parent directory.
        #[serde(default)]
        path: String,
    },
    /// List every folder under the root, shallow first.
    ListFolders,
    /// Build an archive from entries of a working directory.
    Compress {
        /// Archive name; the format extension is appended if missing.
        name: String,
        /// Members, relative to the working directory.
        items: Vec<String>,
        /// Working directory.
        #[serde(default)]
        path: String,
        /// Archive format name, `tar` or `zip` in any case.
        #[serde(default = "default_archive_format")]
        format: String,
    },
    /// Unpack an archive into a directory.
    Extract {
        /// Archive to unpack.
        path: String,
        /// Destination directory.
        #[serde(default)]
        target_path: String,
    },
    /// Store an uploaded file in a directory.
    Upload {
        /// Destination directory.
        #[serde(default)]
        path: String,
        /// Name of the uploaded file.
        file_name: String,
        /// File bytes.
        #[serde(with = "base64_bytes")]
        content: Vec<u8>,
        /// Optional SHA-256 hex digest to verify before storing.
        #[serde(default)]
        checksum: Option<String>,
    },
    /// Fetch a file's bytes.
    Download {
        /// File to download.
        path: String,
    },
}

impl Request {
    /// Short operation name used in logs.
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Status => "status",
            Request::Shutdown => "shutdown",
            Request::List { .. } => "list",
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::Rename { .. } => "rename",
            Request::Delete { .. } => "delete",
            Request::Move { .. } => "move",
            Request::Copy { .. } => "copy",
            Request::CreateFolder { .. } => "create-folder",
            Request::ListFolders => "list-folders",
            Request::Compress { .. } => "compress",
            Request::Extract { .. } => "extract",
            Request::Upload { .. } => "upload",
            Request::Download { .. } => "download",
        }
    }
}

/// How `Request::Read` returns content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// UTF-8 text, subject to the edit size ceiling.
    #[default]
    Text,
    /// Raw bytes, no ceiling.
    Binary,
}

fn default_archive_format() -> String {
    ArchiveFormat::Tar.extension().to_string()
}

/// Supported archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// POSIX tar, uncompressed.
    #[default]
    Tar,
    /// Zip with deflate.
    Zip,
}

impl ArchiveFormat {
    /// Parse a format name (`tar` or `zip`, case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "tar" => Some(Self::Tar),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }

    /// Detect the format purely from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::parse)
    }

    /// Canonical extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Zip => "zip",
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Daemon answers, one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Response {
    /// Answer to `Ping`.
    Pong,
    /// Answer to `Status`.
    Status {
        /// Absolute root served by the daemon.
        root: String,
        /// Seconds since the daemon started.
        uptime_secs: u64,
        /// Requests handled so far.
        requests_served: u64,
    },
    /// Answer to `Shutdown`.
    ShuttingDown,
    /// Directory listing.
    Listing {
        /// Directory that was listed.
        path: String,
        /// Entries, directories first.
        files: Vec<FileRecord>,
    },
    /// File content.
    Content {
        /// File name.
        name: String,
        /// Size in bytes.
        size: u64,
        /// Text or bytes, depending on the requested mode.
        content: FileContent,
    },
    /// Write confirmation.
    Written {
        /// File that was written.
        path: String,
    },
    /// Rename confirmation.
    Renamed {
        /// Previous path.
        old_path: String,
        /// New path.
        new_path: String,
    },
    /// Delete confirmation.
    Deleted {
        /// Path that was removed.
        path: String,
    },
    /// Per-item results of a move or copy.
    Bulk(BulkReport),
    /// Folder creation confirmation.
    FolderCreated {
        /// Path of the new folder.
        path: String,
    },
    /// Every folder under the root.
    Folders {
        /// Folder paths, shallow first; `""` is the root.
        folders: Vec<String>,
    },
    /// Archive creation confirmation.
    ArchiveCreated {
        /// Archive path relative to the root.
        path: String,
        /// Archive file name including extension.
        archive_name: String,
        /// Archive format.
        format: ArchiveFormat,
    },
    /// Extraction confirmation.
    Extracted {
        /// Directory the archive was unpacked into.
        target_path: String,
    },
    /// Upload confirmation.
    Uploaded {
        /// Stored file name.
        file_name: String,
        /// Directory the file was stored in.
        path: String,
    },
    /// Downloaded file.
    Download {
        /// File name.
        file_name: String,
        /// Size in bytes.
        size: u64,
        /// SHA-256 hex digest of the content.
        sha256: String,
        /// File bytes.
        #[serde(with = "base64_bytes")]
        content: Vec<u8>,
    },
    /// The request failed.
    Error(ErrorMessage),
}

impl Response {
    /// Build an error response.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error(ErrorMessage::new(kind, message))
    }

    /// The error kind, if this is an error response.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Response::Error(err) => Some(err.kind),
            _ => None,
        }
    }
}

/// Metadata for one directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Entry name (not full path).
    pub name: String,
    /// Path relative to the root.
    pub path: String,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub modified: u64,
    /// Lowercase extension, `"file"` when there is none, `"folder"` for directories.
    pub type_tag: String,
}

/// File content returned by `Request::Read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum FileContent {
    /// Decoded text.
    Text(String),
    /// Raw bytes.
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

/// Which bulk operation produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperation {
    /// Rename into the target directory.
    Move,
    /// Recursive copy into the target directory.
    Copy,
}

impl BulkOperation {
    /// Past-tense verb for report messages.
    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Move => "Moved",
            Self::Copy => "Copied",
        }
    }
}

/// Outcome of a single bulk item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemOutcome {
    /// The item was transferred.
    Success,
    /// The item failed; other items are unaffected.
    Failure {
        /// Failure kind.
        kind: ErrorKind,
        /// Human-readable reason.
        reason: String,
    },
}

/// Result for one requested bulk item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    /// The item path exactly as requested.
    pub item: String,
    /// What happened to it.
    pub outcome: ItemOutcome,
}

impl BulkItemResult {
    /// Whether this item succeeded.
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Success)
    }
}

/// Aggregate result of a bulk move or copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    /// Operation that was run.
    pub operation: BulkOperation,
    /// One result per requested item, in request order.
    pub results: Vec<BulkItemResult>,
    /// Number of items that succeeded.
    pub success_count: usize,
    /// Number of items that failed.
    pub failure_count: usize,
    /// True only when every item succeeded.
    pub success: bool,
    /// Summary such as "Moved 2 item(s) successfully, 1 failed".
    pub message: String,
}

impl BulkReport {
    /// Build a report from per-item results.
    pub fn from_results(operation: BulkOperation, results: Vec<BulkItemResult>) -> Self {
        let success_count = results.iter().filter(|r| r.succeeded()).count();
        let failure_count = results.len() - success_count;
        let mut message = format!(
            "{} {} item(s) successfully",
            operation.past_tense(),
            success_count
        );
        if failure_count > 0 {
            message.push_str(&format!(", {} failed", failure_count));
        }
        Self {
            operation,
            results,
            success_count,
            failure_count,
            success: failure_count == 0,
            message,
        }
    }
}

/// Serde adapter encoding byte payloads as standard base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as a base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserialize bytes from a base64 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
