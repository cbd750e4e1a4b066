//! Root-confined file operations engine.
//!
//! This module provides every file operation the daemon exposes:
//! - Path containment against a single root (`PathGuard`)
//! - Directory listing and folder indexing
//! - Content reads, atomic writes, rename, delete, upload and download
//! - Bulk move/copy with per-item results
//! - Tar and zip archive creation and extraction
//!
//! # Security
//!
//! Every user-supplied path goes through `PathGuard` before it touches the
//! filesystem. Parent references and absolute paths are rejected outright;
//! everything else is canonicalized and must stay under the root.

pub mod archive;
pub mod browser;
pub mod bulk;
pub mod content;
pub mod error;
pub mod folders;
pub mod guard;
pub mod walk;

pub use archive::{ArchiveEngine, ArchiveOutcome, ArchiveSpec, Archiver, TarArchiver, ZipArchiver};
pub use browser::DirectoryLister;
pub use bulk::BulkMover;
pub use content::{ContentLimits, ContentStore, DownloadHandle};
pub use error::FileError;
pub use folders::FolderIndexer;
pub use guard::PathGuard;
