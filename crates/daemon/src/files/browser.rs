//! Directory listing with path validation.
//!
//! Listings are produced fresh on every call. Each entry becomes a
//! `FileRecord` carrying its root-relative path, so clients never see
//! absolute paths on the host.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use protocol::FileRecord;
use tracing::debug;

use super::error::{FileError, Result};
use super::guard::PathGuard;

/// Lists one directory level under the root.
#[derive(Debug, Clone)]
pub struct DirectoryLister {
    guard: Arc<PathGuard>,
    /// Whether entries starting with '.' are included.
    show_hidden: bool,
}

impl DirectoryLister {
    /// Create a lister that hides dot-entries.
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self {
            guard,
            show_hidden: false,
        }
    }

    /// Set whether hidden entries are listed.
    pub fn show_hidden(mut self, show: bool) -> Self {
        self.show_hidden = show;
        self
    }

    /// List the contents of a directory, directories first.
    pub fn list(&self, rel: &str) -> Result<Vec<FileRecord>> {
        let dir = self.guard.resolve(rel)?;

        let metadata = fs::metadata(&dir).map_err(|e| FileError::from_io(rel, "reading", e))?;
        if !metadata.is_dir() {
            return Err(FileError::NotADirectory(rel.to_string()));
        }

        let entries = fs::read_dir(&dir).map_err(|e| FileError::from_io(rel, "listing", e))?;

        let mut records = Vec::new();
        for entry_result in entries {
            let entry = match entry_result {
                Ok(e) => e,
                Err(e) => {
                    debug!(path = %rel, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.show_hidden && name.starts_with('.') {
                continue;
            }

            // Follows symlinks so a link to a directory lists as a folder.
            let metadata = match fs::metadata(entry.path()) {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "Skipping entry without metadata");
                    continue;
                }
            };

            let is_directory = metadata.is_dir();
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);

            records.push(FileRecord {
                type_tag: type_tag(&name, is_directory),
                path: self.guard.relative(&dir.join(&name)),
                name,
                is_directory,
                size: if is_directory { 0 } else { metadata.len() },
                modified,
            });
        }

        records.sort_by(compare_records);
        Ok(records)
    }
}

/// Listing order: directories first, then case-insensitive name with a
/// case-sensitive tiebreak.
pub fn compare_records(a: &FileRecord, b: &FileRecord) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Lowercase extension for files, "file" without one, "folder" for directories.
fn type_tag(name: &str, is_directory: bool) -> String {
    if is_directory {
        return "folder".to_string();
    }
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "file".to_string())
}
