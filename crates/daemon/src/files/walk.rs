//! Depth-first tree walk shared by recursive copy and archive creation.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::error::{FileError, Result};

/// Kind of entry produced by a walk. Symlinks are reported, never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

/// One entry of a tree walk.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Path relative to the walk start; empty for the start itself.
    pub relative: PathBuf,
    /// Entry kind.
    pub kind: EntryKind,
}

/// Walk `start` depth-first in pre-order, parents before children and
/// siblings ordered by file name.
///
/// The start entry itself is yielded first, as a symlink if it is one.
/// Errors stop the walk.
pub fn walk(start: &Path) -> impl Iterator<Item = Result<WalkEntry>> + '_ {
    WalkDir::new(start)
        .follow_links(false)
        .follow_root_links(false)
        .sort_by_file_name()
        .into_iter()
        .map(move |entry| {
            let entry = entry.map_err(|e| {
                let context = format!("walking {}", start.display());
                FileError::io(context, e.into())
            })?;
            let file_type = entry.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            let relative = entry
                .path()
                .strip_prefix(start)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            Ok(WalkEntry {
                path: entry.into_path(),
                relative,
                kind,
            })
        })
}
