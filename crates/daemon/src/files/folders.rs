//! Bounded-depth index of every folder under the root.

use std::cmp::Ordering;
use std::fs;
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use super::error::{FileError, Result};
use super::guard::PathGuard;

/// Default number of path segments the indexer descends.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Enumerates folders for destination pickers.
#[derive(Debug, Clone)]
pub struct FolderIndexer {
    guard: Arc<PathGuard>,
    max_depth: usize,
}

impl FolderIndexer {
    /// Create an indexer that descends at most `max_depth` levels below the root.
    pub fn new(guard: Arc<PathGuard>, max_depth: usize) -> Self {
        Self { guard, max_depth }
    }

    /// Every folder up to `max_depth` segments deep, shallow first.
    ///
    /// The root itself is always present as `""`. Symlinked directories are
    /// not followed and unreadable subtrees are skipped.
    pub fn list_folders(&self) -> Result<Vec<String>> {
        let root = self.guard.root();
        fs::read_dir(root).map_err(|e| FileError::io("reading root", e))?;

        let mut folders: Vec<String> = WalkDir::new(root)
            .follow_links(false)
            .max_depth(self.max_depth)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable folder");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| self.guard.relative(entry.path()))
            .collect();

        folders.sort_by(|a, b| compare_folders(a, b));
        Ok(folders)
    }
}

fn depth(folder: &str) -> usize {
    if folder.is_empty() {
        0
    } else {
        folder.split('/').count()
    }
}

/// Shallow folders first, then lexical order.
fn compare_folders(a: &str, b: &str) -> Ordering {
    depth(a).cmp(&depth(b)).then_with(|| a.cmp(b))
}
