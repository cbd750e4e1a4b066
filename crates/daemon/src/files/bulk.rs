//! Multi-item move and copy with per-item results.
//!
//! Each item is handled independently: a failure is recorded against that
//! item and the remaining items are still processed. Items run sequentially
//! and results come back in request order.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::sync::Arc;

use protocol::{BulkItemResult, BulkOperation, BulkReport, ItemOutcome};
use tracing::{info, warn};

use super::error::{FileError, Result};
use super::guard::PathGuard;
use super::walk::{walk, EntryKind};

/// Runs bulk move and copy operations.
#[derive(Debug, Clone)]
pub struct BulkMover {
    guard: Arc<PathGuard>,
}

impl BulkMover {
    /// Create a mover bound to `guard`'s root.
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }

    /// Move or copy every item into `target_dir`.
    pub fn run(&self, operation: BulkOperation, items: &[String], target_dir: &str) -> BulkReport {
        let results = items
            .iter()
            .map(|item| {
                let outcome = match self.transfer(operation, item, target_dir) {
                    Ok(()) => ItemOutcome::Success,
                    Err(e) => {
                        warn!(item = %item, operation = ?operation, error = %e, "Bulk item failed");
                        ItemOutcome::Failure {
                            kind: e.kind(),
                            reason: e.to_string(),
                        }
                    }
                };
                BulkItemResult {
                    item: item.clone(),
                    outcome,
                }
            })
            .collect();

        let report = BulkReport::from_results(operation, results);
        info!(
            operation = ?operation,
            target = %target_dir,
            succeeded = report.success_count,
            failed = report.failure_count,
            "Bulk operation finished"
        );
        report
    }

    fn transfer(&self, operation: BulkOperation, item: &str, target_dir: &str) -> Result<()> {
        let source = self.guard.resolve_entry(item)?;
        if self.guard.is_root(&source) {
            return Err(FileError::InvalidInput(format!("{item:?} has no file name")));
        }
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| FileError::InvalidInput(format!("{item:?} has no file name")))?;

        let destination = self.guard.resolve_entry_in(target_dir, &name)?;

        if matches!(operation, BulkOperation::Copy) {
            let metadata = fs::symlink_metadata(&source)
                .map_err(|_| FileError::NotFound(format!("Source not found: {item}")))?;
            if metadata.is_dir() && destination.starts_with(&source) {
                return Err(FileError::InvalidInput(format!(
                    "cannot copy {item} into itself"
                )));
            }
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| FileError::io(format!("creating {target_dir}"), e))?;
        }

        match operation {
            BulkOperation::Move => fs::rename(&source, &destination)
                .map_err(|e| FileError::from_io(item, "moving", e)),
            BulkOperation::Copy => copy_tree(&source, &destination),
        }
    }
}

/// Recreate `source` at `destination`, merging into existing directories and
/// overwriting existing files. Symlinks are recreated as links, never
/// dereferenced.
fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in walk(source) {
        let entry = entry?;
        let target = if entry.relative.as_os_str().is_empty() {
            destination.to_path_buf()
        } else {
            destination.join(&entry.relative)
        };
        // Never write through a link already sitting at the target.
        unlink_if_symlink(&target)?;

        match entry.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&target)
                    .map_err(|e| FileError::io(format!("creating {}", target.display()), e))?;
            }
            EntryKind::File => {
                fs::copy(&entry.path, &target)
                    .map_err(|e| FileError::io(format!("copying {}", entry.path.display()), e))?;
            }
            EntryKind::Symlink => copy_link(&entry.path, &target)?,
        }
    }
    Ok(())
}

fn unlink_if_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::remove_file(path)
            .map_err(|e| FileError::io(format!("replacing {}", path.display()), e)),
        _ => Ok(()),
    }
}

fn copy_link(source: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(source)
        .map_err(|e| FileError::io(format!("reading link {}", source.display()), e))?;
    if let Ok(metadata) = fs::symlink_metadata(target) {
        if !metadata.is_dir() {
            fs::remove_file(target)
                .map_err(|e| FileError::io(format!("replacing {}", target.display()), e))?;
        }
    }
    symlink(&link, target)
        .map_err(|e| FileError::io(format!("linking {}", target.display()), e))
}
