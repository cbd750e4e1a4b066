//! File content operations: read, write, remove, rename, folder creation,
//! upload and download.
//!
//! Writes never leave a partially written file at the destination: content
//! goes to a temp file in the destination directory and is renamed into
//! place once fully written.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::error::{FileError, Result};
use super::guard::PathGuard;

/// Default ceiling for text reads (1 MiB).
pub const DEFAULT_MAX_EDIT_SIZE: u64 = 1024 * 1024;

/// Default ceiling for uploads (100 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Size ceilings applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLimits {
    /// Largest file `read_text` will return.
    pub max_edit_size: u64,
    /// Largest accepted upload.
    pub max_upload_size: u64,
}

impl Default for ContentLimits {
    fn default() -> Self {
        Self {
            max_edit_size: DEFAULT_MAX_EDIT_SIZE,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

/// Text content of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFile {
    pub name: String,
    pub size: u64,
    pub content: String,
}

/// Raw content of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFile {
    pub name: String,
    pub size: u64,
    pub content: Vec<u8>,
}

/// An open file ready to be streamed to a client.
#[derive(Debug)]
pub struct DownloadHandle {
    pub name: String,
    pub size: u64,
    pub file: File,
}

impl DownloadHandle {
    /// Read the whole file, returning its bytes and SHA-256 hex digest.
    pub fn read_all(mut self) -> Result<(Vec<u8>, String)> {
        let mut content = Vec::with_capacity(self.size as usize);
        self.file
            .read_to_end(&mut content)
            .map_err(|e| FileError::io(format!("reading {}", self.name), e))?;
        let digest = sha256_hex(&content);
        Ok((content, digest))
    }
}

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reads and mutates individual files under the root.
#[derive(Debug, Clone)]
pub struct ContentStore {
    guard: Arc<PathGuard>,
    limits: ContentLimits,
}

impl ContentStore {
    /// Create a store with the given limits.
    pub fn new(guard: Arc<PathGuard>, limits: ContentLimits) -> Self {
        Self { guard, limits }
    }

    /// Read a file as text, replacing invalid UTF-8 sequences.
    pub fn read_text(&self, rel: &str) -> Result<TextFile> {
        let (mut file, name, size) = self.open_file(rel)?;
        if size > self.limits.max_edit_size {
            return Err(FileError::TooLarge {
                size,
                limit: self.limits.max_edit_size,
            });
        }

        let mut bytes = Vec::with_capacity(size as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| FileError::io(format!("reading {rel}"), e))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();

        debug!(path = %rel, size, "Read text file");
        Ok(TextFile {
            name,
            size,
            content,
        })
    }

    /// Read a file's raw bytes without a size ceiling.
    pub fn read_binary(&self, rel: &str) -> Result<BinaryFile> {
        let (mut file, name, size) = self.open_file(rel)?;
        let mut content = Vec::with_capacity(size as usize);
        file.read_to_end(&mut content)
            .map_err(|e| FileError::io(format!("reading {rel}"), e))?;
        Ok(BinaryFile {
            name,
            size,
            content,
        })
    }

    /// Open a file for download.
    pub fn download(&self, rel: &str) -> Result<DownloadHandle> {
        let (file, name, size) = self.open_file(rel)?;
        info!(path = %rel, size, "Download started");
        Ok(DownloadHandle { name, size, file })
    }

    /// Replace a file's content, creating missing ancestors.
    pub fn write(&self, rel: &str, content: &[u8]) -> Result<String> {
        let path = self.guard.resolve(rel)?;
        if path.is_dir() {
            return Err(FileError::IsADirectory(rel.to_string()));
        }

        write_atomic(&path, content, rel)?;
        info!(path = %rel, size = content.len(), "File written");
        Ok(self.guard.relative(&path))
    }

    /// Delete a file, or a directory tree when `recursive` is set.
    ///
    /// A symlink is removed as a link; its target is untouched.
    pub fn remove(&self, rel: &str, recursive: bool) -> Result<()> {
        let path = self.guard.resolve_entry(rel)?;
        if self.guard.is_root(&path) {
            return Err(FileError::InvalidInput("cannot delete the root".to_string()));
        }

        let metadata =
            fs::symlink_metadata(&path).map_err(|e| FileError::from_io(rel, "reading", e))?;

        if metadata.is_dir() {
            if !recursive {
                return Err(FileError::IsADirectory(rel.to_string()));
            }
            fs::remove_dir_all(&path).map_err(|e| FileError::io(format!("deleting {rel}"), e))?;
        } else {
            fs::remove_file(&path).map_err(|e| FileError::io(format!("deleting {rel}"), e))?;
        }

        info!(path = %rel, recursive, "Deleted");
        Ok(())
    }

    /// Rename an entry within its parent directory. Returns the new relative path.
    pub fn rename(&self, old_rel: &str, new_name: &str) -> Result<String> {
        validate_name(new_name)?;

        let old_path = self.guard.resolve_entry(old_rel)?;
        if self.guard.is_root(&old_path) {
            return Err(FileError::InvalidInput("cannot rename the root".to_string()));
        }
        if fs::symlink_metadata(&old_path).is_err() {
            return Err(FileError::NotFound(old_rel.to_string()));
        }

        let parent_rel = old_path
            .parent()
            .map(|p| self.guard.relative(p))
            .unwrap_or_default();
        let new_path = self.guard.resolve_entry_in(&parent_rel, new_name)?;
        if fs::symlink_metadata(&new_path).is_ok() {
            return Err(FileError::Conflict(self.guard.relative(&new_path)));
        }

        fs::rename(&old_path, &new_path)
            .map_err(|e| FileError::io(format!("renaming {old_rel}"), e))?;

        let new_rel = self.guard.relative(&new_path);
        info!(from = %old_rel, to = %new_rel, "Renamed");
        Ok(new_rel)
    }

    /// Create a folder under `parent_rel`. Returns the new relative path.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are replaced with `_`. An existing
    /// folder of the same name is not an error.
    pub fn create_folder(&self, parent_rel: &str, name: &str) -> Result<String> {
        let sanitized = sanitize_folder_name(name);
        if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
            return Err(FileError::InvalidName(name.to_string()));
        }

        let path = self.guard.resolve_in(parent_rel, &sanitized)?;
        fs::create_dir_all(&path)
            .map_err(|e| FileError::io(format!("creating folder {sanitized}"), e))?;

        let rel = self.guard.relative(&path);
        info!(path = %rel, "Folder created");
        Ok(rel)
    }

    /// Store uploaded bytes as `dir_rel/file_name`. Returns the stored relative path.
    ///
    /// When `checksum` is given it must be the SHA-256 hex digest of `content`;
    /// on mismatch nothing is written.
    pub fn upload(
        &self,
        dir_rel: &str,
        file_name: &str,
        content: &[u8],
        checksum: Option<&str>,
    ) -> Result<String> {
        validate_name(file_name)?;

        let size = content.len() as u64;
        if size > self.limits.max_upload_size {
            return Err(FileError::TooLarge {
                size,
                limit: self.limits.max_upload_size,
            });
        }

        if let Some(expected) = checksum {
            let actual = sha256_hex(content);
            if !expected.eq_ignore_ascii_case(&actual) {
                warn!(file = %file_name, expected = %expected, actual = %actual, "Upload checksum mismatch");
                return Err(FileError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let dir = self.guard.resolve(dir_rel)?;
        if dir.exists() && !dir.is_dir() {
            return Err(FileError::NotADirectory(dir_rel.to_string()));
        }
        let path = self.guard.resolve_in(dir_rel, file_name)?;
        if path.is_dir() {
            return Err(FileError::IsADirectory(self.guard.relative(&path)));
        }

        write_atomic(&path, content, file_name)?;

        let rel = self.guard.relative(&path);
        info!(path = %rel, size, "Upload stored");
        Ok(rel)
    }

    fn open_file(&self, rel: &str) -> Result<(File, String, u64)> {
        let path = self.guard.resolve(rel)?;
        let metadata = fs::metadata(&path).map_err(|e| FileError::from_io(rel, "reading", e))?;
        if metadata.is_dir() {
            return Err(FileError::IsADirectory(rel.to_string()));
        }

        let file = File::open(&path).map_err(|e| FileError::from_io(rel, "opening", e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok((file, name, metadata.len()))
    }
}

/// Write `content` to a temp file beside `path`, then rename it into place.
pub(crate) fn write_atomic(path: &Path, content: &[u8], label: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| FileError::InvalidInput(format!("no parent directory for {label}")))?;
    fs::create_dir_all(parent)
        .map_err(|e| FileError::io(format!("creating parent of {label}"), e))?;

    let mut temp = NamedTempFile::new_in(parent)
        .map_err(|e| FileError::io(format!("creating temp file for {label}"), e))?;
    temp.write_all(content)
        .map_err(|e| FileError::io(format!("writing {label}"), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| FileError::io(format!("syncing {label}"), e))?;
    temp.persist(path)
        .map_err(|e| FileError::io(format!("finalizing {label}"), e.error))?;
    Ok(())
}

/// Reject names that are empty, dot entries, or contain separators.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(FileError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn sanitize_folder_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
