//! Root containment for user-supplied paths.
//!
//! Every path that reaches the engine is a string relative to the root.
//! `PathGuard` turns it into an absolute path and proves the result stays
//! inside the root after symlinks are resolved. Parent references and
//! absolute injections are rejected before the filesystem is touched.
//!
//! Content access uses `resolve`, which follows every symlink. Operations
//! on directory entries themselves (delete, rename, move, copy) use
//! `resolve_entry`, which resolves only the parent so a symlink is acted on
//! as a link.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use super::error::{FileError, Result};

/// Resolves relative paths against a fixed root directory.
#[derive(Debug, Clone)]
pub struct PathGuard {
    /// Canonical absolute root.
    root: PathBuf,
}

impl PathGuard {
    /// Create a guard for `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let display = root.display().to_string();
        let canonical =
            fs::canonicalize(root).map_err(|e| FileError::from_io(&display, "resolving root", e))?;
        if !canonical.is_dir() {
            return Err(FileError::NotADirectory(display));
        }
        Ok(Self { root: canonical })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is the root itself.
    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    /// Resolve a root-relative path to a contained absolute path.
    ///
    /// Empty strings and `.` resolve to the root. The target need not exist.
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf> {
        let relative = normalize(user_path)?;
        self.contain(user_path, self.root.join(relative))
    }

    /// Resolve `member` relative to the directory `base`, both root-relative.
    ///
    /// `member` is validated on its own so an absolute member cannot be
    /// smuggled in by concatenation.
    pub fn resolve_in(&self, base: &str, member: &str) -> Result<PathBuf> {
        let base_rel = normalize(base)?;
        let member_rel = normalize(member)?;
        self.contain(member, self.root.join(base_rel).join(member_rel))
    }

    /// Resolve a root-relative path naming a directory entry.
    ///
    /// The parent is canonicalized and must be contained; the final
    /// component is appended unresolved, so a symlink names the link.
    pub fn resolve_entry(&self, user_path: &str) -> Result<PathBuf> {
        let relative = normalize(user_path)?;
        self.contain_entry(user_path, &relative)
    }

    /// `resolve_entry` for `member` inside the directory `base`.
    pub fn resolve_entry_in(&self, base: &str, member: &str) -> Result<PathBuf> {
        let base_rel = normalize(base)?;
        let member_rel = normalize(member)?;
        self.contain_entry(member, &base_rel.join(member_rel))
    }

    /// Render a contained absolute path as a `/`-separated root-relative string.
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }

    fn contain(&self, user_path: &str, joined: PathBuf) -> Result<PathBuf> {
        let resolved = canonicalize_existing(&joined)
            .map_err(|e| FileError::io(format!("resolving {user_path}"), e))?;

        if !resolved.starts_with(&self.root) {
            warn!(path = %user_path, resolved = %resolved.display(), "Path escapes root");
            return Err(FileError::AccessDenied(user_path.to_string()));
        }
        Ok(resolved)
    }

    fn contain_entry(&self, user_path: &str, relative: &Path) -> Result<PathBuf> {
        let (Some(parent), Some(name)) = (relative.parent(), relative.file_name()) else {
            return Ok(self.root.clone());
        };
        let parent = self.contain(user_path, self.root.join(parent))?;
        Ok(parent.join(name))
    }
}

/// Whether `path`, with any existing prefix resolved, stays under `base`.
///
/// `base` must already be canonical.
pub fn stays_within(base: &Path, path: &Path) -> std::io::Result<bool> {
    Ok(canonicalize_existing(path)?.starts_with(base))
}

/// Render a user path in canonical `/`-separated form without `.` components.
///
/// Rejects the same inputs `PathGuard::resolve` rejects lexically.
pub fn normalize_relative(user_path: &str) -> Result<String> {
    let clean = normalize(user_path)?;
    Ok(clean
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Strip `.` components and reject anything that could leave the root lexically.
fn normalize(user_path: &str) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(user_path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                warn!(path = %user_path, "Rejected path with parent or absolute component");
                return Err(FileError::AccessDenied(user_path.to_string()));
            }
        }
    }
    Ok(clean)
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the rest.
///
/// Symlinks in the existing prefix are resolved; the missing tail is kept
/// verbatim, which is safe because it contains only normal components.
fn canonicalize_existing(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();

    loop {
        match fs::canonicalize(&existing) {
            Ok(canonical) => {
                let mut resolved = canonical;
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Err(e);
                };
                missing.push(name);
                if !existing.pop() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}
