//! Archive creation and extraction.
//!
//! Archives are produced in-process with the `tar` and `zip` crates. Output
//! is written to a temp file beside the final archive and renamed into place
//! only after the codec finishes, so a failed build never leaves a partial
//! archive behind.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protocol::ArchiveFormat;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::error::{FileError, Result};
use super::guard::{normalize_relative, stays_within, PathGuard};
use super::walk::{walk, EntryKind};

/// A request to build one archive.
#[derive(Debug, Clone)]
pub struct ArchiveSpec {
    /// Archive file name; the format extension is appended when missing.
    pub archive_name: String,
    /// Members, relative to the working directory, in archive order.
    pub members: Vec<String>,
    /// Root-relative directory that members are resolved against and that
    /// receives the archive.
    pub working_directory: String,
    pub format: ArchiveFormat,
}

/// Result of a successful archive build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    /// Root-relative path of the archive.
    pub path: String,
    /// Final archive file name.
    pub archive_name: String,
    pub format: ArchiveFormat,
}

/// A resolved archive member.
#[derive(Debug, Clone)]
pub struct Member {
    /// Entry name inside the archive, `/`-separated.
    pub name: String,
    /// Absolute source path.
    pub path: PathBuf,
}

/// A container format that can pack members and unpack archives.
pub trait Archiver: Send + Sync {
    /// Format handled by this archiver.
    fn format(&self) -> ArchiveFormat;

    /// Write `members` into `output`, skipping any path listed in `exclude`.
    fn build(&self, output: &mut File, members: &[Member], exclude: &[PathBuf]) -> Result<()>;

    /// Unpack the archive at `archive` into the existing directory `target`.
    fn unpack(&self, archive: &Path, target: &Path) -> Result<()>;
}

/// Uncompressed POSIX tar.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarArchiver;

/// Zip with deflate compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiver;

fn build_failed(context: &str, err: impl std::fmt::Display) -> FileError {
    FileError::BuildFailed(format!("{context}: {err}"))
}

/// Entry name for `relative` below a member called `member_name`.
fn entry_name(member_name: &str, relative: &Path) -> String {
    let mut name = member_name.to_string();
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

impl Archiver for TarArchiver {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Tar
    }

    fn build(&self, output: &mut File, members: &[Member], exclude: &[PathBuf]) -> Result<()> {
        let mut builder = tar::Builder::new(output);
        builder.follow_symlinks(false);

        for member in members {
            for entry in walk(&member.path) {
                let entry = entry?;
                if exclude.contains(&entry.path) {
                    continue;
                }
                let name = entry_name(&member.name, &entry.relative);
                builder
                    .append_path_with_name(&entry.path, &name)
                    .map_err(|e| build_failed(&format!("adding {name}"), e))?;
            }
        }

        builder.finish().map_err(|e| build_failed("finishing tar", e))
    }

    fn unpack(&self, archive: &Path, target: &Path) -> Result<()> {
        let file = File::open(archive).map_err(|e| build_failed("opening archive", e))?;
        let mut archive = tar::Archive::new(file);
        archive
            .unpack(target)
            .map_err(|e| build_failed("unpacking tar", e))
    }
}

impl Archiver for ZipArchiver {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn build(&self, output: &mut File, members: &[Member], exclude: &[PathBuf]) -> Result<()> {
        let mut writer = ZipWriter::new(output);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for member in members {
            for entry in walk(&member.path) {
                let entry = entry?;
                if exclude.contains(&entry.path) {
                    continue;
                }
                let name = entry_name(&member.name, &entry.relative);
                match entry.kind {
                    EntryKind::Directory => {
                        writer
                            .add_directory(format!("{name}/"), options)
                            .map_err(|e| build_failed(&format!("adding {name}"), e))?;
                    }
                    EntryKind::File => {
                        writer
                            .start_file(name.clone(), options)
                            .map_err(|e| build_failed(&format!("adding {name}"), e))?;
                        let mut src = File::open(&entry.path)
                            .map_err(|e| build_failed(&format!("opening {name}"), e))?;
                        io::copy(&mut src, &mut writer)
                            .map_err(|e| build_failed(&format!("writing {name}"), e))?;
                    }
                    EntryKind::Symlink => {
                        debug!(entry = %name, "Skipping symlink in zip archive");
                    }
                }
            }
        }

        writer.finish().map_err(|e| build_failed("finishing zip", e))?;
        Ok(())
    }

    fn unpack(&self, archive: &Path, target: &Path) -> Result<()> {
        let file = File::open(archive).map_err(|e| build_failed("opening archive", e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| build_failed("reading zip", e))?;
        let target = fs::canonicalize(target).map_err(|e| build_failed("resolving target", e))?;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| build_failed("reading zip entry", e))?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(FileError::BuildFailed(format!(
                    "entry {} escapes the target directory",
                    entry.name()
                )));
            };
            let out_path = target.join(relative);

            // Names are checked lexically above; links already on disk are not.
            let contained = stays_within(&target, &out_path)
                .map_err(|e| build_failed(&format!("resolving {}", out_path.display()), e))?;
            if !contained {
                return Err(FileError::BuildFailed(format!(
                    "entry {} resolves outside the target directory",
                    entry.name()
                )));
            }

            if entry.is_dir() {
                fs::create_dir_all(&out_path)
                    .map_err(|e| build_failed(&format!("creating {}", out_path.display()), e))?;
                continue;
            }

            if fs::symlink_metadata(&out_path).is_ok_and(|m| m.file_type().is_symlink()) {
                return Err(FileError::BuildFailed(format!(
                    "entry {} would be written through a symlink",
                    entry.name()
                )));
            }
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| build_failed(&format!("creating {}", parent.display()), e))?;
            }
            let mut out = File::create(&out_path)
                .map_err(|e| build_failed(&format!("creating {}", out_path.display()), e))?;
            io::copy(&mut entry, &mut out)
                .map_err(|e| build_failed(&format!("extracting {}", out_path.display()), e))?;
        }
        Ok(())
    }
}

static TAR: TarArchiver = TarArchiver;
static ZIP: ZipArchiver = ZipArchiver;

/// The archiver for `format`.
pub fn archiver_for(format: ArchiveFormat) -> &'static dyn Archiver {
    match format {
        ArchiveFormat::Tar => &TAR,
        ArchiveFormat::Zip => &ZIP,
    }
}

/// Parse a format name, failing with `UnsupportedFormat`.
pub fn parse_format(name: &str) -> Result<ArchiveFormat> {
    ArchiveFormat::parse(name).ok_or_else(|| FileError::UnsupportedFormat(name.to_string()))
}

/// Creates and extracts archives under the root.
#[derive(Debug, Clone)]
pub struct ArchiveEngine {
    guard: Arc<PathGuard>,
}

impl ArchiveEngine {
    /// Create an engine bound to `guard`'s root.
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }

    /// Build the archive described by `spec`.
    pub fn create(&self, spec: ArchiveSpec) -> Result<ArchiveOutcome> {
        let archiver = archiver_for(spec.format);

        let trimmed = spec.archive_name.trim();
        if trimmed.is_empty() {
            return Err(FileError::InvalidInput("archive name is empty".to_string()));
        }
        if spec.members.is_empty() {
            return Err(FileError::InvalidInput("no items to archive".to_string()));
        }

        let extension = format!(".{}", spec.format.extension());
        let mut archive_name = trimmed.to_string();
        if !archive_name.to_lowercase().ends_with(&extension) {
            archive_name.push_str(&extension);
        }

        let working_dir = self.guard.resolve(&spec.working_directory)?;
        let metadata = fs::metadata(&working_dir)
            .map_err(|e| FileError::from_io(&spec.working_directory, "reading", e))?;
        if !metadata.is_dir() {
            return Err(FileError::NotADirectory(spec.working_directory.clone()));
        }

        let mut members = Vec::with_capacity(spec.members.len());
        for item in &spec.members {
            let name = normalize_relative(item)?;
            if name.is_empty() {
                return Err(FileError::InvalidInput(
                    "the working directory cannot be its own member".to_string(),
                ));
            }
            // Containment is proven on the resolved path; the walk starts from
            // the unresolved one so a symlinked member is archived as a link.
            self.guard.resolve_in(&spec.working_directory, item)?;
            let path = working_dir.join(&name);
            if fs::symlink_metadata(&path).is_err() {
                return Err(FileError::NotFound(name));
            }
            members.push(Member { name, path });
        }

        let destination = self
            .guard
            .resolve_in(&spec.working_directory, &archive_name)?;
        let parent = destination
            .parent()
            .ok_or_else(|| FileError::InvalidInput(format!("no parent for {archive_name}")))?;
        fs::create_dir_all(parent).map_err(|e| build_failed("creating archive directory", e))?;

        // Dropping the temp file on an early return removes it.
        let mut temp =
            NamedTempFile::new_in(parent).map_err(|e| build_failed("creating temp file", e))?;
        let exclude = vec![destination.clone(), temp.path().to_path_buf()];
        archiver.build(temp.as_file_mut(), &members, &exclude)?;
        temp.persist(&destination)
            .map_err(|e| build_failed("finalizing archive", e.error))?;

        if fs::metadata(&destination).is_err() {
            return Err(FileError::CreationFailed(destination));
        }

        let path = self.guard.relative(&destination);
        let archive_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(archive_name);
        info!(path = %path, format = %spec.format, members = members.len(), "Archive created");

        Ok(ArchiveOutcome {
            path,
            archive_name,
            format: archiver.format(),
        })
    }

    /// Unpack the archive at `archive_rel` into `target_rel`, creating it if needed.
    ///
    /// The format is taken from the file extension. Returns the target's
    /// root-relative path.
    pub fn extract(&self, archive_rel: &str, target_rel: &str) -> Result<String> {
        let archive_path = self.guard.resolve(archive_rel)?;
        let target = self.guard.resolve(target_rel)?;

        let format = ArchiveFormat::from_path(Path::new(archive_rel))
            .ok_or_else(|| FileError::UnsupportedFormat(archive_rel.to_string()))?;

        let metadata = fs::metadata(&archive_path)
            .map_err(|e| FileError::from_io(archive_rel, "reading", e))?;
        if metadata.is_dir() {
            return Err(FileError::IsADirectory(archive_rel.to_string()));
        }

        fs::create_dir_all(&target)
            .map_err(|e| FileError::io(format!("creating {target_rel}"), e))?;
        archiver_for(format).unpack(&archive_path, &target)?;

        let target_rel = self.guard.relative(&target);
        info!(archive = %archive_rel, target = %target_rel, format = %format, "Archive extracted");
        Ok(target_rel)
    }
}
