//! Configuration management for the rootfm daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/rootfm/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::content::{DEFAULT_MAX_EDIT_SIZE, DEFAULT_MAX_UPLOAD_SIZE};
use crate::files::folders::DEFAULT_MAX_DEPTH;
use crate::files::ContentLimits;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_edit_size must be greater than 0, got {0}")]
    InvalidMaxEditSize(u64),

    #[error("max_upload_size must be greater than 0, got {0}")]
    InvalidMaxUploadSize(u64),

    #[error("max_depth must be between 1 and 32, got {0}")]
    InvalidMaxDepth(usize),

    #[error("archive timeout must be at most 86400 seconds, got {0}")]
    InvalidArchiveTimeout(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `folders.max_depth`.
const MAX_FOLDER_DEPTH: usize = 32;

/// Upper bound for `archive.timeout_secs` (one day).
const MAX_ARCHIVE_TIMEOUT_SECS: u64 = 86_400;

/// Main configuration structure for the rootfm daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// File operation limits and listing options.
    pub file: FileConfig,

    /// Folder index settings.
    pub folders: FoldersConfig,

    /// Archive settings.
    pub archive: ArchiveConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory every operation is confined to.
    pub root: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily rotated log files. Logs go to stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Unix socket the daemon listens on. Defaults to the XDG runtime directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

/// File operation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Largest file returned by a text read, in bytes (default: 1MB).
    pub max_edit_size: u64,

    /// Largest accepted upload, in bytes (default: 100MB).
    pub max_upload_size: u64,

    /// Include dot-entries in directory listings.
    pub show_hidden: bool,
}

/// Folder index configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FoldersConfig {
    /// Number of path segments the folder index descends.
    pub max_depth: usize,
}

/// Archive configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Seconds an archive operation may run (0 = no timeout).
    pub timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            log_level: "info".to_string(),
            log_dir: None,
            socket_path: None,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            max_edit_size: DEFAULT_MAX_EDIT_SIZE,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            show_hidden: false,
        }
    }
}

impl FileConfig {
    /// Size ceilings for the content store.
    pub fn limits(&self) -> ContentLimits {
        ContentLimits {
            max_edit_size: self.max_edit_size,
            max_upload_size: self.max_upload_size,
        }
    }
}

impl Default for FoldersConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300, // 5 minutes
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rootfm")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - ROOTFM_ROOT: Override the served root directory
    /// - ROOTFM_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("ROOTFM_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding root from environment: {}", root);
                self.daemon.root = PathBuf::from(root);
            }
        }

        if let Ok(level) = std::env::var("ROOTFM_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file.max_edit_size == 0 {
            return Err(ConfigError::InvalidMaxEditSize(self.file.max_edit_size));
        }

        if self.file.max_upload_size == 0 {
            return Err(ConfigError::InvalidMaxUploadSize(self.file.max_upload_size));
        }

        let depth = self.folders.max_depth;
        if !(1..=MAX_FOLDER_DEPTH).contains(&depth) {
            return Err(ConfigError::InvalidMaxDepth(depth));
        }

        if self.archive.timeout_secs > MAX_ARCHIVE_TIMEOUT_SECS {
            return Err(ConfigError::InvalidArchiveTimeout(self.archive.timeout_secs));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// The socket path from the config, or the per-user default.
    pub fn socket_path(&self) -> PathBuf {
        self.daemon
            .socket_path
            .clone()
            .unwrap_or_else(crate::ipc::get_socket_path)
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
