//! # rootfm Daemon Library
//!
//! The daemon serves file operations confined to a single root directory.
//!
//! ## Overview
//!
//! - **File Engine** (`files`): path containment, listing, content, bulk
//!   move/copy, archives and the folder index
//! - **Message Router** (`router`): dispatches protocol requests to the engine
//! - **IPC** (`ipc`): newline-delimited JSON envelopes over a Unix socket
//! - **Orchestrator** (`orchestrator`): owns the socket and the accept loop
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Daemon Orchestrator                      │
//! │        (IpcServer, Status/Shutdown, per-client tasks)        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                        Message Router                        │
//! ├──────────────┬──────────────┬──────────────┬─────────────────┤
//! │  Directory   │   Content    │  BulkMover   │  ArchiveEngine  │
//! │  Lister      │   Store      │              │  FolderIndexer  │
//! ├──────────────┴──────────────┴──────────────┴─────────────────┤
//! │                          PathGuard                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.daemon.root = "/srv/files".into();
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!     orchestrator.shutdown_token().cancelled().await;
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod files;
pub mod ipc;
pub mod orchestrator;
pub mod router;

// Re-export protocol for convenience
pub use protocol;

pub use config::{Config, ConfigError};

pub use files::{
    ArchiveEngine, ArchiveOutcome, ArchiveSpec, Archiver, BulkMover, ContentLimits, ContentStore,
    DirectoryLister, FileError, FolderIndexer, PathGuard, TarArchiver, ZipArchiver,
};

pub use ipc::{get_socket_path, IpcClient, IpcConnection, IpcError, IpcServer};

pub use router::{MessageRouter, RouterError, RouterResult};

pub use orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};
