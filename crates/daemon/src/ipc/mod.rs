//! Unix Domain Socket IPC between the CLI and the daemon.
//!
//! Each message is one `Envelope` encoded as a single JSON line. A client
//! writes an `Envelope<Request>` and reads back an `Envelope<Response>` with
//! the same sequence number.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/rootfm/daemon.sock`
//! - Fallback: `/tmp/rootfm-$UID/daemon.sock`
//!
//! `daemon.socket_path` in the config file overrides both.
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::{IpcClient, get_socket_path};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!     if client.ping().await? {
//!         println!("Daemon is running");
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod server;

pub use client::{IpcClient, DEFAULT_TIMEOUT_SECS, FILE_OPERATION_TIMEOUT_SECS};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the default socket path for IPC communication.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/rootfm/daemon.sock`
/// 2. Otherwise: `/tmp/rootfm-$UID/daemon.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("rootfm").join("daemon.sock")
    } else {
        // The owner of /proc/self is the current user
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/rootfm-{}", uid)).join("daemon.sock")
    }
}

#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/rootfm-unsupported/daemon.sock")
}
