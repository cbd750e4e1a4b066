//! Request router dispatching decoded requests to the file engine.
//!
//! `MessageRouter` owns one instance of each engine component, all sharing
//! a single `PathGuard`. Engine calls block on the filesystem, so every one
//! runs on tokio's blocking pool. Control requests (`Status`, `Shutdown`)
//! belong to the orchestrator and are rejected here.

use std::sync::Arc;
use std::time::Duration;

use protocol::{BulkOperation, ErrorKind, ErrorMessage, FileContent, ReadMode, Request, Response};
use tracing::{debug, warn};

use crate::config::Config;
use crate::files::archive::parse_format;
use crate::files::{
    ArchiveEngine, ArchiveSpec, BulkMover, ContentStore, DirectoryLister, FileError,
    FolderIndexer, PathGuard,
};

/// Result type for router operations.
pub type RouterResult = Result<Response, RouterError>;

/// Errors that can occur while routing a request.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The engine rejected the operation.
    #[error(transparent)]
    File(#[from] FileError),

    /// An archive operation ran past its deadline.
    #[error("{operation} timed out after {secs} seconds")]
    Timeout { operation: &'static str, secs: u64 },

    /// The request is not handled by the router.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A blocking task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Protocol error kind for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::File(e) => e.kind(),
            RouterError::Timeout { .. } => ErrorKind::BuildFailed,
            RouterError::InvalidRequest(_) => ErrorKind::InvalidInput,
            RouterError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Convert the error to a protocol `ErrorMessage`.
    pub fn to_error_message(&self, context: Option<String>) -> ErrorMessage {
        let message = ErrorMessage::new(self.kind(), self.to_string());
        match context {
            Some(context) => message.with_context(context),
            None => message,
        }
    }
}

/// Dispatches requests to the engine component that serves them.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    guard: Arc<PathGuard>,
    lister: Arc<DirectoryLister>,
    content: Arc<ContentStore>,
    bulk: Arc<BulkMover>,
    archives: Arc<ArchiveEngine>,
    folders: Arc<FolderIndexer>,
    /// `None` disables the archive deadline.
    archive_timeout: Option<Duration>,
}

impl MessageRouter {
    /// Build a router over `guard` using the limits in `config`.
    pub fn new(guard: Arc<PathGuard>, config: &Config) -> Self {
        let lister = DirectoryLister::new(Arc::clone(&guard)).show_hidden(config.file.show_hidden);
        let content = ContentStore::new(Arc::clone(&guard), config.file.limits());
        let archive_timeout = match config.archive.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            lister: Arc::new(lister),
            content: Arc::new(content),
            bulk: Arc::new(BulkMover::new(Arc::clone(&guard))),
            archives: Arc::new(ArchiveEngine::new(Arc::clone(&guard))),
            folders: Arc::new(FolderIndexer::new(
                Arc::clone(&guard),
                config.folders.max_depth,
            )),
            guard,
            archive_timeout,
        }
    }

    /// The guard shared by every component.
    pub fn guard(&self) -> &Arc<PathGuard> {
        &self.guard
    }

    /// Route a request and always produce a response.
    ///
    /// Failures become `Response::Error` carrying the request's primary path
    /// as context.
    pub async fn handle(&self, request: Request) -> Response {
        let operation = request.operation();
        let context = error_context(&request);

        match self.route(request).await {
            Ok(response) => response,
            Err(e) => {
                match e.kind() {
                    ErrorKind::Internal | ErrorKind::IoError | ErrorKind::BuildFailed => {
                        warn!(operation, error = %e, "Request failed")
                    }
                    _ => debug!(operation, error = %e, "Request rejected"),
                }
                Response::Error(e.to_error_message(context))
            }
        }
    }

    /// Route a request to its handler.
    pub async fn route(&self, request: Request) -> RouterResult {
        let operation = request.operation();
        debug!(operation, "Routing request");

        match request {
            Request::Ping => Ok(Response::Pong),
            Request::Status | Request::Shutdown => Err(RouterError::InvalidRequest(format!(
                "{operation} is handled by the daemon, not the file router"
            ))),

            Request::List { path } => self.handle_list(path).await,
            Request::Read { path, mode } => self.handle_read(path, mode).await,
            Request::Write { path, content } => self.handle_write(path, content).await,
            Request::Rename { old_path, new_name } => {
                self.handle_rename(old_path, new_name).await
            }
            Request::Delete { path, recursive } => self.handle_delete(path, recursive).await,
            Request::Move { items, target_path } => {
                self.handle_bulk(BulkOperation::Move, items, target_path)
                    .await
            }
            Request::Copy { items, target_path } => {
                self.handle_bulk(BulkOperation::Copy, items, target_path)
                    .await
            }
            Request::CreateFolder { name, path } => self.handle_create_folder(path, name).await,
            Request::ListFolders => self.handle_list_folders().await,
            Request::Compress {
                name,
                items,
                path,
                format,
            } => self.handle_compress(name, items, path, format).await,
            Request::Extract { path, target_path } => {
                self.handle_extract(path, target_path).await
            }
            Request::Upload {
                path,
                file_name,
                content,
                checksum,
            } => self.handle_upload(path, file_name, content, checksum).await,
            Request::Download { path } => self.handle_download(path).await,
        }
    }

    // =========================================================================
    // Browsing
    // =========================================================================

    async fn handle_list(&self, path: String) -> RouterResult {
        let lister = Arc::clone(&self.lister);
        let rel = path.clone();
        let files = run_blocking(move || lister.list(&rel)).await?;
        Ok(Response::Listing { path, files })
    }

    async fn handle_list_folders(&self) -> RouterResult {
        let folders = Arc::clone(&self.folders);
        let folders = run_blocking(move || folders.list_folders()).await?;
        Ok(Response::Folders { folders })
    }

    // =========================================================================
    // Content
    // =========================================================================

    async fn handle_read(&self, path: String, mode: ReadMode) -> RouterResult {
        let content = Arc::clone(&self.content);
        run_blocking(move || match mode {
            ReadMode::Text => content.read_text(&path).map(|file| Response::Content {
                name: file.name,
                size: file.size,
                content: FileContent::Text(file.content),
            }),
            ReadMode::Binary => content.read_binary(&path).map(|file| Response::Content {
                name: file.name,
                size: file.size,
                content: FileContent::Binary(file.content),
            }),
        })
        .await
    }

    async fn handle_write(&self, path: String, text: String) -> RouterResult {
        let content = Arc::clone(&self.content);
        let path = run_blocking(move || content.write(&path, text.as_bytes())).await?;
        Ok(Response::Written { path })
    }

    async fn handle_rename(&self, old_path: String, new_name: String) -> RouterResult {
        let content = Arc::clone(&self.content);
        let old = old_path.clone();
        let new_path = run_blocking(move || content.rename(&old, &new_name)).await?;
        Ok(Response::Renamed { old_path, new_path })
    }

    async fn handle_delete(&self, path: String, recursive: bool) -> RouterResult {
        let content = Arc::clone(&self.content);
        let rel = path.clone();
        run_blocking(move || content.remove(&rel, recursive)).await?;
        Ok(Response::Deleted { path })
    }

    async fn handle_create_folder(&self, parent: String, name: String) -> RouterResult {
        let content = Arc::clone(&self.content);
        let path = run_blocking(move || content.create_folder(&parent, &name)).await?;
        Ok(Response::FolderCreated { path })
    }

    async fn handle_upload(
        &self,
        dir: String,
        file_name: String,
        bytes: Vec<u8>,
        checksum: Option<String>,
    ) -> RouterResult {
        let content = Arc::clone(&self.content);
        let name = file_name.clone();
        let stored = run_blocking(move || {
            content.upload(&dir, &name, &bytes, checksum.as_deref())
        })
        .await?;

        let path = stored
            .rsplit_once('/')
            .map(|(parent, _)| parent.to_string())
            .unwrap_or_default();
        Ok(Response::Uploaded { file_name, path })
    }

    async fn handle_download(&self, path: String) -> RouterResult {
        let content = Arc::clone(&self.content);
        run_blocking(move || {
            let handle = content.download(&path)?;
            let file_name = handle.name.clone();
            let size = handle.size;
            let (content, sha256) = handle.read_all()?;
            Ok(Response::Download {
                file_name,
                size,
                sha256,
                content,
            })
        })
        .await
    }

    // =========================================================================
    // Bulk and archives
    // =========================================================================

    async fn handle_bulk(
        &self,
        operation: BulkOperation,
        items: Vec<String>,
        target_path: String,
    ) -> RouterResult {
        let bulk = Arc::clone(&self.bulk);
        let report = tokio::task::spawn_blocking(move || bulk.run(operation, &items, &target_path))
            .await
            .map_err(|e| RouterError::Internal(e.to_string()))?;
        Ok(Response::Bulk(report))
    }

    async fn handle_compress(
        &self,
        name: String,
        items: Vec<String>,
        path: String,
        format: String,
    ) -> RouterResult {
        let format = parse_format(&format)?;
        let archives = Arc::clone(&self.archives);
        let spec = ArchiveSpec {
            archive_name: name,
            members: items,
            working_directory: path,
            format,
        };
        let outcome = self
            .with_archive_deadline("compress", move || archives.create(spec))
            .await?;
        Ok(Response::ArchiveCreated {
            path: outcome.path,
            archive_name: outcome.archive_name,
            format: outcome.format,
        })
    }

    async fn handle_extract(&self, path: String, target_path: String) -> RouterResult {
        let archives = Arc::clone(&self.archives);
        let target = target_path.clone();
        self.with_archive_deadline("extract", move || archives.extract(&path, &target))
            .await?;
        Ok(Response::Extracted { target_path })
    }

    /// Run an archive job on the blocking pool, bounded by the configured deadline.
    ///
    /// On expiry the job keeps running to completion in the background but
    /// the caller sees `BuildFailed`.
    async fn with_archive_deadline<T, F>(
        &self,
        operation: &'static str,
        job: F,
    ) -> Result<T, RouterError>
    where
        F: FnOnce() -> crate::files::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match self.archive_timeout {
            None => run_blocking(job).await,
            Some(deadline) => tokio::time::timeout(deadline, run_blocking(job))
                .await
                .map_err(|_| {
                    warn!(operation, secs = deadline.as_secs(), "Archive operation timed out");
                    RouterError::Timeout {
                        operation,
                        secs: deadline.as_secs(),
                    }
                })?,
        }
    }
}

async fn run_blocking<T, F>(job: F) -> Result<T, RouterError>
where
    F: FnOnce() -> crate::files::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| RouterError::Internal(e.to_string()))?
        .map_err(RouterError::from)
}

/// The path an error response should point at.
fn error_context(request: &Request) -> Option<String> {
    match request {
        Request::List { path }
        | Request::Read { path, .. }
        | Request::Write { path, .. }
        | Request::Delete { path, .. }
        | Request::Extract { path, .. }
        | Request::Download { path } => Some(path.clone()),
        Request::Rename { old_path, .. } => Some(old_path.clone()),
        Request::Move { target_path, .. } | Request::Copy { target_path, .. } => {
            Some(target_path.clone())
        }
        Request::CreateFolder { path, .. }
        | Request::Compress { path, .. }
        | Request::Upload { path, .. } => Some(path.clone()),
        Request::Ping | Request::Status | Request::Shutdown | Request::ListFolders => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::content::sha256_hex;
    use protocol::{ArchiveFormat, ItemOutcome};
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.daemon.root = temp_dir.path().to_path_buf();
        config
    }

    fn create_test_router(temp_dir: &TempDir) -> MessageRouter {
        let config = create_test_config(temp_dir);
        let guard = Arc::new(PathGuard::new(&config.daemon.root).unwrap());
        MessageRouter::new(guard, &config)
    }

    #[tokio::test]
    async fn test_route_ping() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        assert_eq!(router.handle(Request::Ping).await, Response::Pong);
    }

    #[tokio::test]
    async fn test_control_requests_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let response = router.handle(Request::Shutdown).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_route_list() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("docs")).unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        let router = create_test_router(&temp_dir);

        let response = router
            .handle(Request::List {
                path: String::new(),
            })
            .await;
        match response {
            Response::Listing { files, .. } => {
                let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names, vec!["docs", "a.txt"]);
            }
            other => panic!("Expected Listing, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_escape_denied_with_context() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let response = router
            .handle(Request::List {
                path: "../etc".to_string(),
            })
            .await;
        match response {
            Response::Error(err) => {
                assert_eq!(err.kind, ErrorKind::AccessDenied);
                assert_eq!(err.context.as_deref(), Some("../etc"));
            }
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let written = router
            .handle(Request::Write {
                path: "notes/todo.md".to_string(),
                content: "- ship it\n".to_string(),
            })
            .await;
        assert_eq!(
            written,
            Response::Written {
                path: "notes/todo.md".to_string()
            }
        );

        let read = router
            .handle(Request::Read {
                path: "notes/todo.md".to_string(),
                mode: ReadMode::Text,
            })
            .await;
        assert_eq!(
            read,
            Response::Content {
                name: "todo.md".to_string(),
                size: 10,
                content: FileContent::Text("- ship it\n".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_route_read_binary() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("blob.bin"), [0u8, 159, 146, 150]).unwrap();
        let router = create_test_router(&temp_dir);

        let response = router
            .handle(Request::Read {
                path: "blob.bin".to_string(),
                mode: ReadMode::Binary,
            })
            .await;
        match response {
            Response::Content { content, size, .. } => {
                assert_eq!(size, 4);
                assert_eq!(content, FileContent::Binary(vec![0, 159, 146, 150]));
            }
            other => panic!("Expected Content, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_rename_conflict() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        fs::write(temp_dir.path().join("b.txt"), "b").unwrap();
        let router = create_test_router(&temp_dir);

        let response = router
            .handle(Request::Rename {
                old_path: "a.txt".to_string(),
                new_name: "b.txt".to_string(),
            })
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::Conflict));
        assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(temp_dir.path().join("b.txt")).unwrap(), "b");
    }

    #[tokio::test]
    async fn test_route_rename_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        let router = create_test_router(&temp_dir);

        let renamed = router
            .handle(Request::Rename {
                old_path: "a.txt".to_string(),
                new_name: "c.txt".to_string(),
            })
            .await;
        assert_eq!(
            renamed,
            Response::Renamed {
                old_path: "a.txt".to_string(),
                new_path: "c.txt".to_string(),
            }
        );

        let deleted = router
            .handle(Request::Delete {
                path: "c.txt".to_string(),
                recursive: false,
            })
            .await;
        assert_eq!(
            deleted,
            Response::Deleted {
                path: "c.txt".to_string()
            }
        );
        assert!(!temp_dir.path().join("c.txt").exists());
    }

    #[tokio::test]
    async fn test_route_bulk_copy_partial_failure() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        fs::write(temp_dir.path().join("b.txt"), "b").unwrap();
        fs::create_dir(temp_dir.path().join("dest")).unwrap();
        let router = create_test_router(&temp_dir);

        let response = router
            .handle(Request::Copy {
                items: vec![
                    "a.txt".to_string(),
                    "missing.txt".to_string(),
                    "b.txt".to_string(),
                ],
                target_path: "dest".to_string(),
            })
            .await;
        match response {
            Response::Bulk(report) => {
                assert_eq!(report.results.len(), 3);
                assert_eq!(report.failure_count, 1);
                assert!(!report.success);
                assert!(matches!(
                    report.results[1].outcome,
                    ItemOutcome::Failure {
                        kind: ErrorKind::NotFound,
                        ..
                    }
                ));
            }
            other => panic!("Expected Bulk, got {:?}", other),
        }
        assert!(temp_dir.path().join("dest/a.txt").exists());
        assert!(temp_dir.path().join("dest/b.txt").exists());
    }

    #[tokio::test]
    async fn test_route_create_folder_and_list_folders() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let created = router
            .handle(Request::CreateFolder {
                name: "my photos".to_string(),
                path: String::new(),
            })
            .await;
        assert_eq!(
            created,
            Response::FolderCreated {
                path: "my_photos".to_string()
            }
        );

        let folders = router.handle(Request::ListFolders).await;
        assert_eq!(
            folders,
            Response::Folders {
                folders: vec![String::new(), "my_photos".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_route_compress_and_extract() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("docs/2024")).unwrap();
        fs::write(temp_dir.path().join("docs/2024/report.txt"), "r").unwrap();
        let router = create_test_router(&temp_dir);

        let created = router
            .handle(Request::Compress {
                name: "backup".to_string(),
                items: vec!["docs".to_string()],
                path: String::new(),
                format: "ZIP".to_string(),
            })
            .await;
        assert_eq!(
            created,
            Response::ArchiveCreated {
                path: "backup.zip".to_string(),
                archive_name: "backup.zip".to_string(),
                format: ArchiveFormat::Zip,
            }
        );

        let extracted = router
            .handle(Request::Extract {
                path: "backup.zip".to_string(),
                target_path: "restore".to_string(),
            })
            .await;
        assert_eq!(
            extracted,
            Response::Extracted {
                target_path: "restore".to_string()
            }
        );
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("restore/docs/2024/report.txt")).unwrap(),
            "r"
        );
    }

    #[tokio::test]
    async fn test_route_compress_unknown_format() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        let router = create_test_router(&temp_dir);

        let response = router
            .handle(Request::Compress {
                name: "bundle".to_string(),
                items: vec!["a.txt".to_string()],
                path: String::new(),
                format: "rar".to_string(),
            })
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::UnsupportedFormat));
        assert!(!temp_dir.path().join("bundle").exists());
        assert!(!temp_dir.path().join("bundle.rar").exists());
    }

    #[tokio::test]
    async fn test_route_extract_unknown_format() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("data.rar"), "x").unwrap();
        let router = create_test_router(&temp_dir);

        let response = router
            .handle(Request::Extract {
                path: "data.rar".to_string(),
                target_path: "out".to_string(),
            })
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::UnsupportedFormat));
        assert!(!temp_dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_route_upload_and_download() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);
        let bytes = b"uploaded bytes".to_vec();

        let uploaded = router
            .handle(Request::Upload {
                path: "inbox".to_string(),
                file_name: "note.txt".to_string(),
                content: bytes.clone(),
                checksum: Some(sha256_hex(&bytes)),
            })
            .await;
        assert_eq!(
            uploaded,
            Response::Uploaded {
                file_name: "note.txt".to_string(),
                path: "inbox".to_string(),
            }
        );

        let downloaded = router
            .handle(Request::Download {
                path: "inbox/note.txt".to_string(),
            })
            .await;
        assert_eq!(
            downloaded,
            Response::Download {
                file_name: "note.txt".to_string(),
                size: bytes.len() as u64,
                sha256: sha256_hex(&bytes),
                content: bytes,
            }
        );
    }

    #[tokio::test]
    async fn test_route_upload_checksum_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let response = router
            .handle(Request::Upload {
                path: String::new(),
                file_name: "note.txt".to_string(),
                content: b"data".to_vec(),
                checksum: Some("00".repeat(32)),
            })
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::InvalidInput));
        assert!(!temp_dir.path().join("note.txt").exists());
    }

    #[tokio::test]
    async fn test_archive_timeout_disabled_by_zero() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.archive.timeout_secs = 0;
        let guard = Arc::new(PathGuard::new(temp_dir.path()).unwrap());
        let router = MessageRouter::new(guard, &config);

        assert!(router.archive_timeout.is_none());
    }

    #[test]
    fn test_router_error_to_message() {
        let err = RouterError::Timeout {
            operation: "compress",
            secs: 300,
        };
        let message = err.to_error_message(Some("docs".to_string()));
        assert_eq!(message.kind, ErrorKind::BuildFailed);
        assert_eq!(message.context.as_deref(), Some("docs"));
        assert!(message.message.contains("300"));

        let err = RouterError::from(FileError::NotFound("x".to_string()));
        assert_eq!(err.to_error_message(None).kind, ErrorKind::NotFound);
    }
}
