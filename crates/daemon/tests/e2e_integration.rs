//! End-to-end integration tests for rootfm.
//!
//! These tests verify complete flows work correctly:
//! - Daemon startup, status and shutdown over the socket
//! - Path containment on every request field
//! - Content, bulk and archive operations through the router

use std::fs;
use std::io::Read;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::sync::Arc;

use daemon::config::Config;
use daemon::files::PathGuard;
use daemon::ipc::IpcClient;
use daemon::orchestrator::{DaemonOrchestrator, OrchestratorState};
use daemon::router::MessageRouter;
use protocol::{
    ArchiveFormat, BulkOperation, ErrorKind, FileContent, ItemOutcome, ReadMode, Request, Response,
};
use tempfile::TempDir;

/// Create a test configuration with a root and socket inside a temp dir.
fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("data");
    fs::create_dir_all(&root).unwrap();

    let mut config = Config::default();
    config.daemon.root = root;
    config.daemon.socket_path = Some(temp_dir.path().join("run").join("daemon.sock"));
    (config, temp_dir)
}

fn create_router(config: &Config) -> MessageRouter {
    let guard = Arc::new(PathGuard::new(&config.daemon.root).unwrap());
    MessageRouter::new(guard, config)
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

// =============================================================================
// Orchestrator Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_orchestrator_state_starts_stopped() {
    let (config, _temp_dir) = create_test_config();

    let orchestrator = DaemonOrchestrator::new(config).unwrap();

    assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
}

#[tokio::test]
async fn test_orchestrator_stop_when_already_stopped() {
    let (config, _temp_dir) = create_test_config();

    let orchestrator = DaemonOrchestrator::new(config).unwrap();

    assert!(orchestrator.stop().await.is_ok());
}

#[tokio::test]
async fn test_daemon_serves_requests_over_socket() {
    let (config, _temp_dir) = create_test_config();
    write(&config.daemon.root, "docs/readme.md", "# hello\n");

    let mut orchestrator = DaemonOrchestrator::new(config).unwrap();
    orchestrator.start().await.unwrap();

    let mut client = IpcClient::connect(orchestrator.socket_path()).await.unwrap();

    let response = client
        .send(Request::Read {
            path: "docs/readme.md".to_string(),
            mode: ReadMode::Text,
        })
        .await
        .unwrap();
    assert_eq!(
        response,
        Response::Content {
            name: "readme.md".to_string(),
            size: 8,
            content: FileContent::Text("# hello\n".to_string()),
        }
    );

    let denied = client
        .send(Request::Read {
            path: "../../etc/passwd".to_string(),
            mode: ReadMode::Text,
        })
        .await
        .unwrap();
    assert_eq!(denied.error_kind(), Some(ErrorKind::AccessDenied));

    match client.status().await.unwrap() {
        Response::Status {
            root,
            requests_served,
            ..
        } => {
            assert!(root.ends_with("data"));
            assert_eq!(requests_served, 3);
        }
        other => panic!("Expected Status, got {:?}", other),
    }

    assert_eq!(client.stop().await.unwrap(), Response::ShuttingDown);
    orchestrator.stop().await.unwrap();
    assert!(!orchestrator.socket_path().exists());
}

#[tokio::test]
async fn test_multiple_clients_share_one_daemon() {
    let (config, _temp_dir) = create_test_config();

    let mut orchestrator = DaemonOrchestrator::new(config).unwrap();
    orchestrator.start().await.unwrap();

    let mut first = IpcClient::connect(orchestrator.socket_path()).await.unwrap();
    let mut second = IpcClient::connect(orchestrator.socket_path()).await.unwrap();

    let created = first
        .send(Request::CreateFolder {
            name: "shared".to_string(),
            path: String::new(),
        })
        .await
        .unwrap();
    assert!(matches!(created, Response::FolderCreated { .. }));

    let folders = second.send(Request::ListFolders).await.unwrap();
    assert_eq!(
        folders,
        Response::Folders {
            folders: vec![String::new(), "shared".to_string()]
        }
    );

    orchestrator.stop().await.unwrap();
}

// =============================================================================
// Containment Tests
// =============================================================================

#[tokio::test]
async fn test_escapes_denied_on_every_path_field() {
    let (config, temp_dir) = create_test_config();
    write(&config.daemon.root, "a.txt", "a");
    write(temp_dir.path(), "outside.txt", "secret");
    let router = create_router(&config);

    let requests = vec![
        Request::List {
            path: "..".to_string(),
        },
        Request::Read {
            path: "/etc/passwd".to_string(),
            mode: ReadMode::Text,
        },
        Request::Write {
            path: "../outside.txt".to_string(),
            content: "x".to_string(),
        },
        Request::Delete {
            path: "../outside.txt".to_string(),
            recursive: false,
        },
        Request::CreateFolder {
            name: "x".to_string(),
            path: "../".to_string(),
        },
        Request::Compress {
            name: "../escape".to_string(),
            items: vec!["a.txt".to_string()],
            path: String::new(),
            format: "tar".to_string(),
        },
        Request::Compress {
            name: "ok".to_string(),
            items: vec!["../outside.txt".to_string()],
            path: String::new(),
            format: "tar".to_string(),
        },
        Request::Extract {
            path: "../outside.tar".to_string(),
            target_path: String::new(),
        },
        Request::Upload {
            path: "../".to_string(),
            file_name: "x.txt".to_string(),
            content: b"x".to_vec(),
            checksum: None,
        },
        Request::Download {
            path: "../outside.txt".to_string(),
        },
    ];

    for request in requests {
        let operation = request.operation();
        let response = router.handle(request).await;
        assert_eq!(
            response.error_kind(),
            Some(ErrorKind::AccessDenied),
            "{operation} was not denied: {response:?}"
        );
    }

    assert_eq!(
        fs::read_to_string(temp_dir.path().join("outside.txt")).unwrap(),
        "secret"
    );
    assert!(!temp_dir.path().join("escape.tar").exists());
}

#[tokio::test]
async fn test_sibling_prefix_root_is_not_contained() {
    let parent = TempDir::new().unwrap();
    let root = parent.path().join("data");
    let evil = parent.path().join("data-evil");
    fs::create_dir_all(&root).unwrap();
    fs::create_dir_all(&evil).unwrap();
    fs::write(evil.join("loot.txt"), "x").unwrap();
    symlink(&evil, root.join("link")).unwrap();

    let mut config = Config::default();
    config.daemon.root = root;
    let router = create_router(&config);

    let response = router
        .handle(Request::Read {
            path: "link/loot.txt".to_string(),
            mode: ReadMode::Text,
        })
        .await;
    assert_eq!(response.error_kind(), Some(ErrorKind::AccessDenied));
}

// =============================================================================
// Content Tests
// =============================================================================

#[tokio::test]
async fn test_listing_order() {
    let (config, _temp_dir) = create_test_config();
    let root = &config.daemon.root;
    fs::create_dir(root.join("beta")).unwrap();
    fs::create_dir(root.join("Alpha")).unwrap();
    write(root, "zeta.txt", "z");
    write(root, "Apple.txt", "a");
    write(root, ".hidden", "h");
    let router = create_router(&config);

    match router
        .handle(Request::List {
            path: String::new(),
        })
        .await
    {
        Response::Listing { files, .. } => {
            let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["Alpha", "beta", "Apple.txt", "zeta.txt"]);
            assert!(files[0].is_directory && files[1].is_directory);
            assert_eq!(files[0].type_tag, "folder");
            assert_eq!(files[2].type_tag, "txt");
            assert_eq!(files[0].size, 0);
        }
        other => panic!("Expected Listing, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rename_conflict_changes_nothing() {
    let (config, _temp_dir) = create_test_config();
    let root = &config.daemon.root;
    write(root, "one.txt", "1");
    write(root, "two.txt", "2");
    let router = create_router(&config);

    let response = router
        .handle(Request::Rename {
            old_path: "one.txt".to_string(),
            new_name: "two.txt".to_string(),
        })
        .await;

    assert_eq!(response.error_kind(), Some(ErrorKind::Conflict));
    assert_eq!(fs::read_to_string(root.join("one.txt")).unwrap(), "1");
    assert_eq!(fs::read_to_string(root.join("two.txt")).unwrap(), "2");
}

#[tokio::test]
async fn test_text_read_size_ceiling() {
    let (mut config, _temp_dir) = create_test_config();
    config.file.max_edit_size = 4;
    write(&config.daemon.root, "big.txt", "too large");
    let router = create_router(&config);

    let text = router
        .handle(Request::Read {
            path: "big.txt".to_string(),
            mode: ReadMode::Text,
        })
        .await;
    assert_eq!(text.error_kind(), Some(ErrorKind::TooLarge));

    let binary = router
        .handle(Request::Read {
            path: "big.txt".to_string(),
            mode: ReadMode::Binary,
        })
        .await;
    assert!(binary.error_kind().is_none());
}

// =============================================================================
// Bulk Tests
// =============================================================================

#[tokio::test]
async fn test_bulk_move_one_failure() {
    let (config, _temp_dir) = create_test_config();
    let root = &config.daemon.root;
    write(root, "a.txt", "a");
    write(root, "b.txt", "b");
    write(root, "c/inner.txt", "c");
    fs::create_dir(root.join("dest")).unwrap();
    let router = create_router(&config);

    let response = router
        .handle(Request::Move {
            items: vec![
                "a.txt".to_string(),
                "../escape.txt".to_string(),
                "b.txt".to_string(),
                "c".to_string(),
            ],
            target_path: "dest".to_string(),
        })
        .await;

    match response {
        Response::Bulk(report) => {
            assert_eq!(report.operation, BulkOperation::Move);
            assert_eq!(report.results.len(), 4);
            assert_eq!(report.success_count, 3);
            assert_eq!(report.failure_count, 1);
            let items: Vec<_> = report.results.iter().map(|r| r.item.as_str()).collect();
            assert_eq!(items, vec!["a.txt", "../escape.txt", "b.txt", "c"]);
            assert!(matches!(
                report.results[1].outcome,
                ItemOutcome::Failure {
                    kind: ErrorKind::AccessDenied,
                    ..
                }
            ));
            assert_eq!(report.message, "Moved 3 item(s) successfully, 1 failed");
        }
        other => panic!("Expected Bulk, got {:?}", other),
    }

    assert!(root.join("dest/a.txt").exists());
    assert!(root.join("dest/b.txt").exists());
    assert!(root.join("dest/c/inner.txt").exists());
    assert!(!root.join("a.txt").exists());
}

#[tokio::test]
async fn test_bulk_copy_into_own_subtree_fails() {
    let (config, _temp_dir) = create_test_config();
    let root = &config.daemon.root;
    write(root, "tree/leaf.txt", "l");
    fs::create_dir_all(root.join("tree/sub")).unwrap();
    let router = create_router(&config);

    let response = router
        .handle(Request::Copy {
            items: vec!["tree".to_string()],
            target_path: "tree/sub".to_string(),
        })
        .await;

    match response {
        Response::Bulk(report) => {
            assert_eq!(report.failure_count, 1);
            assert!(matches!(
                report.results[0].outcome,
                ItemOutcome::Failure {
                    kind: ErrorKind::InvalidInput,
                    ..
                }
            ));
        }
        other => panic!("Expected Bulk, got {:?}", other),
    }
    assert!(!root.join("tree/sub/tree").exists());
}

// =============================================================================
// Archive Tests
// =============================================================================

async fn archive_round_trip(format: ArchiveFormat) {
    let (config, _temp_dir) = create_test_config();
    let root = &config.daemon.root;
    write(root, "work/fileA.txt", "alpha");
    write(root, "work/dirB/one.txt", "one");
    write(root, "work/dirB/deep/two.txt", "two");
    fs::create_dir_all(root.join("work/dirB/empty")).unwrap();
    let router = create_router(&config);

    let created = router
        .handle(Request::Compress {
            name: "bundle".to_string(),
            items: vec!["fileA.txt".to_string(), "dirB".to_string()],
            path: "work".to_string(),
            format: format.to_string(),
        })
        .await;
    let archive_name = format!("bundle.{}", format.extension());
    assert_eq!(
        created,
        Response::ArchiveCreated {
            path: format!("work/{archive_name}"),
            archive_name: archive_name.clone(),
            format,
        }
    );

    let extracted = router
        .handle(Request::Extract {
            path: format!("work/{archive_name}"),
            target_path: "restored".to_string(),
        })
        .await;
    assert!(matches!(extracted, Response::Extracted { .. }));

    let restored = root.join("restored");
    assert_eq!(fs::read_to_string(restored.join("fileA.txt")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(restored.join("dirB/one.txt")).unwrap(), "one");
    assert_eq!(
        fs::read_to_string(restored.join("dirB/deep/two.txt")).unwrap(),
        "two"
    );
    assert!(restored.join("dirB/empty").is_dir());
    assert!(!restored.join(&archive_name).exists());
}

#[tokio::test]
async fn test_tar_round_trip() {
    archive_round_trip(ArchiveFormat::Tar).await;
}

#[tokio::test]
async fn test_zip_round_trip() {
    archive_round_trip(ArchiveFormat::Zip).await;
}

#[tokio::test]
async fn test_backup_scenario() {
    let (config, _temp_dir) = create_test_config();
    let root = &config.daemon.root;
    write(root, "docs/readme.md", "r");
    write(root, "docs/2024/plan.md", "p");
    fs::create_dir_all(root.join("images")).unwrap();
    let router = create_router(&config);

    match router.handle(Request::ListFolders).await {
        Response::Folders { folders } => {
            assert_eq!(folders, vec!["", "docs", "images", "docs/2024"]);
        }
        other => panic!("Expected Folders, got {:?}", other),
    }

    let created = router
        .handle(Request::Compress {
            name: "backup".to_string(),
            items: vec!["docs".to_string()],
            path: String::new(),
            format: "zip".to_string(),
        })
        .await;
    assert!(matches!(
        created,
        Response::ArchiveCreated { ref archive_name, .. } if archive_name == "backup.zip"
    ));

    let file = fs::File::open(root.join("backup.zip")).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut names = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        names.push(entry.name().to_string());
        if entry.is_file() {
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            assert!(!body.is_empty());
        }
    }
    assert!(!names.is_empty());
    assert!(names.iter().all(|n| n.starts_with("docs/")));
    assert!(names.contains(&"docs/2024/plan.md".to_string()));
}

#[tokio::test]
async fn test_failed_compress_leaves_no_artifact() {
    let (config, _temp_dir) = create_test_config();
    let root = &config.daemon.root;
    write(root, "present.txt", "p");
    let router = create_router(&config);

    let response = router
        .handle(Request::Compress {
            name: "broken".to_string(),
            items: vec!["present.txt".to_string(), "absent.txt".to_string()],
            path: String::new(),
            format: "tar".to_string(),
        })
        .await;
    assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));

    let leftovers: Vec<_> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["present.txt"]);
}
