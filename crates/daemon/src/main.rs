//! rootfm daemon
//!
//! Serves root-confined file operations over a local socket, and doubles as
//! the command-line client for a running daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::files::content::sha256_hex;
use daemon::ipc::{IpcClient, DEFAULT_TIMEOUT_SECS, FILE_OPERATION_TIMEOUT_SECS};
use daemon::orchestrator::{DaemonOrchestrator, OrchestratorEvent};
use protocol::{
    ArchiveFormat, BulkReport, FileContent, FileRecord, ItemOutcome, ReadMode, Request, Response,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// rootfm daemon - file operations confined to a single root directory.
#[derive(Parser, Debug)]
#[command(name = "rootfm-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the daemon in the foreground
    Start {
        /// Directory to serve (overrides the config file)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },

    /// Stop the running daemon
    Stop {
        /// Seconds to wait for the daemon to exit
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show daemon status
    Status,

    /// List a directory
    Ls {
        /// Directory relative to the root
        #[arg(default_value = "")]
        path: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List every folder under the root
    Folders {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print a file
    Cat {
        /// File relative to the root
        path: String,
    },

    /// Create a folder
    Mkdir {
        /// Folder name
        name: String,

        /// Parent directory
        #[arg(long = "in", default_value = "", value_name = "DIR")]
        parent: String,
    },

    /// Delete a file or directory
    Rm {
        /// Entry relative to the root
        path: String,

        /// Delete directories and their contents
        #[arg(short, long)]
        recursive: bool,
    },

    /// Rename an entry within its directory
    Rename {
        /// Entry relative to the root
        path: String,

        /// New name
        new_name: String,
    },

    /// Move entries into a directory
    Mv {
        /// Entries to move
        #[arg(required = true)]
        items: Vec<String>,

        /// Destination directory
        #[arg(long, value_name = "DIR")]
        to: String,
    },

    /// Copy entries into a directory
    Cp {
        /// Entries to copy
        #[arg(required = true)]
        items: Vec<String>,

        /// Destination directory
        #[arg(long, value_name = "DIR")]
        to: String,
    },

    /// Build an archive
    Compress {
        /// Archive name; the extension is added if missing
        name: String,

        /// Members, relative to the working directory
        #[arg(required = true)]
        items: Vec<String>,

        /// Working directory
        #[arg(long, default_value = "", value_name = "DIR")]
        dir: String,

        /// Archive format (tar or zip)
        #[arg(long, default_value = "tar", value_parser = parse_archive_format)]
        format: ArchiveFormat,
    },

    /// Unpack an archive
    Extract {
        /// Archive relative to the root
        archive: String,

        /// Destination directory
        #[arg(long, default_value = "", value_name = "DIR")]
        to: String,
    },

    /// Upload a local file
    Upload {
        /// Local file
        file: PathBuf,

        /// Destination directory
        #[arg(long, default_value = "", value_name = "DIR")]
        to: String,
    },

    /// Download a file
    Download {
        /// File relative to the root
        path: String,

        /// Local output path (defaults to the file name)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn parse_archive_format(value: &str) -> Result<ArchiveFormat, String> {
    ArchiveFormat::parse(value).ok_or_else(|| format!("unsupported archive format: {value}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    if let Commands::Start { root: Some(root) } = &cli.command {
        config.daemon.root = root.clone();
    }
    config.validate()?;

    let _log_guard = init_tracing(cli.verbose, &config)?;

    match cli.command {
        Commands::Start { .. } => {
            let socket_path = config.socket_path();
            if daemon_responds(&socket_path).await {
                eprintln!("Error: a daemon is already listening on {}", socket_path.display());
                eprintln!();
                eprintln!("To stop it, run:");
                eprintln!("  rootfm-daemon stop");
                std::process::exit(1);
            }

            let mut orchestrator = DaemonOrchestrator::new(config)?;
            run_foreground(&mut orchestrator).await?;
        }
        Commands::Stop { timeout } => stop_daemon(&config, timeout).await?,
        Commands::Status => {
            let mut client = connect(&config, false).await?;
            match expect_success(client.status().await?)? {
                Response::Status {
                    root,
                    uptime_secs,
                    requests_served,
                } => {
                    println!("Daemon status: running");
                    println!("  Root:     {}", root);
                    println!("  Uptime:   {}", format_duration(uptime_secs));
                    println!("  Requests: {}", requests_served);
                }
                other => unexpected(other)?,
            }
        }
        Commands::Ls { path, json } => match request(&config, Request::List { path }).await? {
            Response::Listing { files, .. } if json => {
                println!("{}", serde_json::to_string_pretty(&files)?)
            }
            Response::Listing { files, .. } => print_listing(&files),
            other => unexpected(other)?,
        },
        Commands::Folders { json } => match request(&config, Request::ListFolders).await? {
            Response::Folders { folders } if json => {
                println!("{}", serde_json::to_string_pretty(&folders)?)
            }
            Response::Folders { folders } => {
                for folder in folders {
                    if folder.is_empty() {
                        println!("/");
                    } else {
                        println!("/{}", folder);
                    }
                }
            }
            other => unexpected(other)?,
        },
        Commands::Cat { path } => {
            let read = Request::Read {
                path,
                mode: ReadMode::Text,
            };
            match request(&config, read).await? {
                Response::Content {
                    content: FileContent::Text(text),
                    ..
                } => print!("{}", text),
                other => unexpected(other)?,
            }
        }
        Commands::Mkdir { name, parent } => {
            let create = Request::CreateFolder { name, path: parent };
            match request(&config, create).await? {
                Response::FolderCreated { path } => println!("Created /{}", path),
                other => unexpected(other)?,
            }
        }
        Commands::Rm { path, recursive } => {
            match request(&config, Request::Delete { path, recursive }).await? {
                Response::Deleted { path } => println!("Deleted {}", path),
                other => unexpected(other)?,
            }
        }
        Commands::Rename { path, new_name } => {
            let rename = Request::Rename {
                old_path: path,
                new_name,
            };
            match request(&config, rename).await? {
                Response::Renamed { old_path, new_path } => {
                    println!("Renamed {} -> {}", old_path, new_path)
                }
                other => unexpected(other)?,
            }
        }
        Commands::Mv { items, to } => {
            let bulk = Request::Move {
                items,
                target_path: to,
            };
            report_bulk(request(&config, bulk).await?)?;
        }
        Commands::Cp { items, to } => {
            let bulk = Request::Copy {
                items,
                target_path: to,
            };
            report_bulk(request(&config, bulk).await?)?;
        }
        Commands::Compress {
            name,
            items,
            dir,
            format,
        } => {
            let compress = Request::Compress {
                name,
                items,
                path: dir,
                format: format.to_string(),
            };
            match request(&config, compress).await? {
                Response::ArchiveCreated { path, format, .. } => {
                    println!("Created {} archive /{}", format, path)
                }
                other => unexpected(other)?,
            }
        }
        Commands::Extract { archive, to } => {
            let extract = Request::Extract {
                path: archive,
                target_path: to,
            };
            match request(&config, extract).await? {
                Response::Extracted { target_path } => println!("Extracted into /{}", target_path),
                other => unexpected(other)?,
            }
        }
        Commands::Upload { file, to } => upload_file(&config, &file, to).await?,
        Commands::Download { path, output } => download_file(&config, path, output).await?,
    }

    Ok(())
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins over `--verbose`, which wins over `daemon.log_level`. With
/// `daemon.log_dir` set, logs also go to a daily rolling file; the returned
/// guard flushes it on drop.
fn init_tracing(verbose: bool, config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &config.daemon.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "rootfm-daemon.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Run the daemon until a signal or a `Shutdown` request arrives.
async fn run_foreground(orchestrator: &mut DaemonOrchestrator) -> anyhow::Result<()> {
    orchestrator.start().await?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!(?state, "Orchestrator state changed");
                }
                OrchestratorEvent::ClientConnected { connection_id } => {
                    tracing::debug!(connection_id, "Client connected");
                }
                OrchestratorEvent::ClientDisconnected { connection_id } => {
                    tracing::debug!(connection_id, "Client disconnected");
                }
                OrchestratorEvent::ShutdownRequested => {
                    tracing::info!("Shutdown requested by client");
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!(error = %message, "Orchestrator error");
                }
            }
        }
    });

    let shutdown = orchestrator.shutdown_token();
    tokio::select! {
        result = wait_for_shutdown_signal() => result?,
        _ = shutdown.cancelled() => {}
    }

    orchestrator.stop().await
}

/// Wait for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
    Ok(())
}

async fn daemon_responds(socket_path: &Path) -> bool {
    match IpcClient::connect_with_timeout(socket_path, Duration::from_millis(200)).await {
        Ok(mut client) => client.ping().await.unwrap_or(false),
        Err(_) => false,
    }
}

/// Connect to the running daemon.
///
/// File operations get a longer deadline than control requests.
async fn connect(config: &Config, file_operation: bool) -> anyhow::Result<IpcClient> {
    let socket_path = config.socket_path();
    let mut client =
        IpcClient::connect_with_timeout(&socket_path, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .await
            .map_err(|_| anyhow::anyhow!("Daemon is not running (cannot connect to socket)"))?;
    if file_operation {
        client.set_timeout(Duration::from_secs(FILE_OPERATION_TIMEOUT_SECS));
    }
    Ok(client)
}

/// Send one file request and fail on an error response.
async fn request(config: &Config, request: Request) -> anyhow::Result<Response> {
    let operation = request.operation();
    let mut client = connect(config, true).await?;
    let response = client
        .send(request)
        .await
        .with_context(|| format!("Failed to send {operation} request"))?;
    expect_success(response)
}

fn expect_success(response: Response) -> anyhow::Result<Response> {
    match response {
        Response::Error(err) => match err.context {
            Some(context) if !context.is_empty() => {
                anyhow::bail!("{} ({}): {}", err.kind, context, err.message)
            }
            _ => anyhow::bail!("{}: {}", err.kind, err.message),
        },
        other => Ok(other),
    }
}

fn unexpected(response: Response) -> anyhow::Result<()> {
    anyhow::bail!("Unexpected response from daemon: {:?}", response)
}

async fn stop_daemon(config: &Config, timeout_secs: u64) -> anyhow::Result<()> {
    let socket_path = config.socket_path();
    let mut client = connect(config, false).await?;

    println!("Sending shutdown request...");
    match expect_success(client.stop().await?)? {
        Response::ShuttingDown => println!("Shutdown acknowledged, waiting for daemon to exit..."),
        other => unexpected(other)?,
    }

    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    while start.elapsed() < timeout {
        if !socket_path.exists() {
            println!("Daemon stopped");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    anyhow::bail!("Timeout waiting for daemon to exit ({}s)", timeout_secs)
}

async fn upload_file(config: &Config, file: &Path, target: String) -> anyhow::Result<()> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("{} has no file name", file.display()))?;
    let content =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let checksum = sha256_hex(&content);

    let upload = Request::Upload {
        path: target,
        file_name,
        content,
        checksum: Some(checksum),
    };
    match request(config, upload).await? {
        Response::Uploaded { file_name, path } => {
            if path.is_empty() {
                println!("Uploaded /{}", file_name);
            } else {
                println!("Uploaded /{}/{}", path, file_name);
            }
            Ok(())
        }
        other => unexpected(other),
    }
}

async fn download_file(
    config: &Config,
    path: String,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    match request(config, Request::Download { path }).await? {
        Response::Download {
            file_name,
            size,
            sha256,
            content,
        } => {
            let actual = sha256_hex(&content);
            if actual != sha256 {
                anyhow::bail!("Checksum mismatch: expected {}, got {}", sha256, actual);
            }
            let output = output.unwrap_or_else(|| PathBuf::from(&file_name));
            std::fs::write(&output, &content)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Downloaded {} ({}) to {}", file_name, format_size(size), output.display());
            Ok(())
        }
        other => unexpected(other),
    }
}

fn report_bulk(response: Response) -> anyhow::Result<()> {
    let report: BulkReport = match response {
        Response::Bulk(report) => report,
        other => return unexpected(other),
    };

    for result in &report.results {
        match &result.outcome {
            ItemOutcome::Success => println!("  ok    {}", result.item),
            ItemOutcome::Failure { kind, reason } => {
                println!("  FAIL  {} [{}] {}", result.item, kind, reason)
            }
        }
    }
    println!("{}", report.message);

    if report.success {
        Ok(())
    } else {
        anyhow::bail!("{} of {} item(s) failed", report.failure_count, report.results.len())
    }
}

fn print_listing(files: &[FileRecord]) {
    if files.is_empty() {
        println!("(empty)");
        return;
    }

    println!("{:<6} {:>10}  {:<12}  NAME", "TYPE", "SIZE", "MODIFIED");
    for file in files {
        let kind = if file.is_directory { "dir" } else { "file" };
        let size = if file.is_directory {
            "-".to_string()
        } else {
            format_size(file.size)
        };
        let name = if file.is_directory {
            format!("{}/", file.name)
        } else {
            file.name.clone()
        };
        println!("{:<6} {:>10}  {:<12}  {}", kind, size, file.modified, name);
    }
}

/// Format a byte count with a binary unit.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
