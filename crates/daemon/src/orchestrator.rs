//! Daemon orchestrator wiring the file engine to the IPC server.
//!
//! The orchestrator opens the root, builds the `MessageRouter`, binds the
//! Unix socket and serves each client connection on its own task. It answers
//! the control requests (`Status`, `Shutdown`) itself and forwards everything
//! else to the router.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use protocol::{Envelope, ErrorKind, Request, Response};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::files::PathGuard;
use crate::ipc::{IpcConnection, IpcError, IpcServer};
use crate::router::MessageRouter;

/// How long `stop` waits for the accept loop to wind down.
const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding the socket.
    Starting,
    /// Accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// A client connected to the socket.
    ClientConnected { connection_id: u64 },
    /// A client disconnected.
    ClientDisconnected { connection_id: u64 },
    /// A client asked the daemon to shut down.
    ShutdownRequested,
    /// Error occurred.
    Error { message: String },
}

/// State shared by every connection task.
struct ServeContext {
    router: Arc<MessageRouter>,
    root: String,
    started_at: Instant,
    requests_served: Arc<AtomicU64>,
    shutdown_token: CancellationToken,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl ServeContext {
    async fn respond(&self, envelope: Envelope<Request>) -> Envelope<Response> {
        let sequence = envelope.sequence;
        let served = self.requests_served.fetch_add(1, Ordering::Relaxed) + 1;

        let response = match envelope.payload {
            Request::Status => Response::Status {
                root: self.root.clone(),
                uptime_secs: self.started_at.elapsed().as_secs(),
                requests_served: served,
            },
            Request::Shutdown => {
                info!("Shutdown requested over IPC");
                let _ = self.event_tx.send(OrchestratorEvent::ShutdownRequested);
                self.shutdown_token.cancel();
                Response::ShuttingDown
            }
            request => self.router.handle(request).await,
        };

        Envelope::new(sequence, response)
    }
}

/// Daemon orchestrator that owns the socket and the router.
pub struct DaemonOrchestrator {
    /// Configuration.
    config: Config,
    /// Socket the daemon listens on.
    socket_path: PathBuf,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Request router.
    router: Arc<MessageRouter>,
    /// Requests answered since start.
    requests_served: Arc<AtomicU64>,
    /// Accept loop task, present while running.
    server_task: Mutex<Option<JoinHandle<()>>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DaemonOrchestrator {
    /// Creates a new daemon orchestrator serving `config.daemon.root`.
    pub fn new(config: Config) -> Result<Self> {
        let guard = PathGuard::new(&config.daemon.root).with_context(|| {
            format!("Failed to open root {}", config.daemon.root.display())
        })?;
        info!(root = %guard.root().display(), "Serving root");

        let router = Arc::new(MessageRouter::new(Arc::new(guard), &config));
        let socket_path = config.socket_path();
        let (event_tx, _) = broadcast::channel(256);

        Ok(Self {
            config,
            socket_path,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            router,
            requests_served: Arc::new(AtomicU64::new(0)),
            server_task: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Binds the socket and starts accepting connections.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!(socket = %self.socket_path.display(), "Starting daemon orchestrator...");

        let bound = IpcServer::bind(&self.socket_path)
            .await
            .with_context(|| format!("Failed to bind socket {}", self.socket_path.display()));
        let server = match bound {
            Ok(server) => server,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
                return Err(e);
            }
        };

        let context = Arc::new(ServeContext {
            router: Arc::clone(&self.router),
            root: self.router.guard().root().display().to_string(),
            started_at: Instant::now(),
            requests_served: Arc::clone(&self.requests_served),
            shutdown_token: self.shutdown_token.clone(),
            event_tx: self.event_tx.clone(),
        });

        let task = tokio::spawn(Self::accept_loop(server, context));
        *self.server_task.lock().await = Some(task);

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!("Daemon orchestrator started successfully");
        Ok(())
    }

    /// Accepts connections until shutdown is signalled.
    async fn accept_loop(server: IpcServer, context: Arc<ServeContext>) {
        let mut next_connection_id: u64 = 0;

        loop {
            tokio::select! {
                _ = context.shutdown_token.cancelled() => {
                    debug!("Accept loop stopping");
                    break;
                }
                accepted = server.accept() => match accepted {
                    Ok(conn) => {
                        next_connection_id += 1;
                        let connection_id = next_connection_id;
                        let _ = context
                            .event_tx
                            .send(OrchestratorEvent::ClientConnected { connection_id });
                        tokio::spawn(Self::serve_connection(
                            conn,
                            connection_id,
                            Arc::clone(&context),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept IPC connection");
                        let _ = context.event_tx.send(OrchestratorEvent::Error {
                            message: format!("accept failed: {e}"),
                        });
                    }
                }
            }
        }
    }

    /// Answers requests from one client until it disconnects.
    async fn serve_connection(
        mut conn: IpcConnection,
        connection_id: u64,
        context: Arc<ServeContext>,
    ) {
        debug!(connection_id, "Client connected");

        loop {
            let read = tokio::select! {
                _ = context.shutdown_token.cancelled() => break,
                read = conn.read_request() => read,
            };

            let reply = match read {
                Ok(Some(envelope)) => context.respond(envelope).await,
                Ok(None) => break,
                Err(IpcError::Protocol(e)) => {
                    debug!(connection_id, error = %e, "Malformed request");
                    Envelope::new(0, Response::error(ErrorKind::InvalidInput, e.to_string()))
                }
                Err(e) => {
                    warn!(connection_id, error = %e, "Connection read failed");
                    break;
                }
            };

            if let Err(e) = conn.send_response(&reply).await {
                warn!(connection_id, error = %e, "Failed to send response");
                break;
            }
        }

        debug!(connection_id, "Client disconnected");
        let _ = context
            .event_tx
            .send(OrchestratorEvent::ClientDisconnected { connection_id });
    }

    /// Stops accepting connections and removes the socket.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping daemon orchestrator...");

        self.shutdown_token.cancel();

        if let Some(task) = self.server_task.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Accept loop ended abnormally"),
                Err(_) => warn!("Accept loop did not stop in time"),
            }
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(socket = %self.socket_path.display(), error = %e, "Failed to remove socket");
            }
        }

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!(
            requests_served = self.requests_served(),
            "Daemon orchestrator stopped"
        );
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the configuration the daemon was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Returns the message router.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Returns the number of requests answered so far.
    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
