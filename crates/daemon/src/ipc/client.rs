//! IPC client used by the CLI to talk to a running daemon.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::{Envelope, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::server::IpcError;

/// Default timeout for control requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Timeout for file operations, which may walk large trees.
pub const FILE_OPERATION_TIMEOUT_SECS: u64 = 600;

/// A client for communicating with the daemon via IPC.
pub struct IpcClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    timeout: Duration,
    next_sequence: u64,
}

impl IpcClient {
    /// Connect to the daemon at the specified socket path.
    ///
    /// Fails when no daemon is listening on the socket.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(
            stream,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        ))
    }

    /// Connect to the daemon with a custom timeout for the connect and every
    /// later request.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| {
                IpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection timed out",
                ))
            })??;

        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
            next_sequence: 1,
        }
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request and wait for the matching response.
    pub async fn send(&mut self, request: Request) -> Result<Response, IpcError> {
        tokio::time::timeout(self.timeout, self.send_internal(request))
            .await
            .map_err(|_| {
                IpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "operation timed out",
                ))
            })?
    }

    async fn send_internal(&mut self, request: Request) -> Result<Response, IpcError> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut json = Envelope::new(sequence, request).to_json()?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed connection",
            )));
        }

        let envelope = Envelope::<Response>::from_json(&line)?;
        if envelope.sequence != sequence {
            return Err(IpcError::SequenceMismatch {
                expected: sequence,
                got: envelope.sequence,
            });
        }
        Ok(envelope.payload)
    }

    /// Returns `true` if the daemon answers with `Pong`.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let response = self.send(Request::Ping).await?;
        Ok(matches!(response, Response::Pong))
    }

    /// Get the current status of the daemon.
    pub async fn status(&mut self) -> Result<Response, IpcError> {
        self.send(Request::Status).await
    }

    /// Request the daemon to stop.
    pub async fn stop(&mut self) -> Result<Response, IpcError> {
        self.send(Request::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::IpcServer;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_client_connect_fails_when_daemon_not_running() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("nonexistent.sock");

        let result = IpcClient::connect(&socket_path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_client_ping() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let request = conn.read_request().await.unwrap().unwrap();
            assert_eq!(request.payload, Request::Ping);
            conn.send_response(&Envelope::new(request.sequence, Response::Pong))
                .await
                .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        assert!(client.ping().await.unwrap());

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_sequence_increments() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let mut sequences = Vec::new();
            while let Some(request) = conn.read_request().await.unwrap() {
                sequences.push(request.sequence);
                conn.send_response(&Envelope::new(request.sequence, Response::Pong))
                    .await
                    .unwrap();
            }
            sequences
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        assert!(client.ping().await.unwrap());
        assert!(client.ping().await.unwrap());
        drop(client);

        assert_eq!(server_handle.await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_client_status() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let request = conn.read_request().await.unwrap().unwrap();
            assert_eq!(request.payload, Request::Status);
            let status = Response::Status {
                root: "/srv/data".to_string(),
                uptime_secs: 100,
                requests_served: 2,
            };
            conn.send_response(&Envelope::new(request.sequence, status))
                .await
                .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        match client.status().await.unwrap() {
            Response::Status {
                root,
                uptime_secs,
                requests_served,
            } => {
                assert_eq!(root, "/srv/data");
                assert_eq!(uptime_secs, 100);
                assert_eq!(requests_served, 2);
            }
            other => panic!("Expected Status response, got {:?}", other),
        }

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_stop() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let request = conn.read_request().await.unwrap().unwrap();
            assert_eq!(request.payload, Request::Shutdown);
            conn.send_response(&Envelope::new(request.sequence, Response::ShuttingDown))
                .await
                .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        assert_eq!(client.stop().await.unwrap(), Response::ShuttingDown);

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_rejects_mismatched_sequence() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let request = conn.read_request().await.unwrap().unwrap();
            conn.send_response(&Envelope::new(request.sequence + 10, Response::Pong))
                .await
                .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let result = client.ping().await;
        assert!(matches!(
            result,
            Err(IpcError::SequenceMismatch {
                expected: 1,
                got: 11
            })
        ));

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_timeout() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let _server_handle = tokio::spawn(async move {
            let _conn = server.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client =
            IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
                .await
                .unwrap();

        let result = client.ping().await;
        assert!(result.is_err());
    }
}
