//! IPC server accepting CLI connections on a Unix Domain Socket.

use std::io;
use std::path::Path;

use protocol::{Envelope, ProtocolError, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// A server that listens for IPC connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// Missing parent directories are created and a stale socket file at the
    /// path is removed first.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Self { listener })
    }

    /// Wait for the next client connection.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }
}

/// One connected client, speaking newline-delimited JSON envelopes.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the next request envelope.
    ///
    /// Returns `None` once the client has disconnected. Blank lines are
    /// skipped.
    pub async fn read_request(&mut self) -> Result<Option<Envelope<Request>>, IpcError> {
        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }

            let request = Envelope::from_json(&line)?;
            return Ok(Some(request));
        }
    }

    /// Send a response envelope to the client.
    pub async fn send_response(&mut self, response: &Envelope<Response>) -> Result<(), IpcError> {
        let mut json = response.to_json()?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A line could not be encoded or decoded as an envelope.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The response sequence number does not match the request.
    #[error("response sequence {got} does not match request {expected}")]
    SequenceMismatch { expected: u64, got: u64 },
}
