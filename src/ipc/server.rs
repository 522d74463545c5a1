//! Async Unix socket host for the transcription worker.
//!
//! Each connection gets its own [`Worker`] sharing one pipeline cache. Inbound
//! lines are worker requests; outbound lines are the messages for requests
//! started on that connection.

use crate::config::DecodingConfig;
use crate::defaults;
use crate::engine::PipelineCache;
use crate::error::{Result, ScribeError};
use crate::ipc::protocol::{WorkerMessage, WorkerRequest};
use crate::worker::{ChannelSink, RequestPhase, Worker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Unix socket server hosting the worker.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown: CancellationToken,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the socket path this server is using.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get the default socket path based on XDG_RUNTIME_DIR or fallback.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR")
            && !xdg_runtime.is_empty()
        {
            PathBuf::from(xdg_runtime).join(defaults::SOCKET_NAME)
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/streamscribe-{}.sock", uid))
        }
    }

    /// Token that stops the accept loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is requested.
    pub async fn start(&self, cache: Arc<PipelineCache>, decoding: DecodingConfig) -> Result<()> {
        // Clean up any stale socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ScribeError::IpcSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| ScribeError::IpcSocket {
                message: format!("Failed to bind to socket: {}", e),
            })?;
        info!(socket = %self.socket_path.display(), "listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted.map_err(|e| ScribeError::IpcConnection {
                        message: format!("Failed to accept connection: {}", e),
                    })?;
                    let cache = Arc::clone(&cache);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, cache, decoding).await {
                            warn!(error = %e, "connection closed with error");
                        }
                    });
                }
            }
        }

        Ok(())
    }

    /// Stop the server and clean up the socket file.
    pub fn stop(&self) -> Result<()> {
        self.shutdown.cancel();

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ScribeError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }

        Ok(())
    }
}

/// Serve one connection until the client stops writing and every request it
/// started has finished.
///
/// A client that can no longer be written to, or read from, has its
/// in-flight requests cancelled.
async fn handle_client(
    stream: UnixStream,
    cache: Arc<PipelineCache>,
    decoding: DecodingConfig,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let (sink, rx) = ChannelSink::pair();
    let worker = Arc::new(Worker::new(cache, Arc::new(sink), decoding));
    let mut writer_task = tokio::spawn(write_messages(writer, rx));
    let mut in_flight: Vec<JoinHandle<RequestPhase>> = Vec::new();

    loop {
        // The writer only finishes early when the client is gone.
        let line = tokio::select! {
            line = lines.next_line() => line,
            written = &mut writer_task => {
                abandon(&worker);
                return writer_outcome(written);
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                abandon(&worker);
                writer_task.abort();
                return Err(ScribeError::IpcConnection {
                    message: format!("Failed to read from client: {}", e),
                });
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match WorkerRequest::from_json(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                abandon(&worker);
                writer_task.abort();
                return Err(ScribeError::IpcProtocol {
                    message: format!("Failed to parse request: {}", e),
                });
            }
        };

        if let Some(handle) = worker.dispatch(request) {
            in_flight.retain(|h| !h.is_finished());
            in_flight.push(handle);
        }
    }

    let writer_failed = tokio::select! {
        _ = wait_for_requests(in_flight) => None,
        written = &mut writer_task => Some(written),
    };
    if let Some(written) = writer_failed {
        abandon(&worker);
        return writer_outcome(written);
    }

    // Last sender goes away with the worker, which ends the writer.
    drop(worker);
    writer_outcome(writer_task.await)
}

fn abandon(worker: &Worker) {
    let pending = worker.active_requests();
    if pending > 0 {
        info!(pending, "client gone, cancelling its requests");
    }
    worker.cancel_all();
}

async fn wait_for_requests(in_flight: Vec<JoinHandle<RequestPhase>>) {
    for handle in in_flight {
        if let Err(e) = handle.await {
            warn!(error = %e, "request task failed");
        }
    }
}

fn writer_outcome(
    written: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    written.map_err(|e| ScribeError::IpcConnection {
        message: format!("Writer task failed: {}", e),
    })?
}

async fn write_messages(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
) -> Result<()> {
    while let Some(message) = rx.recv().await {
        let mut line = message.to_json().map_err(|e| ScribeError::IpcProtocol {
            message: format!("Failed to serialize message: {}", e),
        })?;
        line.push('\n');

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ScribeError::IpcConnection {
                message: format!("Failed to write to client: {}", e),
            })?;
        writer
            .flush()
            .await
            .map_err(|e| ScribeError::IpcConnection {
                message: format!("Failed to flush writer: {}", e),
            })?;
    }
    Ok(())
}
