//! IPC client for submitting requests to a running worker host.

use crate::error::{Result, ScribeError};
use crate::ipc::protocol::{WorkerMessage, WorkerRequest};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Send one request and stream the worker's messages to `on_message`.
///
/// Returns the terminal message for the request.
///
/// # Errors
/// Returns `ScribeError::IpcConnection` if the connection fails or closes
/// before a terminal message arrives.
/// Returns `ScribeError::IpcProtocol` if serialization/deserialization fails.
pub async fn send_request<F>(
    socket_path: &Path,
    request: &WorkerRequest,
    mut on_message: F,
) -> Result<WorkerMessage>
where
    F: FnMut(&WorkerMessage),
{
    let stream =
        UnixStream::connect(socket_path)
            .await
            .map_err(|e| ScribeError::IpcConnection {
                message: format!(
                    "Failed to connect to {}: {}. Is `streamscribe serve` running?",
                    socket_path.display(),
                    e
                ),
            })?;

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let mut request_json = request.to_json().map_err(|e| ScribeError::IpcProtocol {
        message: format!("Failed to serialize request: {}", e),
    })?;
    request_json.push('\n');

    writer
        .write_all(request_json.as_bytes())
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to write request: {}", e),
        })?;
    // Half-close so the host knows no more requests follow.
    writer
        .shutdown()
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to finish request: {}", e),
        })?;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to read response: {}", e),
        })?
    {
        let message =
            WorkerMessage::from_json(line.trim()).map_err(|e| ScribeError::IpcProtocol {
                message: format!("Failed to deserialize message: {}", e),
            })?;
        on_message(&message);
        if message.event.is_terminal() {
            return Ok(message);
        }
    }

    Err(ScribeError::IpcConnection {
        message: "Connection closed before the request finished".to_string(),
    })
}
