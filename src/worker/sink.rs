use crate::ipc::protocol::{WorkerEvent, WorkerMessage};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Destination for outbound worker messages.
///
/// Called from async tasks and from the blocking inference thread, so
/// implementations must not block for long.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: WorkerMessage);
}

/// Forwards messages into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl MessageSink for ChannelSink {
    fn send(&self, message: WorkerMessage) {
        if self.tx.send(message).is_err() {
            debug!("message receiver dropped, discarding outbound message");
        }
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct CollectorSink {
    messages: Mutex<Vec<WorkerMessage>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<WorkerMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Events sent for one request, in order.
    pub fn events_for(&self, request_id: u64) -> Vec<WorkerEvent> {
        self.messages()
            .into_iter()
            .filter(|m| m.request_id == request_id)
            .map(|m| m.event)
            .collect()
    }
}

impl MessageSink for CollectorSink {
    fn send(&self, message: WorkerMessage) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
    }
}
