//! streamscribe - streaming speech transcription worker
//!
//! Accepts audio buffers, runs chunked Whisper inference against a lazily
//! loaded pipeline and streams loading progress, partial previews and
//! reconciled transcript snapshots back as JSON messages.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod models;
pub mod output;
pub mod reconcile;
pub mod worker;

// Engine boundary
pub use engine::{AsrTokenizer, GenerationHooks, InferencePipeline, PipelineCache, PipelineFactory};

// Worker
pub use ipc::protocol::{LoadingStatus, WorkerEvent, WorkerMessage, WorkerRequest};
pub use reconcile::{GenerationTracker, PartialPreview, ProcessedInterval};
pub use worker::{ChannelSink, CollectorSink, MessageSink, RequestPhase, Worker};

// Error handling
pub use error::{Result, ScribeError};

// Config
pub use config::{Config, DecodingConfig};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
