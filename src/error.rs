//! Error types for streamscribe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Pipeline construction errors
    #[error("Model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Failed to load inference pipeline: {message}")]
    PipelineLoad { message: String },

    // Inference errors
    #[error("Inference failed: {message}")]
    Inference { message: String },

    #[error("Failed to decode model output: {message}")]
    Decode { message: String },

    #[error("Request {request_id} was cancelled")]
    Cancelled { request_id: u64 },

    // Audio input errors
    #[error("Audio input error: {message}")]
    Audio { message: String },

    // Model download errors
    #[error("Model download failed: {message}")]
    Download { message: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScribeError>;
