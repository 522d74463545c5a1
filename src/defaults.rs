//! Default configuration constants for streamscribe.
//!
//! Shared by the config layer, the orchestrator and the reconciler so the
//! decoding parameters stay consistent.

/// Audio sample rate expected by the inference pipeline, in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Length of one inference window in seconds.
pub const CHUNK_LENGTH_S: u32 = 30;

/// Overlap on each side of an inference window in seconds.
///
/// Also used by the reconciler to estimate the end of a still-open interval.
pub const STRIDE_LENGTH_S: u32 = 5;

/// A partial preview is emitted on every Nth beam-decode callback.
pub const PARTIAL_EVERY: u64 = 10;

/// Seconds per timestamp tick when the model does not report its own geometry.
pub const FALLBACK_TIME_PRECISION: f64 = 0.02;

/// Fraction of the stride used to estimate a missing interval end.
pub const END_ESTIMATE_FACTOR: f64 = 0.9;

/// Default Whisper model name.
pub const DEFAULT_MODEL: &str = "tiny.en";

/// Default language code for transcription.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Whisper encoder geometry: 30 s of audio maps to 1500 positions.
pub const WHISPER_FEATURE_CHUNK_LENGTH: f64 = 30.0;
pub const WHISPER_MAX_SOURCE_POSITIONS: u32 = 1500;

/// Socket file name under `$XDG_RUNTIME_DIR`.
pub const SOCKET_NAME: &str = "streamscribe.sock";
