//! Data exchanged across the inference engine boundary.

use std::sync::Arc;

/// Timestamp tick as produced by the model. Multiply by the time precision
/// to get seconds.
pub type Tick = i64;

/// A segment decoded inside one inference window, timed relative to the
/// start of that window.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSegment {
    pub text: String,
    pub start: Tick,
    /// `None` when the model did not close the segment with a timestamp.
    pub end: Option<Tick>,
}

impl TimedSegment {
    pub fn new(text: &str, start: Tick, end: Option<Tick>) -> Self {
        Self {
            text: text.to_string(),
            start,
            end,
        }
    }
}

/// Overlap context on each side of a window, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stride {
    pub left_s: f64,
    pub right_s: f64,
}

/// One window of chunked inference output.
///
/// Kept verbatim by the reconciler so the whole history can be re-decoded
/// when a new window arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    /// Absolute start of the window in the request audio, in seconds.
    pub offset_s: f64,
    /// Window length in seconds.
    pub duration_s: f64,
    pub stride: Stride,
    /// Whether this window reaches the end of the audio.
    pub is_last: bool,
    pub segments: Vec<TimedSegment>,
}

/// A single beam hypothesis reported during decoding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Beam {
    pub output_token_ids: Vec<u32>,
}

/// Segment produced by re-decoding the accumulated chunks. Times are
/// absolute seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSegment {
    pub text: String,
    pub timestamp: (Option<f64>, Option<f64>),
}

/// Options for re-decoding accumulated chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeAsrOptions {
    /// Seconds per timestamp tick.
    pub time_precision: f64,
    pub return_timestamps: bool,
    /// When false, the trailing segment of a window that does not reach the
    /// end of the audio is left open.
    pub force_full_sequence: bool,
}

/// Full output of a re-decode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedAsr {
    pub text: String,
    pub segments: Vec<DecodedSegment>,
}

/// Decoding parameters handed to the inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOptions {
    pub top_k: u32,
    pub do_sample: bool,
    pub chunk_length_s: u32,
    pub stride_length_s: u32,
    pub return_timestamps: bool,
}

impl InferenceOptions {
    /// Greedy decoding with timestamps over strided windows.
    pub fn greedy(chunk_length_s: u32, stride_length_s: u32) -> Self {
        Self {
            top_k: 0,
            do_sample: false,
            chunk_length_s,
            stride_length_s,
            return_timestamps: true,
        }
    }
}

/// Status reported while a pipeline is being constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadProgress {
    Initiate {
        file: String,
    },
    Progress {
        file: String,
        /// Percentage in `0.0..=100.0`.
        progress: f64,
        loaded: u64,
        total: u64,
    },
    Done {
        file: String,
    },
    Ready {
        model: String,
    },
}

pub type ProgressCallback = Arc<dyn Fn(LoadProgress) + Send + Sync>;

/// Progress callback that discards every report.
pub fn ignore_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_options_request_timestamps() {
        let options = InferenceOptions::greedy(30, 5);
        assert_eq!(options.top_k, 0);
        assert!(!options.do_sample);
        assert_eq!(options.chunk_length_s, 30);
        assert_eq!(options.stride_length_s, 5);
        assert!(options.return_timestamps);
    }

    #[test]
    fn ignore_progress_accepts_reports() {
        let progress = ignore_progress();
        progress(LoadProgress::Initiate {
            file: "ggml-tiny.en.bin".to_string(),
        });
    }
}
