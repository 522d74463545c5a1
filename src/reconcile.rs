//! Chunk reconciliation for streaming transcription.
//!
//! The engine reports overlapping windows one at a time. Each new window is
//! appended to the history and the whole history is re-decoded, because later
//! context can move boundaries decided earlier. The resulting segments
//! replace the previous interval list wholesale.
//!
//! A separate, throttled path turns beam-decode steps into a cheap text
//! preview positioned after the last finalized interval.

use crate::defaults;
use crate::engine::types::{Beam, DecodeAsrOptions, DecodedSegment, RawChunk};
use crate::engine::InferencePipeline;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A finalized, displayable piece of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedInterval {
    pub index: usize,
    pub text: String,
    /// Rounded seconds.
    pub start: i64,
    /// Rounded seconds; estimated from the stride when the engine left it open.
    pub end: i64,
}

/// Advisory text for the segment currently being decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialPreview {
    pub text: String,
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Snapshot emitted after every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalBatch {
    pub results: Vec<ProcessedInterval>,
    pub is_done: bool,
    pub completed_until_timestamp: i64,
}

/// Seconds per timestamp tick for a model geometry.
///
/// Falls back to [`defaults::FALLBACK_TIME_PRECISION`] when either input is
/// missing or zero.
pub fn time_precision(feature_chunk_length: Option<f64>, max_source_positions: Option<u32>) -> f64 {
    match (feature_chunk_length, max_source_positions) {
        (Some(length), Some(positions)) if positions > 0 => {
            let precision = length / positions as f64;
            if precision.is_finite() && precision > 0.0 {
                precision
            } else {
                defaults::FALLBACK_TIME_PRECISION
            }
        }
        _ => defaults::FALLBACK_TIME_PRECISION,
    }
}

/// Per-request reconciliation state.
///
/// Created when a request starts streaming and dropped with its terminal
/// message. Callbacks return what should be emitted instead of sending it.
pub struct GenerationTracker {
    pipeline: Arc<dyn InferencePipeline>,
    stride_length_s: f64,
    partial_every: u64,
    time_precision: f64,
    chunks: Vec<RawChunk>,
    intervals: Vec<ProcessedInterval>,
    beam_calls: u64,
}

impl GenerationTracker {
    pub fn new(pipeline: Arc<dyn InferencePipeline>, stride_length_s: u32) -> Self {
        let time_precision = time_precision(
            pipeline.feature_chunk_length(),
            pipeline.max_source_positions(),
        );
        Self {
            pipeline,
            stride_length_s: stride_length_s as f64,
            partial_every: defaults::PARTIAL_EVERY,
            time_precision,
            chunks: Vec::new(),
            intervals: Vec::new(),
            beam_calls: 0,
        }
    }

    /// Emit a preview on every `every`th beam step instead of every tenth.
    pub fn with_partial_every(mut self, every: u64) -> Self {
        self.partial_every = every.max(1);
        self
    }

    pub fn time_precision(&self) -> f64 {
        self.time_precision
    }

    pub fn intervals(&self) -> &[ProcessedInterval] {
        &self.intervals
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// End of the last finalized interval, or 0 before any exist.
    pub fn completed_until(&self) -> i64 {
        self.intervals.last().map_or(0, |interval| interval.end)
    }

    /// Handle a beam-decode step.
    ///
    /// Returns a preview on every `partial_every`th call and `None` otherwise.
    pub fn on_beams(&mut self, beams: &[Beam]) -> Result<Option<PartialPreview>> {
        self.beam_calls += 1;
        if !self.beam_calls.is_multiple_of(self.partial_every) {
            return Ok(None);
        }

        let Some(best) = beams.first() else {
            return Ok(None);
        };
        let text = self
            .pipeline
            .tokenizer()
            .decode(&best.output_token_ids, true)?;

        Ok(Some(PartialPreview {
            text,
            start: self.completed_until(),
            end: None,
        }))
    }

    /// Handle a completed window: re-decode the full history and replace the
    /// interval list.
    pub fn on_chunk(&mut self, chunk: RawChunk) -> Result<IntervalBatch> {
        self.chunks.push(chunk);

        let decoded = self.pipeline.tokenizer().decode_asr(
            &self.chunks,
            &DecodeAsrOptions {
                time_precision: self.time_precision,
                return_timestamps: true,
                force_full_sequence: false,
            },
        )?;

        self.intervals = decoded
            .segments
            .iter()
            .enumerate()
            .map(|(index, segment)| self.process_segment(segment, index))
            .collect();

        Ok(IntervalBatch {
            results: self.intervals.clone(),
            is_done: false,
            completed_until_timestamp: self.completed_until(),
        })
    }

    fn process_segment(&self, segment: &DecodedSegment, index: usize) -> ProcessedInterval {
        let (start, end) = segment.timestamp;
        let start_s = start.unwrap_or(0.0);
        let start = round_half_up(start_s);

        // A reported end that rounds to zero is treated like a missing one.
        let end = match end.map(round_half_up) {
            Some(end) if end != 0 => end,
            _ => round_half_up(start_s + defaults::END_ESTIMATE_FACTOR * self.stride_length_s),
        };

        ProcessedInterval {
            index,
            text: segment.text.trim().to_string(),
            start,
            end: end.max(start),
        }
    }
}

/// Nearest whole second, halves rounded toward positive infinity.
fn round_half_up(seconds: f64) -> i64 {
    (seconds + 0.5).floor() as i64
}
