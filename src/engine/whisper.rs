//! whisper.cpp backend.
//!
//! # Feature Gate
//!
//! This module requires the `whisper` feature to be enabled and cmake to be installed.
//!
//! ```bash
//! cargo build --features whisper
//! ```
//!
//! Audio is cut into strided windows and each window is decoded with a full
//! whisper pass. Segment timestamps come back in centiseconds relative to the
//! window and are converted to 20 ms ticks. whisper.cpp does not expose beams
//! mid-decode, so each decoded segment is reported as one beam step carrying
//! the window's text so far.

use crate::config::ModelConfig;
use crate::defaults;
use crate::engine::loader::PipelineFactory;
use crate::engine::merge::merge_chunks;
use crate::engine::types::{
    Beam, DecodeAsrOptions, DecodedAsr, InferenceOptions, LoadProgress, ProgressCallback,
    RawChunk, Stride, Tick, TimedSegment,
};
use crate::engine::{AsrTokenizer, GenerationHooks, InferencePipeline};
use crate::error::{Result, ScribeError};
use crate::models::download;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Centiseconds per 20 ms tick.
const CS_PER_TICK: f64 = 2.0;

#[derive(Debug, Default)]
struct Pieces {
    slots: Vec<Option<String>>,
    free: Vec<u32>,
}

/// Maps decoded segment texts to pseudo token ids.
///
/// Ids are only valid inside the [`InternScope`] that issued them; slots are
/// reused once a scope ends, so the table stays as small as the segments in
/// flight.
#[derive(Debug, Default)]
pub struct SegmentTokenizer {
    pieces: Mutex<Pieces>,
}

impl SegmentTokenizer {
    fn scope(&self) -> InternScope<'_> {
        InternScope {
            tokenizer: self,
            ids: Vec::new(),
        }
    }

    fn intern(&self, text: &str) -> u32 {
        let mut pieces = self.pieces.lock().unwrap_or_else(|e| e.into_inner());
        match pieces.free.pop() {
            Some(id) => {
                pieces.slots[id as usize] = Some(text.to_string());
                id
            }
            None => {
                pieces.slots.push(Some(text.to_string()));
                (pieces.slots.len() - 1) as u32
            }
        }
    }

    fn release(&self, ids: &[u32]) {
        let mut guard = self.pieces.lock().unwrap_or_else(|e| e.into_inner());
        let pieces = &mut *guard;
        for &id in ids {
            if let Some(slot) = pieces.slots.get_mut(id as usize)
                && slot.take().is_some()
            {
                pieces.free.push(id);
            }
        }
    }

    /// Segment texts currently held.
    pub fn live_pieces(&self) -> usize {
        let pieces = self.pieces.lock().unwrap_or_else(|e| e.into_inner());
        pieces.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Slots allocated so far, live or free.
    pub fn slot_count(&self) -> usize {
        self.pieces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .slots
            .len()
    }
}

/// Ids interned for one window; released on drop.
struct InternScope<'a> {
    tokenizer: &'a SegmentTokenizer,
    ids: Vec<u32>,
}

impl InternScope<'_> {
    fn intern(&mut self, text: &str) -> u32 {
        let id = self.tokenizer.intern(text);
        self.ids.push(id);
        id
    }
}

impl Drop for InternScope<'_> {
    fn drop(&mut self) {
        self.tokenizer.release(&self.ids);
    }
}

impl AsrTokenizer for SegmentTokenizer {
    fn decode(&self, token_ids: &[u32], _skip_special_tokens: bool) -> Result<String> {
        let pieces = self.pieces.lock().unwrap_or_else(|e| e.into_inner());
        token_ids
            .iter()
            .map(|&id| {
                pieces
                    .slots
                    .get(id as usize)
                    .and_then(Option::as_deref)
                    .ok_or_else(|| ScribeError::Decode {
                        message: format!("unknown segment id {}", id),
                    })
            })
            .collect()
    }

    fn decode_asr(&self, chunks: &[RawChunk], options: &DecodeAsrOptions) -> Result<DecodedAsr> {
        Ok(merge_chunks(chunks, options))
    }
}

/// Loaded whisper.cpp model.
pub struct WhisperPipeline {
    context: Mutex<WhisperContext>,
    tokenizer: SegmentTokenizer,
    model_name: String,
    language: String,
    threads: Option<usize>,
}

impl std::fmt::Debug for WhisperPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperPipeline")
            .field("model_name", &self.model_name)
            .field("language", &self.language)
            .field("threads", &self.threads)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

impl WhisperPipeline {
    /// Load a ggml model file.
    ///
    /// # Errors
    /// Returns `ScribeError::ModelNotFound` if the model file doesn't exist
    /// Returns `ScribeError::PipelineLoad` if whisper.cpp rejects it
    pub fn load(model_path: &std::path::Path, config: &ModelConfig) -> Result<Self> {
        // Keep whisper.cpp from writing to stderr
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !model_path.is_file() {
            return Err(ScribeError::ModelNotFound {
                path: model_path.to_string_lossy().to_string(),
            });
        }

        let path_str = model_path.to_str().ok_or_else(|| ScribeError::PipelineLoad {
            message: "Invalid UTF-8 in model path".to_string(),
        })?;
        let context = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| ScribeError::PipelineLoad {
                message: format!("Failed to load Whisper model: {}", e),
            })?;

        Ok(Self {
            context: Mutex::new(context),
            tokenizer: SegmentTokenizer::default(),
            model_name: config.name.clone(),
            language: config.language.clone(),
            threads: config.threads,
        })
    }

    /// Decode one window, returning its segments relative to the window start.
    fn decode_window(&self, samples: &[f32]) -> Result<Vec<TimedSegment>> {
        let context = self.context.lock().map_err(|e| ScribeError::Inference {
            message: format!("Failed to acquire context lock: {}", e),
        })?;
        let mut state = context.create_state().map_err(|e| ScribeError::Inference {
            message: format!("Failed to create Whisper state: {}", e),
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if self.language == defaults::AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(&self.language));
        }
        if let Some(threads) = self.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_no_context(true);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| ScribeError::Inference {
                message: format!("Whisper inference failed: {}", e),
            })?;

        Ok(state
            .as_iter()
            .map(|segment| {
                TimedSegment::new(
                    &segment.to_string(),
                    cs_to_ticks(segment.start_timestamp()),
                    Some(cs_to_ticks(segment.end_timestamp())),
                )
            })
            .collect())
    }
}

fn cs_to_ticks(centiseconds: i64) -> Tick {
    (centiseconds as f64 / CS_PER_TICK).round() as Tick
}

/// A window of the request audio, in samples.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Window {
    start: usize,
    end: usize,
    stride: Stride,
    is_last: bool,
}

/// Cut `total` samples into windows of `chunk_length_s` overlapping by
/// `stride_length_s` on each inner edge.
fn plan_windows(total: usize, chunk_length_s: u32, stride_length_s: u32) -> Vec<Window> {
    let rate = defaults::SAMPLE_RATE as usize;
    let chunk = chunk_length_s as usize * rate;
    let stride = stride_length_s as usize * rate;
    let step = chunk.saturating_sub(2 * stride).max(rate);
    let stride_s = stride_length_s as f64;

    let mut windows = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk).min(total);
        let is_last = end == total;
        windows.push(Window {
            start,
            end,
            stride: Stride {
                left_s: if start == 0 { 0.0 } else { stride_s },
                right_s: if is_last { 0.0 } else { stride_s },
            },
            is_last,
        });
        if is_last {
            break;
        }
        start += step;
    }
    windows
}

impl InferencePipeline for WhisperPipeline {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn tokenizer(&self) -> &dyn AsrTokenizer {
        &self.tokenizer
    }

    fn feature_chunk_length(&self) -> Option<f64> {
        Some(defaults::WHISPER_FEATURE_CHUNK_LENGTH)
    }

    fn max_source_positions(&self) -> Option<u32> {
        Some(defaults::WHISPER_MAX_SOURCE_POSITIONS)
    }

    fn run(
        &self,
        audio: &[f32],
        options: &InferenceOptions,
        hooks: &mut dyn GenerationHooks,
        cancel: &CancellationToken,
        request_id: u64,
    ) -> Result<()> {
        let rate = defaults::SAMPLE_RATE as f64;
        let windows = plan_windows(audio.len(), options.chunk_length_s, options.stride_length_s);
        debug!(request_id, windows = windows.len(), "decoding windows");

        for window in windows {
            if cancel.is_cancelled() {
                return Err(ScribeError::Cancelled { request_id });
            }

            let segments = self.decode_window(&audio[window.start..window.end])?;

            // Beams only reference this window's segments.
            let mut scope = self.tokenizer.scope();
            let mut token_ids = Vec::with_capacity(segments.len());
            for segment in &segments {
                token_ids.push(scope.intern(&segment.text));
                hooks.on_beams(&[Beam {
                    output_token_ids: token_ids.clone(),
                }]);
            }

            if cancel.is_cancelled() {
                return Err(ScribeError::Cancelled { request_id });
            }
            hooks.on_chunk(RawChunk {
                offset_s: window.start as f64 / rate,
                duration_s: (window.end - window.start) as f64 / rate,
                stride: window.stride,
                is_last: window.is_last,
                segments,
            })?;
        }
        Ok(())
    }
}

/// Loads the configured model, downloading it first when allowed.
pub struct WhisperFactory {
    config: ModelConfig,
}

impl WhisperFactory {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            config: config.model.clone(),
        }
    }

    async fn ensure_model(&self, progress: ProgressCallback) -> Result<PathBuf> {
        let path = download::configured_model_path(&self.config);
        if path.is_file() {
            return Ok(path);
        }
        if self.config.path.is_some() || !self.config.download {
            return Err(ScribeError::ModelNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }
        info!(model = %self.config.name, "model not installed, downloading");
        download::download_model(&self.config.name, progress).await
    }
}

#[async_trait::async_trait]
impl PipelineFactory for WhisperFactory {
    async fn create(&self, progress: ProgressCallback) -> Result<Arc<dyn InferencePipeline>> {
        let path = self.ensure_model(Arc::clone(&progress)).await?;

        let config = self.config.clone();
        let pipeline = tokio::task::spawn_blocking(move || WhisperPipeline::load(&path, &config))
            .await
            .map_err(|e| ScribeError::PipelineLoad {
                message: format!("Model loading task failed: {}", e),
            })??;

        progress(LoadProgress::Ready {
            model: self.config.name.clone(),
        });
        let pipeline: Arc<dyn InferencePipeline> = Arc::new(pipeline);
        Ok(pipeline)
    }
}
