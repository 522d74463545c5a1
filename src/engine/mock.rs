//! Deterministic pipeline for tests, benchmarks and offline demos.
//!
//! `ScriptedPipeline` replays a fixed list of steps instead of running a
//! model, so the worker protocol can be exercised end to end without weights.

use crate::defaults;
use crate::engine::loader::PipelineFactory;
use crate::engine::merge::merge_chunks;
use crate::engine::types::{
    Beam, DecodeAsrOptions, DecodedAsr, InferenceOptions, LoadProgress, ProgressCallback,
    RawChunk,
};
use crate::engine::{AsrTokenizer, GenerationHooks, InferencePipeline};
use crate::error::{Result, ScribeError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One step replayed by [`ScriptedPipeline::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Report a beam-decode step.
    Beams(Vec<Beam>),
    /// Report a completed window.
    Chunk(RawChunk),
    /// Block the inference thread.
    Pause(Duration),
    /// Abort inference with an error.
    Fail(String),
}

impl ScriptStep {
    /// A beam step with a single hypothesis.
    pub fn beam(token_ids: &[u32]) -> Self {
        ScriptStep::Beams(vec![Beam {
            output_token_ids: token_ids.to_vec(),
        }])
    }
}

/// Vocabulary-table tokenizer.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTokenizer {
    vocab: HashMap<u32, String>,
    special: HashSet<u32>,
}

impl ScriptedTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, id: u32, text: &str) -> Self {
        self.vocab.insert(id, text.to_string());
        self
    }

    pub fn with_special_token(mut self, id: u32, text: &str) -> Self {
        self.vocab.insert(id, text.to_string());
        self.special.insert(id);
        self
    }
}

impl AsrTokenizer for ScriptedTokenizer {
    fn decode(&self, token_ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        let mut text = String::new();
        for id in token_ids {
            if skip_special_tokens && self.special.contains(id) {
                continue;
            }
            let piece = self.vocab.get(id).ok_or_else(|| ScribeError::Decode {
                message: format!("unknown token id {}", id),
            })?;
            text.push_str(piece);
        }
        Ok(text)
    }

    fn decode_asr(&self, chunks: &[RawChunk], options: &DecodeAsrOptions) -> Result<DecodedAsr> {
        Ok(merge_chunks(chunks, options))
    }
}

/// Pipeline that replays scripted steps.
#[derive(Debug)]
pub struct ScriptedPipeline {
    model_name: String,
    tokenizer: ScriptedTokenizer,
    steps: Vec<ScriptStep>,
    feature_chunk_length: Option<f64>,
    max_source_positions: Option<u32>,
    runs: AtomicUsize,
    steps_run: AtomicUsize,
    cancelled_runs: AtomicUsize,
}

impl ScriptedPipeline {
    /// Create a pipeline with Whisper geometry and no steps.
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            tokenizer: ScriptedTokenizer::new(),
            steps: Vec::new(),
            feature_chunk_length: Some(defaults::WHISPER_FEATURE_CHUNK_LENGTH),
            max_source_positions: Some(defaults::WHISPER_MAX_SOURCE_POSITIONS),
            runs: AtomicUsize::new(0),
            steps_run: AtomicUsize::new(0),
            cancelled_runs: AtomicUsize::new(0),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: ScriptedTokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_steps(mut self, steps: Vec<ScriptStep>) -> Self {
        self.steps = steps;
        self
    }

    /// Override the model geometry used to derive the time precision.
    pub fn with_geometry(
        mut self,
        feature_chunk_length: Option<f64>,
        max_source_positions: Option<u32>,
    ) -> Self {
        self.feature_chunk_length = feature_chunk_length;
        self.max_source_positions = max_source_positions;
        self
    }

    /// Number of times `run` has been called.
    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Steps executed across all runs.
    pub fn steps_run(&self) -> usize {
        self.steps_run.load(Ordering::SeqCst)
    }

    /// Runs that stopped because their cancel token fired.
    pub fn cancelled_runs(&self) -> usize {
        self.cancelled_runs.load(Ordering::SeqCst)
    }

    fn cancelled(&self, request_id: u64) -> ScribeError {
        self.cancelled_runs.fetch_add(1, Ordering::SeqCst);
        ScribeError::Cancelled { request_id }
    }
}

impl InferencePipeline for ScriptedPipeline {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn tokenizer(&self) -> &dyn AsrTokenizer {
        &self.tokenizer
    }

    fn feature_chunk_length(&self) -> Option<f64> {
        self.feature_chunk_length
    }

    fn max_source_positions(&self) -> Option<u32> {
        self.max_source_positions
    }

    fn run(
        &self,
        _audio: &[f32],
        _options: &InferenceOptions,
        hooks: &mut dyn GenerationHooks,
        cancel: &CancellationToken,
        request_id: u64,
    ) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        for step in &self.steps {
            if cancel.is_cancelled() {
                return Err(self.cancelled(request_id));
            }
            self.steps_run.fetch_add(1, Ordering::SeqCst);
            match step {
                ScriptStep::Beams(beams) => hooks.on_beams(beams),
                ScriptStep::Chunk(chunk) => hooks.on_chunk(chunk.clone())?,
                ScriptStep::Pause(duration) => std::thread::sleep(*duration),
                ScriptStep::Fail(message) => {
                    return Err(ScribeError::Inference {
                        message: message.clone(),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(self.cancelled(request_id));
        }
        Ok(())
    }
}

/// Factory handing out one shared [`ScriptedPipeline`].
pub struct ScriptedFactory {
    pipeline: Arc<ScriptedPipeline>,
    delay: Option<Duration>,
    progress: Vec<LoadProgress>,
    failures_remaining: AtomicUsize,
    constructions: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(pipeline: ScriptedPipeline) -> Self {
        Self::from_arc(Arc::new(pipeline))
    }

    pub fn from_arc(pipeline: Arc<ScriptedPipeline>) -> Self {
        Self {
            pipeline,
            delay: None,
            progress: Vec::new(),
            failures_remaining: AtomicUsize::new(0),
            constructions: AtomicUsize::new(0),
        }
    }

    /// Simulate slow construction.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Progress reports emitted during each construction.
    pub fn with_progress(mut self, progress: Vec<LoadProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Fail the next `times` constructions.
    pub fn failing_times(self, times: usize) -> Self {
        self.failures_remaining.store(times, Ordering::SeqCst);
        self
    }

    /// Number of constructions attempted so far.
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PipelineFactory for ScriptedFactory {
    async fn create(&self, progress: ProgressCallback) -> Result<Arc<dyn InferencePipeline>> {
        self.constructions.fetch_add(1, Ordering::SeqCst);

        for report in &self.progress {
            progress(report.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ScribeError::PipelineLoad {
                message: "scripted construction failure".to_string(),
            });
        }

        let pipeline: Arc<dyn InferencePipeline> = self.pipeline.clone();
        Ok(pipeline)
    }
}
