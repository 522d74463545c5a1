//! Boundary to the speech-recognition engine.
//!
//! The engine owns model loading, feature extraction and decoding. The worker
//! only sees it through these traits:
//!
//! ```text
//! PipelineFactory ──create──▶ InferencePipeline ──run──▶ GenerationHooks
//!                                   │                      (on_beams / on_chunk)
//!                                   └── tokenizer() ──▶ AsrTokenizer (decode / decode_asr)
//! ```

pub mod loader;
pub mod merge;
pub mod mock;
pub mod types;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use loader::{PipelineCache, PipelineFactory, UnavailableFactory};
pub use mock::{ScriptStep, ScriptedFactory, ScriptedPipeline, ScriptedTokenizer};
pub use types::{
    Beam, DecodeAsrOptions, DecodedAsr, DecodedSegment, InferenceOptions, LoadProgress,
    ProgressCallback, RawChunk, Stride, Tick, TimedSegment,
};

use crate::config::Config;
use crate::error::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Token-level decoding owned by the engine.
pub trait AsrTokenizer: Send + Sync {
    /// Decode a token sequence to text.
    fn decode(&self, token_ids: &[u32], skip_special_tokens: bool) -> Result<String>;

    /// Re-derive timed segments from the full list of chunks seen so far.
    fn decode_asr(&self, chunks: &[RawChunk], options: &DecodeAsrOptions) -> Result<DecodedAsr>;
}

/// Callbacks invoked by the engine while a request is being decoded.
pub trait GenerationHooks: Send {
    /// Called on every decoding step with the current beams, best first.
    fn on_beams(&mut self, beams: &[Beam]);

    /// Called once per completed window.
    fn on_chunk(&mut self, chunk: RawChunk) -> Result<()>;
}

/// A loaded speech-recognition pipeline.
///
/// `run` is blocking; callers move it onto a blocking thread.
pub trait InferencePipeline: Send + Sync {
    /// Name of the loaded model.
    fn model_name(&self) -> &str;

    fn tokenizer(&self) -> &dyn AsrTokenizer;

    /// Seconds of audio covered by one feature window, if the model reports it.
    fn feature_chunk_length(&self) -> Option<f64>;

    /// Number of encoder positions per feature window, if the model reports it.
    fn max_source_positions(&self) -> Option<u32>;

    /// Transcribe 16 kHz mono samples, reporting progress through `hooks`.
    ///
    /// Implementations check `cancel` between windows and return
    /// `ScribeError::Cancelled` once it fires.
    fn run(
        &self,
        audio: &[f32],
        options: &InferenceOptions,
        hooks: &mut dyn GenerationHooks,
        cancel: &CancellationToken,
        request_id: u64,
    ) -> Result<()>;
}

/// Pick the pipeline factory compiled into this build.
#[cfg(feature = "whisper")]
pub fn default_factory(config: &Config) -> Arc<dyn PipelineFactory> {
    Arc::new(whisper::WhisperFactory::from_config(config))
}

/// Pick the pipeline factory compiled into this build.
#[cfg(not(feature = "whisper"))]
pub fn default_factory(config: &Config) -> Arc<dyn PipelineFactory> {
    Arc::new(UnavailableFactory::new(&format!(
        "model '{}' cannot be loaded: this binary was built without the `whisper` feature.\n\
         To fix: cargo build --release --features whisper",
        config.model.name
    )))
}
