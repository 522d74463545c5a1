//! Lazy, single-flight access to the inference pipeline.

use crate::engine::InferencePipeline;
use crate::engine::types::ProgressCallback;
use crate::error::{Result, ScribeError};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Constructs inference pipelines. Construction may download weights and
/// take arbitrarily long.
#[async_trait::async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn create(&self, progress: ProgressCallback) -> Result<Arc<dyn InferencePipeline>>;
}

/// Factory that always fails with a fixed message.
#[derive(Debug, Clone)]
pub struct UnavailableFactory {
    message: String,
}

impl UnavailableFactory {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl PipelineFactory for UnavailableFactory {
    async fn create(&self, _progress: ProgressCallback) -> Result<Arc<dyn InferencePipeline>> {
        Err(ScribeError::PipelineLoad {
            message: self.message.clone(),
        })
    }
}

/// Process-wide pipeline handle.
///
/// The first caller starts construction; callers arriving while it runs
/// await the same construction. A failed construction leaves the cache
/// empty so the next caller retries.
pub struct PipelineCache {
    factory: Arc<dyn PipelineFactory>,
    cell: OnceCell<Arc<dyn InferencePipeline>>,
}

impl PipelineCache {
    pub fn new(factory: Arc<dyn PipelineFactory>) -> Self {
        Self {
            factory,
            cell: OnceCell::new(),
        }
    }

    /// Cache that already holds a constructed pipeline.
    pub fn preloaded(pipeline: Arc<dyn InferencePipeline>) -> Self {
        Self {
            factory: Arc::new(UnavailableFactory::new("pipeline cache was preloaded")),
            cell: OnceCell::new_with(Some(pipeline)),
        }
    }

    /// Get the pipeline, constructing it on first use.
    ///
    /// `progress` only receives reports if this call performs the construction.
    pub async fn get_instance(
        &self,
        progress: ProgressCallback,
    ) -> Result<Arc<dyn InferencePipeline>> {
        if let Some(pipeline) = self.cell.get() {
            return Ok(Arc::clone(pipeline));
        }

        let pipeline = self
            .cell
            .get_or_try_init(|| async {
                debug!("constructing inference pipeline");
                match self.factory.create(progress).await {
                    Ok(pipeline) => {
                        info!(model = pipeline.model_name(), "inference pipeline ready");
                        Ok(pipeline)
                    }
                    Err(e) => {
                        warn!(error = %e, "inference pipeline construction failed");
                        Err(e)
                    }
                }
            })
            .await?;

        Ok(Arc::clone(pipeline))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}
