//! Background transcription worker.
//!
//! Receives [`WorkerRequest`]s, runs each inference request as its own task
//! and reports progress only through outbound [`WorkerMessage`]s:
//!
//! ```text
//! LOADING(loading) ─▶ [DOWNLOADING]* ─▶ LOADING(success) ─▶ [RESULT_PARTIAL | RESULT]* ─▶ INFERENCE_DONE
//!                                   └─▶ LOADING(error)                                  ├─▶ INFERENCE_ERROR
//!                                                                                       └─▶ CANCELLED
//! ```

pub mod phase;
pub mod sink;

pub use phase::RequestPhase;
pub use sink::{ChannelSink, CollectorSink, MessageSink};

use crate::config::DecodingConfig;
use crate::engine::types::{Beam, InferenceOptions, LoadProgress, ProgressCallback, RawChunk};
use crate::engine::{GenerationHooks, PipelineCache};
use crate::error::{Result, ScribeError};
use crate::ipc::protocol::{LoadingStatus, WorkerEvent, WorkerMessage, WorkerRequest};
use crate::reconcile::GenerationTracker;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sends events for one request, enforcing the request lifecycle.
struct RequestEmitter {
    request_id: u64,
    sink: Arc<dyn MessageSink>,
    phase: Mutex<RequestPhase>,
}

impl RequestEmitter {
    fn new(request_id: u64, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            request_id,
            sink,
            phase: Mutex::new(RequestPhase::Idle),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        let Some(next) = phase.advance(&event) else {
            warn!(
                request_id = self.request_id,
                phase = ?*phase,
                event = ?event,
                "dropping event not allowed in current phase"
            );
            return;
        };
        if next != *phase {
            debug!(request_id = self.request_id, from = ?*phase, to = ?next, "request phase changed");
            *phase = next;
        }
        // Sent under the lock so events from the inference thread stay ordered.
        self.sink.send(WorkerMessage::new(self.request_id, event));
    }

    fn phase(&self) -> RequestPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Loader progress adapter: byte-level progress becomes `DOWNLOADING`.
    fn download_progress(self: &Arc<Self>) -> ProgressCallback {
        let emitter = Arc::clone(self);
        Arc::new(move |report| match report {
            LoadProgress::Progress {
                file,
                progress,
                loaded,
                total,
            } => emitter.emit(WorkerEvent::Downloading {
                file,
                progress,
                loaded,
                total,
            }),
            other => debug!(request_id = emitter.request_id, report = ?other, "load progress"),
        })
    }
}

/// Engine hooks wired to a request's reconciler.
struct TrackerHooks {
    tracker: GenerationTracker,
    emitter: Arc<RequestEmitter>,
}

impl GenerationHooks for TrackerHooks {
    fn on_beams(&mut self, beams: &[Beam]) {
        match self.tracker.on_beams(beams) {
            Ok(Some(result)) => self.emitter.emit(WorkerEvent::ResultPartial { result }),
            Ok(None) => {}
            // Previews are advisory; a bad one is skipped.
            Err(e) => warn!(
                request_id = self.emitter.request_id,
                error = %e,
                "failed to decode partial preview"
            ),
        }
    }

    fn on_chunk(&mut self, chunk: RawChunk) -> Result<()> {
        let batch = self.tracker.on_chunk(chunk)?;
        debug!(
            request_id = self.emitter.request_id,
            chunks = self.tracker.chunk_count(),
            intervals = batch.results.len(),
            "chunk reconciled"
        );
        self.emitter.emit(WorkerEvent::from(batch));
        Ok(())
    }
}

struct ActiveRequest {
    registration: u64,
    cancel: CancellationToken,
}

/// Transcription worker.
///
/// Requests may overlap; each one is identified by its request id. All
/// requests share the pipeline held by the cache.
pub struct Worker {
    cache: Arc<PipelineCache>,
    sink: Arc<dyn MessageSink>,
    decoding: DecodingConfig,
    next_id: AtomicU64,
    next_registration: AtomicU64,
    active: Mutex<HashMap<u64, ActiveRequest>>,
}

impl Worker {
    pub fn new(
        cache: Arc<PipelineCache>,
        sink: Arc<dyn MessageSink>,
        decoding: DecodingConfig,
    ) -> Self {
        Self {
            cache,
            sink,
            decoding,
            next_id: AtomicU64::new(1),
            next_registration: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Pipeline cache shared by this worker's requests.
    pub fn cache(&self) -> &Arc<PipelineCache> {
        &self.cache
    }

    /// Number of requests currently in flight.
    pub fn active_requests(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Handle one inbound message.
    ///
    /// Inference requests are spawned and their handle returned; other
    /// messages are handled inline.
    pub fn dispatch(self: &Arc<Self>, request: WorkerRequest) -> Option<JoinHandle<RequestPhase>> {
        match request {
            WorkerRequest::InferenceRequest { request_id, audio } => {
                let request_id = self.assign_id(request_id);
                let (registration, cancel) = self.register(request_id);

                let worker = Arc::clone(self);
                Some(tokio::spawn(async move {
                    let phase = worker.transcribe(request_id, audio, cancel).await;
                    worker.unregister(request_id, registration);
                    phase
                }))
            }
            WorkerRequest::Cancel { request_id } => {
                if !self.cancel(request_id) {
                    debug!(request_id, "cancel for unknown or finished request");
                }
                None
            }
            WorkerRequest::Unknown => {
                debug!("ignoring unrecognized message");
                None
            }
        }
    }

    /// Cancel an in-flight request. Returns false if no such request is running.
    pub fn cancel(&self, request_id: u64) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(&request_id) {
            Some(request) => {
                info!(request_id, "cancelling request");
                request.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight request.
    pub fn cancel_all(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for request in active.values() {
            request.cancel.cancel();
        }
    }

    /// Process requests until the channel closes, then wait for in-flight
    /// requests to finish.
    pub async fn run(self: Arc<Self>, mut requests: mpsc::Receiver<WorkerRequest>) {
        let mut in_flight: Vec<JoinHandle<RequestPhase>> = Vec::new();

        while let Some(request) = requests.recv().await {
            if let Some(handle) = self.dispatch(request) {
                in_flight.retain(|h| !h.is_finished());
                in_flight.push(handle);
            }
        }

        debug!(pending = in_flight.len(), "request channel closed");
        for handle in in_flight {
            if let Err(e) = handle.await {
                warn!(error = %e, "request task failed");
            }
        }
    }

    /// Run one request to its terminal message and return its final phase.
    pub async fn transcribe(
        &self,
        request_id: u64,
        audio: Vec<f32>,
        cancel: CancellationToken,
    ) -> RequestPhase {
        let emitter = Arc::new(RequestEmitter::new(request_id, Arc::clone(&self.sink)));
        info!(request_id, samples = audio.len(), "transcription requested");

        emitter.emit(WorkerEvent::Loading {
            status: LoadingStatus::Loading,
        });
        let pipeline = match self.cache.get_instance(emitter.download_progress()).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!(request_id, error = %e, "pipeline unavailable");
                emitter.emit(WorkerEvent::Loading {
                    status: LoadingStatus::Error,
                });
                return emitter.phase();
            }
        };
        emitter.emit(WorkerEvent::Loading {
            status: LoadingStatus::Success,
        });

        if cancel.is_cancelled() {
            info!(request_id, "request cancelled before inference");
            emitter.emit(WorkerEvent::Cancelled);
            return emitter.phase();
        }

        let tracker = GenerationTracker::new(Arc::clone(&pipeline), self.decoding.stride_length_s)
            .with_partial_every(self.decoding.partial_every);
        let mut hooks = TrackerHooks {
            tracker,
            emitter: Arc::clone(&emitter),
        };
        let options =
            InferenceOptions::greedy(self.decoding.chunk_length_s, self.decoding.stride_length_s);

        let outcome = tokio::task::spawn_blocking(move || {
            pipeline.run(&audio, &options, &mut hooks, &cancel, request_id)
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                info!(request_id, "transcription finished");
                emitter.emit(WorkerEvent::InferenceDone);
            }
            Ok(Err(ScribeError::Cancelled { .. })) => {
                info!(request_id, "transcription cancelled");
                emitter.emit(WorkerEvent::Cancelled);
            }
            Ok(Err(e)) => {
                warn!(request_id, error = %e, "transcription failed");
                emitter.emit(WorkerEvent::InferenceError {
                    message: e.to_string(),
                });
            }
            Err(e) => {
                warn!(request_id, error = %e, "inference task aborted");
                emitter.emit(WorkerEvent::InferenceError {
                    message: format!("inference task aborted: {}", e),
                });
            }
        }
        emitter.phase()
    }

    fn assign_id(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(id) => {
                // Keep generated ids clear of ids chosen by the host.
                self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);
                id
            }
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }

    fn register(&self, request_id: u64) -> (u64, CancellationToken) {
        let registration = self.next_registration.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                request_id,
                ActiveRequest {
                    registration,
                    cancel: cancel.clone(),
                },
            );
        if previous.is_some() {
            warn!(
                request_id,
                "request id reused while still in flight; cancel now targets the newer request"
            );
        }
        (registration, cancel)
    }

    fn unregister(&self, request_id: u64, registration: u64) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active
            .get(&request_id)
            .is_some_and(|request| request.registration == registration)
        {
            active.remove(&request_id);
        }
    }
}
