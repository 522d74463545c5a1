//! Drives the worker through its public API with a scripted pipeline.

use std::sync::Arc;
use std::time::Duration;
use streamscribe::engine::{
    RawChunk, ScriptStep, ScriptedFactory, ScriptedPipeline, ScriptedTokenizer, Stride,
    TimedSegment,
};
use streamscribe::{
    CollectorSink, DecodingConfig, LoadingStatus, PipelineCache, RequestPhase, Worker,
    WorkerEvent, WorkerRequest,
};

const SAMPLE_RATE: usize = 16_000;

fn window(offset: f64, is_last: bool, segments: Vec<TimedSegment>) -> RawChunk {
    RawChunk {
        offset_s: offset,
        duration_s: if is_last { 12.0 - offset } else { 10.0 },
        stride: Stride {
            left_s: if offset > 0.0 { 2.0 } else { 0.0 },
            right_s: if is_last { 0.0 } else { 2.0 },
        },
        is_last,
        segments,
    }
}

fn two_window_pipeline() -> ScriptedPipeline {
    ScriptedPipeline::new("scripted")
        .with_tokenizer(ScriptedTokenizer::new().with_token(1, " Hello"))
        .with_steps(vec![
            ScriptStep::beam(&[1]),
            ScriptStep::Chunk(window(
                0.0,
                false,
                vec![TimedSegment::new(" Hello", 0, Some(150))],
            )),
            ScriptStep::Chunk(window(
                8.0,
                true,
                vec![TimedSegment::new(" world.", 50, Some(150))],
            )),
        ])
}

fn worker_for(factory: Arc<ScriptedFactory>) -> (Arc<Worker>, Arc<CollectorSink>) {
    let sink = Arc::new(CollectorSink::new());
    let worker = Arc::new(Worker::new(
        Arc::new(PipelineCache::new(factory)),
        sink.clone(),
        DecodingConfig::default(),
    ));
    (worker, sink)
}

fn request(id: u64, seconds: usize) -> WorkerRequest {
    WorkerRequest::InferenceRequest {
        request_id: Some(id),
        audio: vec![0.0; SAMPLE_RATE * seconds],
    }
}

#[tokio::test]
async fn test_twelve_second_buffer_streams_two_snapshots() {
    let factory = Arc::new(ScriptedFactory::new(two_window_pipeline()));
    let (worker, sink) = worker_for(factory);

    let phase = worker.dispatch(request(3, 12)).unwrap().await.unwrap();
    assert_eq!(phase, RequestPhase::Done);

    let events = sink.events_for(3);
    assert_eq!(
        events[0],
        WorkerEvent::Loading {
            status: LoadingStatus::Loading
        }
    );
    assert_eq!(
        events[1],
        WorkerEvent::Loading {
            status: LoadingStatus::Success
        }
    );
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, WorkerEvent::Downloading { .. })),
        "no download for a model that needs none"
    );
    assert_eq!(events.last(), Some(&WorkerEvent::InferenceDone));

    let snapshots: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::Result {
                results,
                completed_until_timestamp,
                ..
            } => Some((results.clone(), *completed_until_timestamp)),
            _ => None,
        })
        .collect();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].0.len(), 1);
    assert_eq!(snapshots[0].0[0].text, "Hello");

    let (final_results, completed_until) = &snapshots[1];
    assert_eq!(final_results.len(), 2);
    assert_eq!(final_results[1].text, "world.");
    assert!(final_results[0].start <= final_results[1].start);
    assert_eq!(*completed_until, final_results[1].end);
}

#[tokio::test]
async fn test_every_message_carries_request_id() {
    let factory = Arc::new(ScriptedFactory::new(two_window_pipeline()));
    let (worker, sink) = worker_for(factory);

    worker.dispatch(request(42, 12)).unwrap().await.unwrap();

    let messages = sink.messages();
    assert!(!messages.is_empty());
    assert!(messages.iter().all(|m| m.request_id == 42));
}

#[tokio::test]
async fn test_load_failure_emits_loading_then_error() {
    let factory = Arc::new(ScriptedFactory::new(two_window_pipeline()).failing_times(1));
    let (worker, sink) = worker_for(factory.clone());

    let phase = worker.dispatch(request(1, 1)).unwrap().await.unwrap();
    assert_eq!(phase, RequestPhase::LoadFailed);
    assert_eq!(
        sink.events_for(1),
        vec![
            WorkerEvent::Loading {
                status: LoadingStatus::Loading
            },
            WorkerEvent::Loading {
                status: LoadingStatus::Error
            },
        ]
    );

    // A later request retries construction.
    let phase = worker.dispatch(request(2, 12)).unwrap().await.unwrap();
    assert_eq!(phase, RequestPhase::Done);
    assert_eq!(factory.construction_count(), 2);
}

#[tokio::test]
async fn test_concurrent_requests_construct_pipeline_once() {
    let factory = Arc::new(
        ScriptedFactory::new(two_window_pipeline()).with_delay(Duration::from_millis(50)),
    );
    let (worker, sink) = worker_for(factory.clone());

    let handles: Vec<_> = (1..=4)
        .map(|id| worker.dispatch(request(id, 12)).unwrap())
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), RequestPhase::Done);
    }

    assert_eq!(factory.construction_count(), 1);
    for id in 1..=4 {
        assert_eq!(sink.events_for(id).last(), Some(&WorkerEvent::InferenceDone));
    }
}

#[tokio::test]
async fn test_inference_failure_ends_with_error_message() {
    let pipeline = ScriptedPipeline::new("scripted").with_steps(vec![
        ScriptStep::Chunk(window(0.0, false, Vec::new())),
        ScriptStep::Fail("decoder exploded".to_string()),
    ]);
    let (worker, sink) = worker_for(Arc::new(ScriptedFactory::new(pipeline)));

    let phase = worker.dispatch(request(5, 12)).unwrap().await.unwrap();
    assert_eq!(phase, RequestPhase::Failed);

    let events = sink.events_for(5);
    match events.last() {
        Some(WorkerEvent::InferenceError { message }) => {
            assert!(message.contains("decoder exploded"), "got: {message}")
        }
        other => panic!("Expected InferenceError, got: {:?}", other),
    }
    assert!(!events.contains(&WorkerEvent::InferenceDone));
}

#[tokio::test]
async fn test_cancel_request_mid_inference() {
    let pipeline = ScriptedPipeline::new("scripted").with_steps(vec![
        ScriptStep::Pause(Duration::from_millis(200)),
        ScriptStep::Chunk(window(0.0, true, Vec::new())),
    ]);
    let (worker, sink) = worker_for(Arc::new(ScriptedFactory::new(pipeline)));

    let handle = worker.dispatch(request(9, 12)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(worker.dispatch(WorkerRequest::Cancel { request_id: 9 }).is_none());

    assert_eq!(handle.await.unwrap(), RequestPhase::Cancelled);
    let events = sink.events_for(9);
    assert_eq!(events.last(), Some(&WorkerEvent::Cancelled));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, WorkerEvent::Result { .. }))
    );
    assert_eq!(worker.active_requests(), 0);
}

#[tokio::test]
async fn test_unknown_messages_are_ignored() {
    let (worker, sink) = worker_for(Arc::new(ScriptedFactory::new(two_window_pipeline())));

    let unknown = WorkerRequest::from_json(r#"{"type":"PING","payload":1}"#).unwrap();
    assert_eq!(unknown, WorkerRequest::Unknown);
    assert!(worker.dispatch(unknown).is_none());

    assert!(sink.messages().is_empty());
    assert_eq!(worker.active_requests(), 0);
}
