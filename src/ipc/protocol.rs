//! JSON message protocol between a host and the transcription worker.
//!
//! Messages are JSON objects, one per line, discriminated by a `type` tag.

use crate::reconcile::{IntervalBatch, PartialPreview, ProcessedInterval};
use serde::{Deserialize, Serialize};

/// Messages sent by the host to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    /// Transcribe a buffer of 16 kHz mono samples in `[-1.0, 1.0]`.
    #[serde(rename_all = "camelCase")]
    InferenceRequest {
        /// Assigned by the worker when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        audio: Vec<f32>,
    },
    /// Cancel an in-flight request.
    #[serde(rename_all = "camelCase")]
    Cancel { request_id: u64 },
    /// Any other message type. Ignored by the worker.
    #[serde(other)]
    Unknown,
}

impl WorkerRequest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Pipeline acquisition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStatus {
    Loading,
    Success,
    Error,
}

/// Message body sent by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
    Loading {
        status: LoadingStatus,
    },
    Downloading {
        file: String,
        progress: f64,
        loaded: u64,
        total: u64,
    },
    ResultPartial {
        result: PartialPreview,
    },
    /// Full replacement snapshot of the processed intervals.
    #[serde(rename_all = "camelCase")]
    Result {
        results: Vec<ProcessedInterval>,
        is_done: bool,
        completed_until_timestamp: i64,
    },
    InferenceDone,
    InferenceError {
        message: String,
    },
    Cancelled,
}

impl WorkerEvent {
    /// Whether no further events follow for the request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::Loading {
                status: LoadingStatus::Error
            } | WorkerEvent::InferenceDone
                | WorkerEvent::InferenceError { .. }
                | WorkerEvent::Cancelled
        )
    }
}

impl From<IntervalBatch> for WorkerEvent {
    fn from(batch: IntervalBatch) -> Self {
        WorkerEvent::Result {
            results: batch.results,
            is_done: batch.is_done,
            completed_until_timestamp: batch.completed_until_timestamp,
        }
    }
}

/// Outbound message: an event tagged with the request it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMessage {
    pub request_id: u64,
    #[serde(flatten)]
    pub event: WorkerEvent,
}

impl WorkerMessage {
    pub fn new(request_id: u64, event: WorkerEvent) -> Self {
        Self { request_id, event }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_request_wire_format() {
        let request = WorkerRequest::InferenceRequest {
            request_id: Some(3),
            audio: vec![0.0, 0.5],
        };
        let json = request.to_json().expect("should serialize");
        assert_eq!(
            json,
            r#"{"type":"INFERENCE_REQUEST","requestId":3,"audio":[0.0,0.5]}"#
        );
    }

    #[test]
    fn test_inference_request_without_id() {
        let request =
            WorkerRequest::from_json(r#"{"type":"INFERENCE_REQUEST","audio":[0.25]}"#).unwrap();
        assert_eq!(
            request,
            WorkerRequest::InferenceRequest {
                request_id: None,
                audio: vec![0.25],
            }
        );
    }

    #[test]
    fn test_cancel_parses() {
        let request = WorkerRequest::from_json(r#"{"type":"CANCEL","requestId":12}"#).unwrap();
        assert_eq!(request, WorkerRequest::Cancel { request_id: 12 });
    }

    #[test]
    fn test_unknown_type_parses_as_unknown() {
        let request = WorkerRequest::from_json(r#"{"type":"PING"}"#).unwrap();
        assert_eq!(request, WorkerRequest::Unknown);
    }

    #[test]
    fn test_invalid_json_returns_error() {
        assert!(WorkerRequest::from_json(r#"{"audio": []}"#).is_err());
        assert!(WorkerRequest::from_json("not json at all").is_err());
    }

    #[test]
    fn test_loading_message_format() {
        let message = WorkerMessage::new(
            1,
            WorkerEvent::Loading {
                status: LoadingStatus::Success,
            },
        );
        assert_eq!(
            message.to_json().unwrap(),
            r#"{"requestId":1,"type":"LOADING","status":"success"}"#
        );
    }

    #[test]
    fn test_partial_result_omits_end() {
        let message = WorkerMessage::new(
            2,
            WorkerEvent::ResultPartial {
                result: PartialPreview {
                    text: " so far".to_string(),
                    start: 4,
                    end: None,
                },
            },
        );
        let json = message.to_json().unwrap();
        assert!(json.contains(r#""type":"RESULT_PARTIAL""#));
        assert!(json.contains(r#""result":{"text":" so far","start":4}"#));
        assert!(!json.contains("end"));
    }

    #[test]
    fn test_result_message_uses_camel_case() {
        let message = WorkerMessage::new(
            5,
            WorkerEvent::from(IntervalBatch {
                results: vec![ProcessedInterval {
                    index: 0,
                    text: "Hello.".to_string(),
                    start: 0,
                    end: 3,
                }],
                is_done: false,
                completed_until_timestamp: 3,
            }),
        );
        let json = message.to_json().unwrap();
        assert!(json.contains(r#""type":"RESULT""#));
        assert!(json.contains(r#""isDone":false"#));
        assert!(json.contains(r#""completedUntilTimestamp":3"#));
        assert!(json.contains(r#""results":[{"index":0,"text":"Hello.","start":0,"end":3}]"#));

        let parsed = WorkerMessage::from_json(&json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_unit_events_format() {
        let done = WorkerMessage::new(1, WorkerEvent::InferenceDone);
        assert_eq!(
            done.to_json().unwrap(),
            r#"{"requestId":1,"type":"INFERENCE_DONE"}"#
        );
        let parsed = WorkerMessage::from_json(r#"{"requestId":4,"type":"CANCELLED"}"#).unwrap();
        assert_eq!(parsed, WorkerMessage::new(4, WorkerEvent::Cancelled));
    }

    #[test]
    fn test_downloading_message_format() {
        let message = WorkerMessage::new(
            1,
            WorkerEvent::Downloading {
                file: "ggml-tiny.en.bin".to_string(),
                progress: 12.5,
                loaded: 125,
                total: 1000,
            },
        );
        let json = message.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"requestId":1,"type":"DOWNLOADING","file":"ggml-tiny.en.bin","progress":12.5,"loaded":125,"total":1000}"#
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(
            WorkerEvent::Loading {
                status: LoadingStatus::Error
            }
            .is_terminal()
        );
        assert!(WorkerEvent::InferenceDone.is_terminal());
        assert!(
            WorkerEvent::InferenceError {
                message: "boom".to_string()
            }
            .is_terminal()
        );
        assert!(WorkerEvent::Cancelled.is_terminal());

        assert!(
            !WorkerEvent::Loading {
                status: LoadingStatus::Success
            }
            .is_terminal()
        );
        assert!(
            !WorkerEvent::ResultPartial {
                result: PartialPreview {
                    text: String::new(),
                    start: 0,
                    end: None
                }
            }
            .is_terminal()
        );
    }
}
