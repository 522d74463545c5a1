use crate::ipc::protocol::{LoadingStatus, WorkerEvent};

/// Lifecycle of a single transcription request.
///
/// ```text
/// Idle ─▶ Loading ─┬─▶ LoadFailed
///                  └─▶ Ready ─▶ Streaming ─┬─▶ Done
///                                          ├─▶ Failed
///                                          └─▶ Cancelled
/// ```
///
/// `Ready` may go straight to any terminal phase when inference produces no
/// intermediate results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    /// Pipeline is being acquired.
    Loading,
    /// Pipeline acquired, inference not yet reporting.
    Ready,
    /// Inference is reporting results.
    Streaming,
    Done,
    LoadFailed,
    Failed,
    Cancelled,
}

impl RequestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestPhase::Done
                | RequestPhase::LoadFailed
                | RequestPhase::Failed
                | RequestPhase::Cancelled
        )
    }

    /// Phase after emitting `event`, or `None` if the event is not allowed
    /// in this phase.
    pub fn advance(self, event: &WorkerEvent) -> Option<RequestPhase> {
        use RequestPhase::*;

        match (self, event) {
            (
                Idle,
                WorkerEvent::Loading {
                    status: LoadingStatus::Loading,
                },
            ) => Some(Loading),
            (Loading, WorkerEvent::Downloading { .. }) => Some(Loading),
            (
                Loading,
                WorkerEvent::Loading {
                    status: LoadingStatus::Success,
                },
            ) => Some(Ready),
            (
                Loading,
                WorkerEvent::Loading {
                    status: LoadingStatus::Error,
                },
            ) => Some(LoadFailed),
            (Ready | Streaming, WorkerEvent::ResultPartial { .. } | WorkerEvent::Result { .. }) => {
                Some(Streaming)
            }
            (Ready | Streaming, WorkerEvent::InferenceDone) => Some(Done),
            (Ready | Streaming, WorkerEvent::InferenceError { .. }) => Some(Failed),
            (Ready | Streaming, WorkerEvent::Cancelled) => Some(Cancelled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::PartialPreview;

    fn loading(status: LoadingStatus) -> WorkerEvent {
        WorkerEvent::Loading { status }
    }

    fn result() -> WorkerEvent {
        WorkerEvent::Result {
            results: Vec::new(),
            is_done: false,
            completed_until_timestamp: 0,
        }
    }

    fn run(events: &[WorkerEvent]) -> Option<RequestPhase> {
        events
            .iter()
            .try_fold(RequestPhase::Idle, |phase, event| phase.advance(event))
    }

    #[test]
    fn test_happy_path_reaches_done() {
        let phase = run(&[
            loading(LoadingStatus::Loading),
            WorkerEvent::Downloading {
                file: "model.bin".to_string(),
                progress: 50.0,
                loaded: 1,
                total: 2,
            },
            loading(LoadingStatus::Success),
            WorkerEvent::ResultPartial {
                result: PartialPreview {
                    text: "hi".to_string(),
                    start: 0,
                    end: None,
                },
            },
            result(),
            result(),
            WorkerEvent::InferenceDone,
        ]);
        assert_eq!(phase, Some(RequestPhase::Done));
    }

    #[test]
    fn test_load_failure_is_terminal() {
        let phase = run(&[loading(LoadingStatus::Loading), loading(LoadingStatus::Error)]);
        assert_eq!(phase, Some(RequestPhase::LoadFailed));
        assert!(RequestPhase::LoadFailed.is_terminal());
        assert_eq!(RequestPhase::LoadFailed.advance(&result()), None);
    }

    #[test]
    fn test_loading_cannot_be_skipped() {
        assert_eq!(RequestPhase::Idle.advance(&result()), None);
        assert_eq!(RequestPhase::Idle.advance(&WorkerEvent::InferenceDone), None);
        assert_eq!(
            RequestPhase::Idle.advance(&loading(LoadingStatus::Success)),
            None
        );
    }

    #[test]
    fn test_ready_may_end_without_results() {
        assert_eq!(
            RequestPhase::Ready.advance(&WorkerEvent::InferenceDone),
            Some(RequestPhase::Done)
        );
        assert_eq!(
            RequestPhase::Ready.advance(&WorkerEvent::Cancelled),
            Some(RequestPhase::Cancelled)
        );
    }

    #[test]
    fn test_streaming_failure_and_cancellation() {
        let error = WorkerEvent::InferenceError {
            message: "boom".to_string(),
        };
        assert_eq!(
            RequestPhase::Streaming.advance(&error),
            Some(RequestPhase::Failed)
        );
        assert_eq!(
            RequestPhase::Streaming.advance(&WorkerEvent::Cancelled),
            Some(RequestPhase::Cancelled)
        );
    }

    #[test]
    fn test_terminal_phases_accept_nothing() {
        for phase in [
            RequestPhase::Done,
            RequestPhase::Failed,
            RequestPhase::Cancelled,
        ] {
            assert!(phase.is_terminal());
            assert_eq!(phase.advance(&WorkerEvent::InferenceDone), None);
            assert_eq!(phase.advance(&result()), None);
        }
        assert!(!RequestPhase::Streaming.is_terminal());
    }
}
