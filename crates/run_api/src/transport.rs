//! Synchronous [`RunTransport`] adapter over [`RunApiClient`].

use std::sync::Arc;

use agent_stream::{CancelSignal, RunOutcome, RunRequest, RunSink, RunTransport, TransportError};

use crate::client::RunApiClient;
use crate::config::RunApiConfig;
use crate::error::RunApiError;

/// Stable identifier for the HTTP transport in logs and host selection.
pub const RUN_API_TRANSPORT_ID: &str = "run-api";

trait StreamClient: Send + Sync {
    fn stream(
        &self,
        request: &RunRequest,
        cancel: &CancelSignal,
        sink: &mut dyn RunSink,
    ) -> Result<RunOutcome, RunApiError>;
}

#[derive(Debug)]
struct DefaultStreamClient {
    client: RunApiClient,
}

impl StreamClient for DefaultStreamClient {
    fn stream(
        &self,
        request: &RunRequest,
        cancel: &CancelSignal,
        sink: &mut dyn RunSink,
    ) -> Result<RunOutcome, RunApiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                RunApiError::Runtime(format!("failed to initialize tokio runtime: {error}"))
            })?;

        runtime.block_on(self.client.stream_with_handler(request, Some(cancel), sink))
    }
}

/// `RunTransport` backed by the HTTP/SSE run service.
pub struct RunApiTransport {
    stream_client: Arc<dyn StreamClient>,
}

impl RunApiTransport {
    pub fn new(config: RunApiConfig) -> Result<Self, RunApiError> {
        let client = RunApiClient::new(config)?;
        Ok(Self {
            stream_client: Arc::new(DefaultStreamClient { client }),
        })
    }

    #[cfg(test)]
    fn with_stream_client_for_tests(stream_client: Arc<dyn StreamClient>) -> Self {
        Self { stream_client }
    }
}

impl RunTransport for RunApiTransport {
    fn run(
        &self,
        req: &RunRequest,
        cancel: CancelSignal,
        sink: &mut dyn RunSink,
    ) -> Result<RunOutcome, TransportError> {
        self.stream_client
            .stream(req, &cancel, sink)
            .map_err(RunApiError::into_transport_error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use agent_stream::{new_cancel_signal, StreamEvent};
    use reqwest::StatusCode;

    use super::*;

    struct FakeStreamClient {
        events: Vec<StreamEvent>,
        result: Mutex<Option<Result<RunOutcome, RunApiError>>>,
    }

    impl FakeStreamClient {
        fn new(events: Vec<StreamEvent>, result: Result<RunOutcome, RunApiError>) -> Arc<Self> {
            Arc::new(Self {
                events,
                result: Mutex::new(Some(result)),
            })
        }
    }

    impl StreamClient for FakeStreamClient {
        fn stream(
            &self,
            _request: &RunRequest,
            _cancel: &CancelSignal,
            sink: &mut dyn RunSink,
        ) -> Result<RunOutcome, RunApiError> {
            for event in &self.events {
                sink.event(event.clone());
            }
            self.result
                .lock()
                .expect("fake lock")
                .take()
                .expect("fake called once")
        }
    }

    fn request() -> RunRequest {
        RunRequest {
            run_id: "run-1".to_string(),
            conversation_id: "conv-1".to_string(),
            prompt: "hi".to_string(),
            continuation_token: None,
        }
    }

    #[test]
    fn run_relays_events_and_outcome() {
        let transport = RunApiTransport::with_stream_client_for_tests(FakeStreamClient::new(
            vec![StreamEvent::Text {
                text: "hello".to_string(),
            }],
            Ok(RunOutcome::Success {
                continuation_token: Some("next".to_string()),
            }),
        ));
        let mut seen = Vec::new();

        let outcome = transport
            .run(&request(), new_cancel_signal(), &mut |event: StreamEvent| seen.push(event))
            .expect("run succeeds");

        assert_eq!(seen.len(), 1);
        assert_eq!(
            outcome,
            RunOutcome::Success {
                continuation_token: Some("next".to_string())
            }
        );
    }

    #[test]
    fn run_classifies_status_failures() {
        let transport = RunApiTransport::with_stream_client_for_tests(FakeStreamClient::new(
            Vec::new(),
            Err(RunApiError::Status {
                status: StatusCode::PAYMENT_REQUIRED,
                message: "out of credits".to_string(),
                code: None,
            }),
        ));

        let error = transport
            .run(&request(), new_cancel_signal(), &mut |_: StreamEvent| {})
            .expect_err("payment failure surfaces");

        assert_eq!(
            error,
            TransportError::PaymentRequired {
                message: "out of credits".to_string()
            }
        );
    }

    #[test]
    fn run_maps_cancellation_and_missing_outcome() {
        let cancelled = RunApiTransport::with_stream_client_for_tests(FakeStreamClient::new(
            Vec::new(),
            Err(RunApiError::Cancelled),
        ));
        assert_eq!(
            cancelled.run(&request(), new_cancel_signal(), &mut |_: StreamEvent| {}),
            Err(TransportError::Cancelled)
        );

        let truncated = RunApiTransport::with_stream_client_for_tests(FakeStreamClient::new(
            Vec::new(),
            Err(RunApiError::MissingOutcome),
        ));
        let error = truncated
            .run(&request(), new_cancel_signal(), &mut |_: StreamEvent| {})
            .expect_err("truncated stream fails");
        assert!(error.is_retryable());
    }
}
