use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};

use agent_stream::{RunOutcome, RunRequest, RunSink, StreamEvent, IDLE_TICK};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};

use crate::config::RunApiConfig;
use crate::error::{parse_error_body, RunApiError};
use crate::headers::build_headers;
use crate::payload::RunPayload;
use crate::sse::{SseFrame, SseStreamParser};
use crate::url::resolve_runs_url;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

#[derive(Debug)]
pub struct RunApiClient {
    http: Client,
    config: RunApiConfig,
}

impl RunApiClient {
    pub fn new(config: RunApiConfig) -> Result<Self, RunApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(RunApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RunApiConfig {
        &self.config
    }

    pub fn build_headers(&self) -> Result<HeaderMap, RunApiError> {
        let headers = build_headers(&self.config)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| RunApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    RunApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(&self, request: &RunRequest) -> Result<reqwest::RequestBuilder, RunApiError> {
        let endpoint = resolve_runs_url(&self.config.base_url)?;
        let headers = self.build_headers()?;
        Ok(self
            .http
            .post(endpoint)
            .headers(headers)
            .json(&RunPayload::from(request)))
    }

    /// Sends the run request once, turning non-success statuses into errors.
    pub async fn send(
        &self,
        request: &RunRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, RunApiError> {
        self.send_ticking(request, cancellation, &mut |_: StreamEvent| {})
            .await
    }

    async fn send_ticking<S>(
        &self,
        request: &RunRequest,
        cancellation: Option<&CancellationSignal>,
        sink: &mut S,
    ) -> Result<Response, RunApiError>
    where
        S: RunSink + ?Sized,
    {
        if is_cancelled(cancellation) {
            return Err(RunApiError::Cancelled);
        }

        let response = self.build_request(request)?.send();
        let response = await_or_cancel(response, cancellation, &mut *sink).await??;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = await_or_cancel(response.text(), cancellation, &mut *sink)
            .await?
            .unwrap_or_default();
        let (message, code) = parse_error_body(status, &body);
        Err(RunApiError::Status {
            status,
            message,
            code,
        })
    }

    /// Streams one run, delivering events to `sink` in frame order.
    ///
    /// Returns the terminal outcome carried by the `run_outcome` frame. Frames
    /// after the outcome are not read. `sink` is ticked idle every
    /// [`IDLE_TICK`] while the connection is quiet.
    pub async fn stream_with_handler<S>(
        &self,
        request: &RunRequest,
        cancellation: Option<&CancellationSignal>,
        sink: &mut S,
    ) -> Result<RunOutcome, RunApiError>
    where
        S: RunSink + ?Sized,
    {
        let response = self.send_ticking(request, cancellation, &mut *sink).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation, &mut *sink).await? else {
                break;
            };
            if is_cancelled(cancellation) {
                return Err(RunApiError::Cancelled);
            }
            let chunk = chunk.map_err(RunApiError::from)?;
            for frame in parser.feed(&chunk) {
                if let Some(outcome) = process_frame(frame, &mut *sink) {
                    return Ok(outcome);
                }
                if is_cancelled(cancellation) {
                    return Err(RunApiError::Cancelled);
                }
            }
        }

        if is_cancelled(cancellation) {
            return Err(RunApiError::Cancelled);
        }

        Err(RunApiError::MissingOutcome)
    }

    /// Collects every event of one run alongside its outcome.
    pub async fn stream(
        &self,
        request: &RunRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<(Vec<StreamEvent>, RunOutcome), RunApiError> {
        let mut events = Vec::new();
        let mut collect = |event: StreamEvent| events.push(event);
        let outcome = self
            .stream_with_handler(request, cancellation, &mut collect)
            .await?;
        Ok((events, outcome))
    }
}

fn process_frame<S>(frame: SseFrame, sink: &mut S) -> Option<RunOutcome>
where
    S: RunSink + ?Sized,
{
    match frame {
        SseFrame::Event(event) => {
            sink.event(event);
            None
        }
        SseFrame::Outcome(outcome) => Some(outcome),
    }
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F, S>(
    future: F,
    cancellation: Option<&CancellationSignal>,
    sink: &mut S,
) -> Result<F::Output, RunApiError>
where
    F: Future,
    S: RunSink + ?Sized,
{
    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(RunApiError::Cancelled);
        }

        match tokio::time::timeout(IDLE_TICK, &mut future).await {
            Ok(output) => {
                if is_cancelled(cancellation) {
                    return Err(RunApiError::Cancelled);
                }
                return Ok(output);
            }
            Err(_) => sink.idle(),
        }
    }
}
