//! HTTP and Server-Sent-Events transport for remote agent runs.
//!
//! The client opens one run per call and relays decoded [`agent_stream::StreamEvent`]
//! frames in delivery order. It performs a single network attempt; retry policy
//! and reconciliation belong to the caller.
//!
//! [`RunApiTransport`] adapts the async client to the synchronous
//! [`agent_stream::RunTransport`] seam.

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod sse;
pub mod transport;
pub mod url;

pub use client::{CancellationSignal, RunApiClient};
pub use config::RunApiConfig;
pub use error::RunApiError;
pub use payload::RunPayload;
pub use sse::{SseFrame, SseStreamParser};
pub use transport::{RunApiTransport, RUN_API_TRANSPORT_ID};
pub use crate::url::normalize_runs_url;
