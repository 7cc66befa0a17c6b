//! Transport-neutral contract for consuming one remote agent run.
//!
//! This crate defines only the event shapes a run emits, the terminal outcome,
//! the failure taxonomy of the network call, and the [`RunTransport`] and
//! [`RunSink`] seams.
//! It excludes wire framing, reconciliation, and persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Longest interval a transport may wait on the network before calling
/// [`RunSink::idle`].
pub const IDLE_TICK: Duration = Duration::from_millis(25);

/// Shared cooperative cancellation flag for a run.
pub type CancelSignal = Arc<AtomicBool>;

/// Creates a fresh, unsignalled cancellation flag.
#[must_use]
pub fn new_cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

/// Returns true once `cancel` has been signalled.
#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

/// One low-level event emitted by a remote run, in delivery order.
///
/// Required ids default to empty strings when absent on the wire so that a
/// malformed event still decodes; consumers treat an empty id as malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    SubagentChunk {
        #[serde(default)]
        agent_id: String,
        chunk: String,
    },
    ReasoningChunk {
        #[serde(default)]
        agent_id: String,
        chunk: String,
    },
    ToolCall {
        #[serde(default)]
        tool_call_id: String,
        #[serde(default)]
        tool_name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        include_tool_call: Option<bool>,
    },
    ToolResult {
        #[serde(default)]
        tool_call_id: String,
        #[serde(default)]
        output: Value,
    },
    SubagentStart {
        #[serde(default)]
        agent_id: String,
        #[serde(default)]
        agent_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    SubagentFinish {
        #[serde(default)]
        agent_id: String,
        #[serde(default)]
        agent_type: String,
    },
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_cost: Option<f64>,
    },
}

impl StreamEvent {
    /// Stable wire name of the event kind, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Reasoning { .. } => "reasoning",
            Self::SubagentChunk { .. } => "subagent_chunk",
            Self::ReasoningChunk { .. } => "reasoning_chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::SubagentStart { .. } => "subagent_start",
            Self::SubagentFinish { .. } => "subagent_finish",
            Self::Finish { .. } => "finish",
        }
    }

    /// Returns true for events that carry run content (everything but `finish`).
    #[must_use]
    pub fn is_content(&self) -> bool {
        !matches!(self, Self::Finish { .. })
    }
}

/// Terminal outcome reported by the remote run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RunOutcome {
    Success {
        /// Opaque token used to continue the conversation on the next run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        continuation_token: Option<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
}

/// Input required to open one remote run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: String,
    pub conversation_id: String,
    pub prompt: String,
    pub continuation_token: Option<String>,
}

/// Failure of the network run call, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transient transport failure: {message}")]
    Transient { message: String },

    #[error("authorization failed: {message}")]
    Unauthorized { message: String },

    #[error("payment required: {message}")]
    PaymentRequired { message: String },

    #[error("{message}")]
    Failed { message: String },

    #[error("run was cancelled")]
    Cancelled,
}

impl TransportError {
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Only transient failures are eligible for automatic retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the remote-supplied message without the classification prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message }
            | Self::Unauthorized { message }
            | Self::PaymentRequired { message }
            | Self::Failed { message } => message,
            Self::Cancelled => "run was cancelled",
        }
    }
}

/// Receiver of one run's deliveries.
pub trait RunSink {
    /// Receives the next event in transport order.
    fn event(&mut self, event: StreamEvent);

    /// Called at least every [`IDLE_TICK`] while the transport waits for
    /// input, so timed work can progress while the stream is quiet.
    fn idle(&mut self) {}
}

impl<F> RunSink for F
where
    F: FnMut(StreamEvent),
{
    fn event(&mut self, event: StreamEvent) {
        self(event);
    }
}

/// Transport interface for executing one remote run.
pub trait RunTransport: Send + Sync + 'static {
    /// Opens the run and delivers events to `sink` in transport order.
    ///
    /// Implementations poll `cancel` and stop delivering events once it is
    /// signalled, returning [`TransportError::Cancelled`]. While waiting they
    /// call [`RunSink::idle`] at least every [`IDLE_TICK`]. A single call is a
    /// single network attempt; retry policy belongs to the caller.
    fn run(
        &self,
        req: &RunRequest,
        cancel: CancelSignal,
        sink: &mut dyn RunSink,
    ) -> Result<RunOutcome, TransportError>;
}
