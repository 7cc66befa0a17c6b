//! Deterministic scripted implementation of the `agent_stream` contract.
//!
//! Each call to [`RunTransport::run`] consumes the next [`ScriptedAttempt`], so
//! retry behaviour can be exercised attempt by attempt. This crate contains no
//! transport or wire logic and is intended for local runs and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use agent_stream::{
    is_cancelled, CancelSignal, RunOutcome, RunRequest, RunSink, RunTransport, StreamEvent,
    TransportError, IDLE_TICK,
};
use serde_json::json;

/// One step of a scripted attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Emits the event unless the run was cancelled.
    Emit(StreamEvent),
    /// Emits the event even after cancellation, modelling trailing deliveries
    /// that race the transport shutting down.
    EmitTrailing(StreamEvent),
    /// Signals the shared cancellation flag, as a user pressing cancel would.
    Cancel,
    /// Waits for the given duration, ticking the sink's idle hook.
    Pause(Duration),
}

/// Script for one network attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedAttempt {
    pub steps: Vec<ScriptStep>,
    pub result: Result<RunOutcome, TransportError>,
}

impl ScriptedAttempt {
    /// Attempt that emits `events` and succeeds with `continuation_token`.
    #[must_use]
    pub fn success(events: Vec<StreamEvent>, continuation_token: Option<&str>) -> Self {
        Self {
            steps: events.into_iter().map(ScriptStep::Emit).collect(),
            result: Ok(RunOutcome::Success {
                continuation_token: continuation_token.map(ToString::to_string),
            }),
        }
    }

    /// Attempt that fails before emitting anything.
    #[must_use]
    pub fn failure(error: TransportError) -> Self {
        Self {
            steps: Vec::new(),
            result: Err(error),
        }
    }

    /// Attempt that emits `events` and then reports an error outcome.
    #[must_use]
    pub fn error_outcome(
        events: Vec<StreamEvent>,
        message: &str,
        error_code: Option<&str>,
    ) -> Self {
        Self {
            steps: events.into_iter().map(ScriptStep::Emit).collect(),
            result: Ok(RunOutcome::Error {
                message: message.to_string(),
                error_code: error_code.map(ToString::to_string),
            }),
        }
    }

    #[must_use]
    pub fn with_steps(steps: Vec<ScriptStep>, result: Result<RunOutcome, TransportError>) -> Self {
        Self { steps, result }
    }
}

/// Transport that replays scripted attempts in order.
#[derive(Debug)]
pub struct ScriptedTransport {
    attempts: Mutex<VecDeque<ScriptedAttempt>>,
    requests: Mutex<Vec<RunRequest>>,
    attempt_count: AtomicUsize,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new(attempts: Vec<ScriptedAttempt>) -> Self {
        Self {
            attempts: Mutex::new(attempts.into()),
            requests: Mutex::new(Vec::new()),
            attempt_count: AtomicUsize::new(0),
        }
    }

    /// Number of `run` calls observed so far.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempt_count.load(Ordering::SeqCst)
    }

    /// Requests passed to `run`, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<RunRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    /// Queues another attempt after the ones already scripted.
    pub fn push_attempt(&self, attempt: ScriptedAttempt) {
        lock_unpoisoned(&self.attempts).push_back(attempt);
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new(vec![ScriptedAttempt::success(
            vec![
                StreamEvent::Reasoning {
                    text: "Looking for the relevant files.".to_string(),
                },
                StreamEvent::ToolCall {
                    tool_call_id: "call-spawn".to_string(),
                    tool_name: "spawn_agents".to_string(),
                    input: json!({
                        "agents": [
                            { "agent_type": "file-picker", "prompt": "Find the config loader" }
                        ]
                    }),
                    agent_id: None,
                    include_tool_call: None,
                },
                StreamEvent::SubagentStart {
                    agent_id: "mock-agent-1".to_string(),
                    agent_type: "mock/file-picker@0.1.0".to_string(),
                    parent_agent_id: None,
                    prompt: None,
                    params: None,
                },
                StreamEvent::SubagentChunk {
                    agent_id: "mock-agent-1".to_string(),
                    chunk: "Found src/config.rs".to_string(),
                },
                StreamEvent::SubagentFinish {
                    agent_id: "mock-agent-1".to_string(),
                    agent_type: "mock/file-picker@0.1.0".to_string(),
                },
                StreamEvent::Text {
                    text: "<PLAN>Update the loader".to_string(),
                },
                StreamEvent::Text {
                    text: " defaults</PLAN>Done.".to_string(),
                },
                StreamEvent::Finish {
                    total_cost: Some(0.01),
                },
            ],
            Some("mock-continuation"),
        )])
    }
}

impl RunTransport for ScriptedTransport {
    fn run(
        &self,
        req: &RunRequest,
        cancel: CancelSignal,
        sink: &mut dyn RunSink,
    ) -> Result<RunOutcome, TransportError> {
        self.attempt_count.fetch_add(1, Ordering::SeqCst);
        lock_unpoisoned(&self.requests).push(req.clone());

        let Some(attempt) = lock_unpoisoned(&self.attempts).pop_front() else {
            return Err(TransportError::failed("no scripted attempt remaining"));
        };

        let mut cancelled = false;
        for step in attempt.steps {
            match step {
                ScriptStep::Emit(event) => {
                    if is_cancelled(&cancel) {
                        cancelled = true;
                        continue;
                    }
                    sink.event(event);
                }
                ScriptStep::EmitTrailing(event) => sink.event(event),
                ScriptStep::Cancel => cancel.store(true, Ordering::Release),
                ScriptStep::Pause(duration) => pause(duration, sink),
            }
        }

        if cancelled || is_cancelled(&cancel) {
            return Err(TransportError::Cancelled);
        }

        attempt.result
    }
}

fn pause(duration: Duration, sink: &mut dyn RunSink) {
    let until = Instant::now() + duration;
    loop {
        let remaining = until.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        thread::sleep(remaining.min(IDLE_TICK));
        sink.idle();
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
