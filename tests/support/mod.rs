use std::sync::atomic::Ordering;
use std::time::Duration;

use run_reconciler::{
    CancelSignal, EngineConfig, RetryNotice, RetryPolicy, Run, RunObserver, RunOutcomeKind,
    RunStatus, StreamEvent, TreeSnapshot,
};
use serde_json::{json, Value};

/// Observer that keeps everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    pub snapshots: Vec<TreeSnapshot>,
    pub statuses: Vec<RunStatus>,
    pub retries: Vec<RetryNotice>,
    pub terminals: Vec<Option<RunOutcomeKind>>,
    pub cancel_on_retry: Option<CancelSignal>,
}

impl RunObserver for RecordingObserver {
    fn on_snapshot(&mut self, snapshot: &TreeSnapshot) {
        self.snapshots.push(TreeSnapshot::clone(snapshot));
    }

    fn on_status(&mut self, status: RunStatus) {
        self.statuses.push(status);
    }

    fn on_retry(&mut self, notice: &RetryNotice) {
        self.retries.push(notice.clone());
        if let Some(cancel) = &self.cancel_on_retry {
            cancel.store(true, Ordering::Release);
        }
    }

    fn on_terminal(&mut self, run: &Run) {
        self.terminals.push(run.outcome);
    }
}

/// Config that flushes on every event and retries without real waiting.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_flush_delay(Duration::ZERO)
        .with_retry(RetryPolicy {
            max_attempts: 3,
            floor: Duration::from_millis(1),
            ceiling: Duration::from_millis(4),
        })
}

pub fn text(value: &str) -> StreamEvent {
    StreamEvent::Text {
        text: value.to_string(),
    }
}

pub fn reasoning(value: &str) -> StreamEvent {
    StreamEvent::Reasoning {
        text: value.to_string(),
    }
}

pub fn chunk(agent_id: &str, value: &str) -> StreamEvent {
    StreamEvent::SubagentChunk {
        agent_id: agent_id.to_string(),
        chunk: value.to_string(),
    }
}

pub fn spawn_agents(call_id: &str, types: &[&str]) -> StreamEvent {
    let agents: Vec<Value> = types
        .iter()
        .map(|agent_type| json!({ "agent_type": agent_type }))
        .collect();
    StreamEvent::ToolCall {
        tool_call_id: call_id.to_string(),
        tool_name: "spawn_agents".to_string(),
        input: json!({ "agents": agents }),
        agent_id: None,
        include_tool_call: None,
    }
}

pub fn start(agent_id: &str, agent_type: &str, parent: Option<&str>) -> StreamEvent {
    StreamEvent::SubagentStart {
        agent_id: agent_id.to_string(),
        agent_type: agent_type.to_string(),
        parent_agent_id: parent.map(ToString::to_string),
        prompt: None,
        params: None,
    }
}

pub fn finish_agent(agent_id: &str, agent_type: &str) -> StreamEvent {
    StreamEvent::SubagentFinish {
        agent_id: agent_id.to_string(),
        agent_type: agent_type.to_string(),
    }
}

pub fn finish(total_cost: f64) -> StreamEvent {
    StreamEvent::Finish {
        total_cost: Some(total_cost),
    }
}
