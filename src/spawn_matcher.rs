//! Placeholder bookkeeping for batch agent spawns.
//!
//! A spawn tool call materializes one running placeholder agent per request
//! before the service announces the real agents. The matcher remembers each
//! placeholder with its requested type until a `subagent_start` claims it.

use serde_json::{Map, Value};

pub const SPAWN_AGENTS: &str = "spawn_agents";
pub const SPAWN_AGENT_INLINE: &str = "spawn_agent_inline";

/// One agent requested by a spawn tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    /// Position in the tool input, counting entries that were skipped.
    pub index: usize,
    pub agent_type: String,
    pub prompt: Option<String>,
    pub params: Map<String, Value>,
}

impl SpawnRequest {
    /// Parses the requests carried by a spawn tool's `input`.
    ///
    /// `spawn_agents` carries an `agents` array; `spawn_agent_inline` carries a
    /// single request object. Entries without an agent type are skipped but
    /// still occupy their index.
    #[must_use]
    pub fn parse_all(tool_name: &str, input: &Value) -> Vec<Self> {
        match tool_name {
            SPAWN_AGENTS => input
                .get("agents")
                .and_then(Value::as_array)
                .map(|agents| {
                    agents
                        .iter()
                        .enumerate()
                        .filter_map(|(index, agent)| Self::parse(index, agent))
                        .collect()
                })
                .unwrap_or_default(),
            SPAWN_AGENT_INLINE => Self::parse(0, input).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn parse(index: usize, value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let agent_type = object
            .get("agent_type")
            .or_else(|| object.get("agentType"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|agent_type| !agent_type.is_empty())?
            .to_string();
        let prompt = object
            .get("prompt")
            .and_then(Value::as_str)
            .filter(|prompt| !prompt.trim().is_empty())
            .map(ToString::to_string);
        let params = object
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Some(Self {
            index,
            agent_type,
            prompt,
            params,
        })
    }
}

/// Deterministic placeholder id for request `index` of spawn call `call_id`.
#[must_use]
pub fn placeholder_id(call_id: &str, index: usize) -> String {
    format!("{call_id}-{index}")
}

/// Strips a `namespace/` prefix and an `@version` suffix.
///
/// `"pkg/file-picker@1.2.3"` and `"file-picker"` normalize to the same value.
#[must_use]
pub fn normalize_agent_type(agent_type: &str) -> &str {
    let trimmed = agent_type.trim();
    let without_namespace = trimmed.rsplit_once('/').map_or(trimmed, |(_, name)| name);
    without_namespace
        .split_once('@')
        .map_or(without_namespace, |(name, _)| name)
}

/// Outstanding placeholder waiting for its real agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub id: String,
    pub requested_type: String,
}

#[derive(Debug, Default)]
pub struct SpawnMatcher {
    outstanding: Vec<Placeholder>,
}

impl SpawnMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a placeholder in announcement order.
    pub fn register(&mut self, id: impl Into<String>, requested_type: impl Into<String>) {
        self.outstanding.push(Placeholder {
            id: id.into(),
            requested_type: requested_type.into(),
        });
    }

    /// Retires and returns the first placeholder whose normalized type equals
    /// the normalized `announced_type`.
    pub fn reconcile(&mut self, announced_type: &str) -> Option<Placeholder> {
        let announced = normalize_agent_type(announced_type);
        let index = self
            .outstanding
            .iter()
            .position(|placeholder| normalize_agent_type(&placeholder.requested_type) == announced)?;
        Some(self.outstanding.remove(index))
    }

    /// Drops a placeholder that will never be claimed. Returns whether it existed.
    pub fn retire(&mut self, id: &str) -> bool {
        let before = self.outstanding.len();
        self.outstanding.retain(|placeholder| placeholder.id != id);
        before != self.outstanding.len()
    }

    #[must_use]
    pub fn outstanding(&self) -> &[Placeholder] {
        &self.outstanding
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn namespace_and_version_are_ignored() {
        assert_eq!(normalize_agent_type("pkg/file-picker@1.2.3"), "file-picker");
        assert_eq!(normalize_agent_type("file-picker"), "file-picker");
        assert_eq!(normalize_agent_type("a/b/reviewer"), "reviewer");
        assert_eq!(normalize_agent_type(" thinker@0.0.1 "), "thinker");
    }

    #[test]
    fn batch_input_parses_both_field_spellings() {
        let input = json!({
            "agents": [
                { "agent_type": "file-picker", "prompt": "find it" },
                { "agentType": "pkg/reviewer@2", "params": { "depth": 2 } },
                { "prompt": "no type" }
            ]
        });

        let requests = SpawnRequest::parse_all(SPAWN_AGENTS, &input);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].agent_type, "file-picker");
        assert_eq!(requests[0].prompt.as_deref(), Some("find it"));
        assert_eq!(requests[1].agent_type, "pkg/reviewer@2");
        assert_eq!(requests[1].params.get("depth"), Some(&json!(2)));
        let indices: Vec<usize> = requests.iter().map(|request| request.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn skipped_entries_keep_their_slot() {
        let input = json!({
            "agents": [
                { "prompt": "no type" },
                { "agent_type": "  " },
                { "agent_type": "reviewer" }
            ]
        });

        let requests = SpawnRequest::parse_all(SPAWN_AGENTS, &input);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].index, 2);
        assert_eq!(requests[0].agent_type, "reviewer");
    }

    #[test]
    fn inline_spawn_is_a_single_request() {
        let input = json!({ "agent_type": "thinker", "prompt": "consider" });
        let requests = SpawnRequest::parse_all(SPAWN_AGENT_INLINE, &input);
        assert_eq!(requests.len(), 1);
        assert!(SpawnRequest::parse_all("read_files", &input).is_empty());
    }

    #[test]
    fn first_matching_placeholder_is_retired() {
        let mut matcher = SpawnMatcher::new();
        matcher.register(placeholder_id("call", 0), "file-picker");
        matcher.register(placeholder_id("call", 1), "reviewer");
        matcher.register(placeholder_id("call", 2), "file-picker");

        let claimed = matcher.reconcile("codebuff/file-picker@0.0.3");
        assert_eq!(claimed.map(|p| p.id), Some("call-0".to_string()));
        assert!(matcher.reconcile("planner").is_none());

        let ids: Vec<&str> = matcher.outstanding().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["call-1", "call-2"]);
        assert!(matcher.retire("call-2"));
        assert!(!matcher.retire("call-2"));
    }
}
