//! Event-to-mutation state machine.
//!
//! [`EventReconciler`] turns each [`StreamEvent`] into a pure [`Mutation`] of
//! the Block Tree. Decisions that depend on earlier events (which agents
//! exist, which tool calls are hidden, where text was last streaming) are made
//! against the reconciler's own keyed state at event time, so the mutations
//! stay valid when the scheduler applies them later in a batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use agent_stream::StreamEvent;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::block::{
    AgentBlock, AgentListBlock, AgentListEntry, AgentStatus, Block, BlockTree, TextKind,
    ToolBlock, ToolOutput,
};
use crate::plan::{extract_plan, may_complete_delimiter};
use crate::scheduler::Mutation;
use crate::spawn_matcher::{
    normalize_agent_type, placeholder_id, SpawnMatcher, SpawnRequest, SPAWN_AGENTS,
    SPAWN_AGENT_INLINE,
};
use crate::text::{append_delta, append_notice};
use crate::transform::{settle_running_agents, update_agent, update_agent_children, update_tool};

pub const SPAWN_AGENTS_ASYNC: &str = "spawn_agents_async";
pub const ASK_USER: &str = "ask_user";

/// Tools that only drive orchestration and never render.
pub const ORCHESTRATION_TOOLS: &[&str] = &[
    SPAWN_AGENTS,
    SPAWN_AGENT_INLINE,
    "end_turn",
    "set_output",
    "set_messages",
    "add_message",
];

/// Agent types hidden from the tree unless configured otherwise.
pub const DEFAULT_HIDDEN_AGENT_TYPES: &[&str] = &["context-pruner"];

/// Marker appended to the last open text when a run is cancelled.
pub const INTERRUPTED_MARKER: &str = "[Interrupted]";

/// Stream anomaly recorded instead of failing the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A child named a parent that was not in the tree; it was placed at root.
    OrphanedAgent {
        agent_id: String,
        parent_agent_id: String,
    },
    /// An event was missing an id its kind requires.
    MalformedEvent { kind: &'static str, field: &'static str },
    /// An event referenced an agent that was never started.
    UnknownAgent { agent_id: String, kind: &'static str },
    /// A tool result arrived for a call that was never seen.
    UnknownToolCall { tool_call_id: String },
    /// A second start or call reused an id already in the tree.
    DuplicateId { id: String, kind: &'static str },
}

/// Where streamed text was last appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextTarget {
    Root,
    Agent(String),
}

#[derive(Debug)]
pub struct EventReconciler {
    hidden_types: HashSet<String>,
    hidden_agents: HashSet<String>,
    known_agents: HashSet<String>,
    known_tools: HashMap<String, String>,
    suppressed_calls: HashSet<String>,
    /// Spawn call id to `(request index, agent id)` of its visible members.
    spawn_batches: HashMap<String, Vec<(usize, String)>>,
    matcher: SpawnMatcher,
    last_text_target: Option<TextTarget>,
    diagnostics: Vec<Diagnostic>,
}

impl Default for EventReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_HIDDEN_AGENT_TYPES.iter().copied())
    }
}

impl EventReconciler {
    /// Creates a reconciler hiding agents whose normalized type is listed.
    pub fn new<I, S>(hidden_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hidden_types: hidden_types
                .into_iter()
                .map(|agent_type| normalize_agent_type(agent_type.as_ref()).to_string())
                .filter(|agent_type| !agent_type.is_empty())
                .collect(),
            hidden_agents: HashSet::new(),
            known_agents: HashSet::new(),
            known_tools: HashMap::new(),
            suppressed_calls: HashSet::new(),
            spawn_batches: HashMap::new(),
            matcher: SpawnMatcher::new(),
            last_text_target: None,
            diagnostics: Vec::new(),
        }
    }

    /// Applies `event` to `tree` immediately.
    pub fn apply(&mut self, tree: BlockTree, event: &StreamEvent) -> BlockTree {
        match self.mutation_for(event) {
            Some(mutation) => mutation(tree),
            None => tree,
        }
    }

    /// Records `event` and returns the tree mutation it implies, if any.
    pub fn mutation_for(&mut self, event: &StreamEvent) -> Option<Mutation> {
        match event {
            StreamEvent::Text { text } => self.root_text(TextKind::Normal, text),
            StreamEvent::Reasoning { text } => self.root_text(TextKind::Reasoning, text),
            StreamEvent::SubagentChunk { agent_id, chunk } => {
                self.agent_text(event.kind(), agent_id, TextKind::Normal, chunk)
            }
            StreamEvent::ReasoningChunk { agent_id, chunk } => {
                self.agent_text(event.kind(), agent_id, TextKind::Reasoning, chunk)
            }
            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
                agent_id,
                include_tool_call,
            } => self.tool_call(
                tool_call_id,
                tool_name,
                input,
                agent_id.as_deref(),
                include_tool_call.unwrap_or(true),
            ),
            StreamEvent::ToolResult {
                tool_call_id,
                output,
            } => self.tool_result(tool_call_id, output),
            StreamEvent::SubagentStart {
                agent_id,
                agent_type,
                parent_agent_id,
                prompt,
                params,
            } => self.subagent_start(
                agent_id,
                agent_type,
                parent_agent_id.as_deref(),
                prompt.as_deref(),
                params.as_ref(),
            ),
            StreamEvent::SubagentFinish { agent_id, .. } => self.subagent_finish(agent_id),
            StreamEvent::Finish { .. } => None,
        }
    }

    /// Mutation run on cancellation: appends the interruption marker to the
    /// last open text target and fails every agent still running.
    #[must_use]
    pub fn abort_mutation(&self) -> Mutation {
        let target = self.last_text_target.clone();
        Box::new(move |tree: BlockTree| {
            let tree = match target {
                Some(TextTarget::Agent(id)) => update_agent_children(&tree, &id, |children| {
                    Some(append_notice(children, INTERRUPTED_MARKER))
                })
                .unwrap_or_else(|| root_notice(&tree)),
                _ => root_notice(&tree),
            };
            settle_running_agents(&tree, AgentStatus::Failed).unwrap_or(tree)
        })
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    #[must_use]
    pub fn last_text_target(&self) -> Option<&TextTarget> {
        self.last_text_target.as_ref()
    }

    #[must_use]
    pub fn spawn_matcher(&self) -> &SpawnMatcher {
        &self.matcher
    }

    fn root_text(&mut self, kind: TextKind, delta: &str) -> Option<Mutation> {
        if delta.is_empty() {
            return None;
        }
        self.last_text_target = Some(TextTarget::Root);
        let delta = delta.to_string();
        Some(Box::new(move |tree: BlockTree| {
            let Some(blocks) = append_delta(&tree.blocks, kind, &delta) else {
                return tree;
            };
            let appended = BlockTree { blocks };
            if kind == TextKind::Normal && may_complete_delimiter(&delta) {
                extract_plan(&appended).unwrap_or(appended)
            } else {
                appended
            }
        }))
    }

    fn agent_text(
        &mut self,
        kind: &'static str,
        agent_id: &str,
        text_kind: TextKind,
        delta: &str,
    ) -> Option<Mutation> {
        if agent_id.is_empty() {
            self.record(Diagnostic::MalformedEvent {
                kind,
                field: "agentId",
            });
            return None;
        }
        if self.hidden_agents.contains(agent_id) {
            return None;
        }
        if !self.known_agents.contains(agent_id) {
            self.record(Diagnostic::UnknownAgent {
                agent_id: agent_id.to_string(),
                kind,
            });
            return None;
        }
        if delta.is_empty() {
            return None;
        }

        self.last_text_target = Some(TextTarget::Agent(agent_id.to_string()));
        let agent_id = agent_id.to_string();
        let delta = delta.to_string();
        Some(Box::new(move |tree: BlockTree| {
            update_agent_children(&tree, &agent_id, |children| {
                append_delta(children, text_kind, &delta)
            })
            .unwrap_or(tree)
        }))
    }

    fn tool_call(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        input: &Value,
        agent_id: Option<&str>,
        include_tool_call: bool,
    ) -> Option<Mutation> {
        if tool_call_id.is_empty() {
            self.record(Diagnostic::MalformedEvent {
                kind: "tool_call",
                field: "toolCallId",
            });
            return None;
        }
        if self.known_tools.contains_key(tool_call_id)
            || self.suppressed_calls.contains(tool_call_id)
            || self.spawn_batches.contains_key(tool_call_id)
        {
            self.record(Diagnostic::DuplicateId {
                id: tool_call_id.to_string(),
                kind: "tool_call",
            });
            return None;
        }

        let owner = agent_id.filter(|id| !id.is_empty());
        if owner.is_some_and(|id| self.hidden_agents.contains(id)) {
            self.suppressed_calls.insert(tool_call_id.to_string());
            return None;
        }
        let parent = self.resolve_owner(owner, "tool_call");

        if tool_name == SPAWN_AGENTS || tool_name == SPAWN_AGENT_INLINE {
            return self.spawn_placeholders(tool_call_id, tool_name, input, parent);
        }
        if ORCHESTRATION_TOOLS.contains(&tool_name) || !include_tool_call {
            self.suppressed_calls.insert(tool_call_id.to_string());
            return None;
        }
        if tool_name == SPAWN_AGENTS_ASYNC {
            self.suppressed_calls.insert(tool_call_id.to_string());
            let roster = Block::AgentList(agent_roster(tool_call_id, input));
            return Some(insert_block(parent, roster));
        }

        self.known_tools
            .insert(tool_call_id.to_string(), tool_name.to_string());
        let tool = Block::Tool(ToolBlock {
            call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            input: input.clone(),
            output: None,
            agent_id: owner.map(ToString::to_string),
        });
        Some(insert_block(parent, tool))
    }

    fn spawn_placeholders(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        input: &Value,
        parent: Option<String>,
    ) -> Option<Mutation> {
        let mut placeholders = Vec::new();
        let mut members = Vec::new();
        for request in SpawnRequest::parse_all(tool_name, input) {
            if self.is_hidden_type(&request.agent_type) {
                continue;
            }
            let id = placeholder_id(tool_call_id, request.index);
            if !self.known_agents.insert(id.clone()) {
                self.record(Diagnostic::DuplicateId {
                    id,
                    kind: "tool_call",
                });
                continue;
            }
            self.matcher.register(id.clone(), request.agent_type.clone());
            members.push((request.index, id.clone()));

            let mut agent = AgentBlock::running(id, request.agent_type);
            agent.prompt = request.prompt;
            agent.params = request.params;
            placeholders.push(Arc::new(Block::Agent(agent)));
        }
        debug!(
            tool_call_id,
            placeholders = placeholders.len(),
            "spawn intent recorded"
        );
        self.spawn_batches.insert(tool_call_id.to_string(), members);

        if placeholders.is_empty() {
            return None;
        }
        Some(Box::new(move |tree: BlockTree| {
            extend_blocks(tree, parent.as_deref(), placeholders)
        }))
    }

    fn tool_result(&mut self, tool_call_id: &str, output: &Value) -> Option<Mutation> {
        if tool_call_id.is_empty() {
            self.record(Diagnostic::MalformedEvent {
                kind: "tool_result",
                field: "toolCallId",
            });
            return None;
        }
        if let Some(members) = self.spawn_batches.remove(tool_call_id) {
            return self.settle_spawn_batch(members, output);
        }
        if self.suppressed_calls.remove(tool_call_id) {
            return None;
        }
        let Some(tool_name) = self.known_tools.get(tool_call_id).cloned() else {
            self.record(Diagnostic::UnknownToolCall {
                tool_call_id: tool_call_id.to_string(),
            });
            return None;
        };

        let call_id = tool_call_id.to_string();
        let output = output.clone();
        Some(Box::new(move |tree: BlockTree| {
            update_tool(&tree, &call_id, |tool| {
                if tool.output.is_some() {
                    return None;
                }
                let mut next = tool.clone();
                next.output = Some(if tool_name == ASK_USER {
                    user_answer(&tool.input, output)
                } else {
                    ToolOutput::Raw { value: output }
                });
                Some(next)
            })
            .unwrap_or(tree)
        }))
    }

    fn settle_spawn_batch(
        &mut self,
        members: Vec<(usize, String)>,
        output: &Value,
    ) -> Option<Mutation> {
        for (_, id) in &members {
            self.matcher.retire(id);
        }
        let statuses: Vec<(String, AgentStatus)> = match output.as_array() {
            Some(entries) => members
                .into_iter()
                .map(|(index, id)| {
                    let failed = entries.get(index).is_some_and(carries_error);
                    (id, if failed { AgentStatus::Failed } else { AgentStatus::Complete })
                })
                .collect(),
            None => {
                let status = if carries_error(output) {
                    AgentStatus::Failed
                } else {
                    AgentStatus::Complete
                };
                members.into_iter().map(|(_, id)| (id, status)).collect()
            }
        };
        if statuses.is_empty() {
            return None;
        }

        Some(Box::new(move |tree: BlockTree| {
            statuses.iter().fold(tree, |tree, (id, status)| {
                set_status(&tree, id, *status).unwrap_or(tree)
            })
        }))
    }

    fn subagent_start(
        &mut self,
        agent_id: &str,
        agent_type: &str,
        parent_agent_id: Option<&str>,
        prompt: Option<&str>,
        params: Option<&Value>,
    ) -> Option<Mutation> {
        if agent_id.is_empty() {
            self.record(Diagnostic::MalformedEvent {
                kind: "subagent_start",
                field: "agentId",
            });
            return None;
        }
        let parent_agent_id = parent_agent_id.filter(|id| !id.is_empty());
        if self.is_hidden_type(agent_type)
            || parent_agent_id.is_some_and(|id| self.hidden_agents.contains(id))
        {
            debug!(agent_id, agent_type, "hidden agent ignored");
            self.hidden_agents.insert(agent_id.to_string());
            return None;
        }
        if self.known_agents.contains(agent_id) {
            self.record(Diagnostic::DuplicateId {
                id: agent_id.to_string(),
                kind: "subagent_start",
            });
            return None;
        }

        let prompt = prompt
            .filter(|prompt| !prompt.trim().is_empty())
            .map(ToString::to_string);
        let params = params
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        self.known_agents.insert(agent_id.to_string());

        if let Some(placeholder) = self.matcher.reconcile(agent_type) {
            debug!(
                placeholder = %placeholder.id,
                agent_id,
                agent_type,
                "placeholder reconciled"
            );
            self.rename_agent(&placeholder.id, agent_id);
            let placeholder_id = placeholder.id;
            let agent_id = agent_id.to_string();
            let agent_type = agent_type.to_string();
            return Some(Box::new(move |tree: BlockTree| {
                update_agent(&tree, &placeholder_id, |agent| {
                    let mut next = agent.clone();
                    next.id = agent_id;
                    next.agent_type = agent_type;
                    if prompt.is_some() {
                        next.prompt = prompt;
                    }
                    next.params = merge_params(&agent.params, params);
                    Some(next)
                })
                .unwrap_or(tree)
            }));
        }

        let parent = match parent_agent_id {
            Some(parent) if self.known_agents.contains(parent) => Some(parent.to_string()),
            Some(parent) => {
                self.record(Diagnostic::OrphanedAgent {
                    agent_id: agent_id.to_string(),
                    parent_agent_id: parent.to_string(),
                });
                None
            }
            None => None,
        };
        let mut agent = AgentBlock::running(agent_id, agent_type);
        agent.prompt = prompt;
        agent.params = params;
        Some(insert_block(parent, Block::Agent(agent)))
    }

    fn subagent_finish(&mut self, agent_id: &str) -> Option<Mutation> {
        if agent_id.is_empty() {
            self.record(Diagnostic::MalformedEvent {
                kind: "subagent_finish",
                field: "agentId",
            });
            return None;
        }
        if self.hidden_agents.contains(agent_id) {
            return None;
        }
        if !self.known_agents.contains(agent_id) {
            self.record(Diagnostic::UnknownAgent {
                agent_id: agent_id.to_string(),
                kind: "subagent_finish",
            });
            return None;
        }

        let agent_id = agent_id.to_string();
        Some(Box::new(move |tree: BlockTree| {
            set_status(&tree, &agent_id, AgentStatus::Complete).unwrap_or(tree)
        }))
    }

    /// Known parent id for a block owned by `owner`, or `None` for root.
    fn resolve_owner(&mut self, owner: Option<&str>, kind: &'static str) -> Option<String> {
        let owner = owner?;
        if self.known_agents.contains(owner) {
            return Some(owner.to_string());
        }
        self.record(Diagnostic::UnknownAgent {
            agent_id: owner.to_string(),
            kind,
        });
        None
    }

    fn rename_agent(&mut self, from: &str, to: &str) {
        self.known_agents.remove(from);
        for members in self.spawn_batches.values_mut() {
            for (_, member) in members.iter_mut().filter(|(_, member)| member.as_str() == from) {
                *member = to.to_string();
            }
        }
        if self.last_text_target == Some(TextTarget::Agent(from.to_string())) {
            self.last_text_target = Some(TextTarget::Agent(to.to_string()));
        }
    }

    fn is_hidden_type(&self, agent_type: &str) -> bool {
        self.hidden_types.contains(normalize_agent_type(agent_type))
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        warn!(?diagnostic, "stream anomaly");
        self.diagnostics.push(diagnostic);
    }
}

fn root_notice(tree: &BlockTree) -> BlockTree {
    BlockTree {
        blocks: append_notice(&tree.blocks, INTERRUPTED_MARKER),
    }
}

fn insert_block(parent: Option<String>, block: Block) -> Mutation {
    let block = Arc::new(block);
    Box::new(move |tree: BlockTree| extend_blocks(tree, parent.as_deref(), vec![block]))
}

/// Appends `blocks` under `parent`, or at root when there is none.
fn extend_blocks(tree: BlockTree, parent: Option<&str>, blocks: Vec<Arc<Block>>) -> BlockTree {
    match parent {
        Some(parent) => update_agent_children(&tree, parent, |children| {
            let mut next = children.to_vec();
            next.extend(blocks);
            Some(next)
        })
        .unwrap_or(tree),
        None => {
            let mut tree = tree;
            tree.blocks.extend(blocks);
            tree
        }
    }
}

fn set_status(tree: &BlockTree, id: &str, status: AgentStatus) -> Option<BlockTree> {
    update_agent(tree, id, |agent| {
        if agent.status.is_terminal() {
            return None;
        }
        let mut next = agent.clone();
        next.status = agent.status.advance(status);
        Some(next)
    })
}

fn merge_params(existing: &Map<String, Value>, incoming: Map<String, Value>) -> Map<String, Value> {
    let mut merged = existing.clone();
    merged.extend(incoming);
    merged
}

fn carries_error(value: &Value) -> bool {
    let has_error = |value: &Value| {
        value
            .as_object()
            .is_some_and(|object| ["errorMessage", "error"].iter().any(|key| object.contains_key(*key)))
    };
    has_error(value) || value.get("value").is_some_and(has_error)
}

fn agent_roster(call_id: &str, input: &Value) -> AgentListBlock {
    let agents = input
        .get("agents")
        .and_then(Value::as_array)
        .map(|agents| {
            agents
                .iter()
                .enumerate()
                .map(|(index, agent)| AgentListEntry {
                    id: agent
                        .get("id")
                        .and_then(Value::as_str)
                        .map_or_else(|| placeholder_id(call_id, index), ToString::to_string),
                    agent_type: agent
                        .get("agent_type")
                        .or_else(|| agent.get("agentType"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    AgentListBlock {
        call_id: call_id.to_string(),
        agents,
    }
}

fn user_answer(input: &Value, output: Value) -> ToolOutput {
    let questions = input.get("questions").cloned().unwrap_or_else(|| input.clone());
    let skipped = output
        .get("skipped")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let answers = match output {
        _ if skipped => None,
        Value::Object(mut object) if object.contains_key("answers") => object.remove("answers"),
        Value::Null => None,
        other => Some(other),
    };
    ToolOutput::UserAnswer {
        questions,
        answers,
        skipped,
    }
}
