//! Block Tree data model.
//!
//! The tree is persistent: children are shared through [`Arc`] so a rewrite
//! only reallocates the path from the root to the changed block.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable view of the tree published after each flush.
pub type TreeSnapshot = Arc<BlockTree>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockTree {
    pub blocks: Vec<Arc<Block>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text(TextBlock),
    Tool(ToolBlock),
    Agent(AgentBlock),
    AgentList(AgentListBlock),
    Plan(PlanBlock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    Normal,
    Reasoning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Notice,
    Error,
}

/// Presentation hints; the renderer decides what they look like.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayHints {
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub kind: TextKind,
    pub content: String,
    #[serde(default)]
    pub hints: DisplayHints,
}

impl TextBlock {
    #[must_use]
    pub fn new(kind: TextKind, content: impl Into<String>) -> Self {
        let hints = DisplayHints {
            collapsed: kind == TextKind::Reasoning,
            tone: None,
        };
        Self {
            kind,
            content: content.into(),
            hints,
        }
    }

    #[must_use]
    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.hints.tone = Some(tone);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutput {
    Raw {
        value: Value,
    },
    /// Answer to an interactive question tool, kept next to its questions.
    UserAnswer {
        questions: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answers: Option<Value>,
        #[serde(default)]
        skipped: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBlock {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ToolOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Complete,
    Failed,
}

impl AgentStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Status transitions only leave `running`; terminal states are final.
    #[must_use]
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() {
            self
        } else {
            next
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBlock {
    pub id: String,
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub status: AgentStatus,
    #[serde(default)]
    pub children: Vec<Arc<Block>>,
}

impl AgentBlock {
    #[must_use]
    pub fn running(id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            prompt: None,
            params: Map::new(),
            status: AgentStatus::Running,
            children: Vec::new(),
        }
    }

    /// Copy of this agent with `children` replacing its child list.
    #[must_use]
    pub fn with_children(&self, children: Vec<Arc<Block>>) -> Self {
        Self {
            id: self.id.clone(),
            agent_type: self.agent_type.clone(),
            prompt: self.prompt.clone(),
            params: self.params.clone(),
            status: self.status,
            children,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentListEntry {
    pub id: String,
    pub agent_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentListBlock {
    pub call_id: String,
    pub agents: Vec<AgentListEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanBlock {
    pub content: String,
}

impl Block {
    #[must_use]
    pub fn text(kind: TextKind, content: impl Into<String>) -> Self {
        Self::Text(TextBlock::new(kind, content))
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&TextBlock> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_agent(&self) -> Option<&AgentBlock> {
        match self {
            Self::Agent(agent) => Some(agent),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tool(&self) -> Option<&ToolBlock> {
        match self {
            Self::Tool(tool) => Some(tool),
            _ => None,
        }
    }
}

impl BlockTree {
    #[must_use]
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            blocks: blocks.into_iter().map(Arc::new).collect(),
        }
    }

    /// Terminal tree shown when a run fails.
    #[must_use]
    pub fn error_notice(message: impl Into<String>) -> Self {
        Self::new(vec![Block::Text(
            TextBlock::new(TextKind::Normal, message).with_tone(Tone::Error),
        )])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn find_agent(&self, id: &str) -> Option<&AgentBlock> {
        find_agent_in(&self.blocks, id)
    }

    #[must_use]
    pub fn find_tool(&self, call_id: &str) -> Option<&ToolBlock> {
        find_tool_in(&self.blocks, call_id)
    }

    /// The root plan block, present once a plan has been extracted.
    #[must_use]
    pub fn root_plan(&self) -> Option<&PlanBlock> {
        self.blocks.iter().find_map(|block| match block.as_ref() {
            Block::Plan(plan) => Some(plan),
            _ => None,
        })
    }

    /// Every agent and tool id in depth-first order, duplicates included.
    #[must_use]
    pub fn visible_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        collect_ids(&self.blocks, &mut ids);
        ids
    }
}

pub(crate) fn find_agent_in<'a>(blocks: &'a [Arc<Block>], id: &str) -> Option<&'a AgentBlock> {
    blocks.iter().find_map(|block| {
        let agent = block.as_agent()?;
        if agent.id == id {
            Some(agent)
        } else {
            find_agent_in(&agent.children, id)
        }
    })
}

fn find_tool_in<'a>(blocks: &'a [Arc<Block>], call_id: &str) -> Option<&'a ToolBlock> {
    blocks.iter().find_map(|block| match block.as_ref() {
        Block::Tool(tool) if tool.call_id == call_id => Some(tool),
        Block::Agent(agent) => find_tool_in(&agent.children, call_id),
        _ => None,
    })
}

fn collect_ids<'a>(blocks: &'a [Arc<Block>], ids: &mut Vec<&'a str>) {
    for block in blocks {
        match block.as_ref() {
            Block::Tool(tool) => ids.push(&tool.call_id),
            Block::Agent(agent) => {
                ids.push(&agent.id);
                collect_ids(&agent.children, ids);
            }
            Block::Text(_) | Block::AgentList(_) | Block::Plan(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn status_never_leaves_a_terminal_state() {
        assert_eq!(
            AgentStatus::Running.advance(AgentStatus::Complete),
            AgentStatus::Complete
        );
        assert_eq!(
            AgentStatus::Failed.advance(AgentStatus::Complete),
            AgentStatus::Failed
        );
        assert_eq!(
            AgentStatus::Complete.advance(AgentStatus::Failed),
            AgentStatus::Complete
        );
    }

    #[test]
    fn reasoning_text_defaults_to_collapsed() {
        assert!(TextBlock::new(TextKind::Reasoning, "hmm").hints.collapsed);
        assert!(!TextBlock::new(TextKind::Normal, "hi").hints.collapsed);
    }

    #[test]
    fn tree_serializes_with_type_tags() {
        let mut agent = AgentBlock::running("a-1", "file-picker");
        agent.children.push(Arc::new(Block::text(TextKind::Normal, "found")));
        let tree = BlockTree::new(vec![
            Block::Agent(agent),
            Block::Plan(PlanBlock {
                content: "ship".to_string(),
            }),
        ]);

        let value = serde_json::to_value(&tree).expect("serialize");
        assert_eq!(
            value,
            json!({
                "blocks": [
                    {
                        "type": "agent",
                        "id": "a-1",
                        "agent_type": "file-picker",
                        "params": {},
                        "status": "running",
                        "children": [
                            {
                                "type": "text",
                                "kind": "normal",
                                "content": "found",
                                "hints": { "collapsed": false }
                            }
                        ]
                    },
                    { "type": "plan", "content": "ship" }
                ]
            })
        );

        let decoded: BlockTree = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, tree);
    }

    #[test]
    fn lookups_search_nested_agents() {
        let mut inner = AgentBlock::running("inner", "reviewer");
        inner.children.push(Arc::new(Block::Tool(ToolBlock {
            call_id: "call-1".to_string(),
            tool_name: "read_files".to_string(),
            input: json!({}),
            output: None,
            agent_id: Some("inner".to_string()),
        })));
        let mut outer = AgentBlock::running("outer", "planner");
        outer.children.push(Arc::new(Block::Agent(inner)));
        let tree = BlockTree::new(vec![Block::Agent(outer)]);

        assert_eq!(tree.find_agent("inner").map(|a| a.agent_type.as_str()), Some("reviewer"));
        assert_eq!(tree.find_tool("call-1").map(|t| t.tool_name.as_str()), Some("read_files"));
        assert_eq!(tree.visible_ids(), vec!["outer", "inner", "call-1"]);
        assert!(tree.find_agent("missing").is_none());
    }
}
