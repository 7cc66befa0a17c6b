use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordType {
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRecordType {
    Entry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionHeader {
    #[serde(rename = "type")]
    pub record_type: SessionRecordType,
    pub version: u32,
    pub conversation_id: String,
    pub created_at: String,
    pub cwd: String,
}

impl SessionHeader {
    #[must_use]
    pub fn v1(
        conversation_id: impl Into<String>,
        created_at: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            record_type: SessionRecordType::Session,
            version: 1,
            conversation_id: conversation_id.into(),
            created_at: created_at.into(),
            cwd: cwd.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    #[serde(rename = "type")]
    pub record_type: EntryRecordType,
    pub id: String,
    pub parent_id: Option<String>,
    pub ts: String,
    #[serde(flatten)]
    pub kind: SessionEntryKind,
}

impl SessionEntry {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<impl Into<String>>,
        ts: impl Into<String>,
        kind: SessionEntryKind,
    ) -> Self {
        Self {
            record_type: EntryRecordType::Entry,
            id: id.into(),
            parent_id: parent_id.map(Into::into),
            ts: ts.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEntryKind {
    /// Prompt submitted to open a run.
    Prompt { run_id: String, text: String },
    /// Final tree and continuation token of a terminal run.
    Checkpoint {
        run_id: String,
        #[serde(default)]
        continuation_token: Option<String>,
        tree: Value,
    },
}

/// Owned view of the most recent checkpoint entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub entry_id: String,
    pub run_id: String,
    pub continuation_token: Option<String>,
    pub tree: Value,
}

impl Checkpoint {
    pub(crate) fn from_entry(entry: &SessionEntry) -> Option<Self> {
        match &entry.kind {
            SessionEntryKind::Checkpoint {
                run_id,
                continuation_token,
                tree,
            } => Some(Self {
                entry_id: entry.id.clone(),
                run_id: run_id.clone(),
                continuation_token: continuation_token.clone(),
                tree: tree.clone(),
            }),
            SessionEntryKind::Prompt { .. } => None,
        }
    }
}

/// One decoded line, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JsonLine {
    Session(SessionHeader),
    Entry(SessionEntry),
}
