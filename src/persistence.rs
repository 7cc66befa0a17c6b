//! Persistence seam for conversation resumption.

use session_store::{SessionStore, SessionStoreError};
use thiserror::Error;

use crate::block::BlockTree;

/// State needed to continue a conversation: the token and the last tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub conversation_id: String,
    pub run_id: String,
    pub continuation_token: Option<String>,
    pub tree: BlockTree,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Store(#[from] SessionStoreError),

    #[error("failed to encode or decode block tree: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("state for conversation {found} cannot be stored in conversation {expected}")]
    ConversationMismatch { expected: String, found: String },
}

pub trait StatePersistence {
    /// Records the prompt that opened `run_id`.
    fn record_prompt(&mut self, _run_id: &str, _prompt: &str) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn save(&mut self, state: &ConversationState) -> Result<(), PersistenceError>;

    fn load_latest(&self) -> Result<Option<ConversationState>, PersistenceError>;
}

impl StatePersistence for SessionStore {
    fn record_prompt(&mut self, run_id: &str, prompt: &str) -> Result<(), PersistenceError> {
        self.append_prompt(run_id, prompt)?;
        Ok(())
    }

    fn save(&mut self, state: &ConversationState) -> Result<(), PersistenceError> {
        if state.conversation_id != self.conversation_id() {
            return Err(PersistenceError::ConversationMismatch {
                expected: self.conversation_id().to_string(),
                found: state.conversation_id.clone(),
            });
        }
        let tree = serde_json::to_value(&state.tree)?;
        self.append_checkpoint(state.run_id.clone(), state.continuation_token.clone(), tree)?;
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<ConversationState>, PersistenceError> {
        let Some(checkpoint) = self.latest_checkpoint() else {
            return Ok(None);
        };
        Ok(Some(ConversationState {
            conversation_id: self.conversation_id().to_string(),
            run_id: checkpoint.run_id,
            continuation_token: checkpoint.continuation_token,
            tree: serde_json::from_value(checkpoint.tree)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::block::{AgentBlock, Block, TextKind};

    #[test]
    fn checkpoint_round_trips_through_the_session_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = SessionStore::create_new(dir.path(), "conv-1").expect("create store");

        let mut agent = AgentBlock::running("a-1", "file-picker");
        agent.children.push(std::sync::Arc::new(Block::text(TextKind::Reasoning, "looking")));
        let state = ConversationState {
            conversation_id: "conv-1".to_string(),
            run_id: "run-1".to_string(),
            continuation_token: Some("tok-1".to_string()),
            tree: BlockTree::new(vec![Block::text(TextKind::Normal, "hi"), Block::Agent(agent)]),
        };
        store.record_prompt("run-1", "hello").expect("prompt");
        store.save(&state).expect("save");

        let reopened = SessionStore::open_latest(dir.path(), "conv-1").expect("reopen");
        assert_eq!(reopened.load_latest().expect("load"), Some(state));
    }

    #[test]
    fn state_for_another_conversation_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = SessionStore::create_new(dir.path(), "conv-1").expect("create store");
        let state = ConversationState {
            conversation_id: "conv-2".to_string(),
            run_id: "run-1".to_string(),
            continuation_token: None,
            tree: BlockTree::default(),
        };

        assert!(matches!(
            store.save(&state),
            Err(PersistenceError::ConversationMismatch { .. })
        ));
        assert_eq!(store.load_latest().expect("load"), None);
    }
}
