//! Client-side reconciliation of a remote agent run into a live Block Tree.
//!
//! Readers only ever see a whole flushed snapshot; mutations reach
//! the tree solely through `scheduler::UpdateScheduler`.
//!
//! # Public API Overview
//! - Drive a run with [`RunController::submit`] over any [`RunTransport`].
//! - Read the tree through [`TreeSnapshot`] and the [`RunObserver`] callbacks.
//! - Feed events by hand with [`EventReconciler`] when no controller is needed.
//! - Persist and resume conversations through [`StatePersistence`].

pub mod block;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod observer;
pub mod persistence;
pub mod plan;
pub mod reconciler;
pub mod retry;
pub mod run;
pub mod scheduler;
pub mod spawn_matcher;
pub mod text;
pub mod transform;

/// Block Tree data model.
pub use crate::block::{
    AgentBlock, AgentListBlock, AgentListEntry, AgentStatus, Block, BlockTree, DisplayHints,
    PlanBlock, TextBlock, TextKind, Tone, ToolBlock, ToolOutput, TreeSnapshot,
};
/// Run lifecycle and its collaborators.
pub use crate::config::EngineConfig;
pub use crate::controller::RunController;
pub use crate::error::RunError;
pub use crate::observer::{NoopObserver, RetryNotice, RunObserver};
pub use crate::persistence::{ConversationState, PersistenceError, StatePersistence};
pub use crate::retry::RetryPolicy;
pub use crate::run::{Run, RunOutcomeKind, RunPhase, RunStatus};
/// Event reconciliation.
pub use crate::plan::{extract_plan, PLAN_CLOSE, PLAN_OPEN};
pub use crate::reconciler::{Diagnostic, EventReconciler, TextTarget, INTERRUPTED_MARKER};
pub use crate::scheduler::{Mutation, UpdateScheduler};
pub use crate::spawn_matcher::{normalize_agent_type, placeholder_id, SpawnMatcher, SpawnRequest};
pub use crate::transform::{rewrite_blocks, Rewrite};

/// Transport contract re-exported for hosts.
pub use agent_stream::{CancelSignal, RunOutcome, RunRequest, RunTransport, StreamEvent, TransportError};
