use std::time::Duration;

use crate::block::TreeSnapshot;
use crate::run::{Run, RunStatus};

/// Retry about to happen after a transient failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    /// Attempt that just failed, starting at 1.
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub message: String,
}

/// Receives what the rendering layer needs while a run streams.
///
/// Every method defaults to a no-op.
pub trait RunObserver {
    /// Called after each flush that published a new snapshot.
    fn on_snapshot(&mut self, _snapshot: &TreeSnapshot) {}

    fn on_status(&mut self, _status: RunStatus) {}

    fn on_retry(&mut self, _notice: &RetryNotice) {}

    /// Called once when the run reaches a terminal outcome.
    fn on_terminal(&mut self, _run: &Run) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
