//! Run lifecycle types.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Controller state for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Starting,
    Streaming,
    Success,
    Error,
    Aborted,
}

impl RunPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Aborted)
    }

    /// Coarse status shown next to the tree.
    #[must_use]
    pub fn status(self) -> RunStatus {
        match self {
            Self::Starting => RunStatus::Waiting,
            Self::Streaming => RunStatus::Streaming,
            Self::Idle | Self::Success | Self::Error | Self::Aborted => RunStatus::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Waiting,
    Streaming,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcomeKind {
    Success,
    Error,
    Aborted,
}

/// One user-initiated exchange with the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub id: String,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    pub elapsed: Option<Duration>,
    pub outcome: Option<RunOutcomeKind>,
    pub cost: Option<f64>,
    pub continuation_token: Option<String>,
    started: Instant,
}

impl Run {
    #[must_use]
    pub fn start(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
            elapsed: None,
            outcome: None,
            cost: None,
            continuation_token: None,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Records the terminal outcome once; later calls are ignored.
    pub fn finish(&mut self, outcome: RunOutcomeKind) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        self.ended_at = Some(OffsetDateTime::now_utc());
        self.elapsed = Some(self.started.elapsed());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_is_recorded_once() {
        let mut run = Run::start("run-1");
        assert!(!run.is_finished());
        assert!(run.finish(RunOutcomeKind::Aborted));
        assert!(!run.finish(RunOutcomeKind::Success));
        assert_eq!(run.outcome, Some(RunOutcomeKind::Aborted));
        assert!(run.elapsed.is_some());
        assert!(run.ended_at >= Some(run.started_at));
    }

    #[test]
    fn phases_map_to_status() {
        assert_eq!(RunPhase::Starting.status(), RunStatus::Waiting);
        assert_eq!(RunPhase::Streaming.status(), RunStatus::Streaming);
        assert_eq!(RunPhase::Aborted.status(), RunStatus::Idle);
        assert!(RunPhase::Error.is_terminal());
        assert!(!RunPhase::Streaming.is_terminal());
    }
}
