//! Run lifecycle: retry, cancellation, terminal classification, persistence.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use agent_stream::{
    is_cancelled, new_cancel_signal, CancelSignal, RunOutcome, RunRequest, RunSink,
    RunTransport, StreamEvent, TransportError,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::block::{BlockTree, TreeSnapshot};
use crate::config::EngineConfig;
use crate::error::RunError;
use crate::observer::{RetryNotice, RunObserver};
use crate::persistence::{ConversationState, PersistenceError, StatePersistence};
use crate::reconciler::{Diagnostic, EventReconciler};
use crate::retry::sleep_cancellable;
use crate::run::{Run, RunOutcomeKind, RunPhase, RunStatus};
use crate::scheduler::UpdateScheduler;

/// Drives one run at a time for a conversation.
///
/// `submit` blocks until the run is terminal; cancel it from another thread
/// through [`RunController::cancel_handle`].
pub struct RunController {
    transport: Arc<dyn RunTransport>,
    config: EngineConfig,
    conversation_id: String,
    persistence: Option<Box<dyn StatePersistence + Send>>,
    scheduler: UpdateScheduler,
    phase: RunPhase,
    retrying: bool,
    cancel: CancelSignal,
    continuation_token: Option<String>,
    last_run: Option<Run>,
    diagnostics: Vec<Diagnostic>,
}

/// Per-attempt state borrowed by the transport as its sink.
struct StreamSession<'a> {
    scheduler: &'a mut UpdateScheduler,
    reconciler: &'a mut EventReconciler,
    observer: &'a mut dyn RunObserver,
    phase: &'a mut RunPhase,
    retrying: &'a mut bool,
    cost: &'a mut Option<f64>,
    cancel: &'a CancelSignal,
    received_content: bool,
}

impl StreamSession<'_> {
    fn publish_due(&mut self) {
        if self.scheduler.flush_due(Instant::now()) {
            self.observer.on_snapshot(&self.scheduler.snapshot());
        }
    }
}

impl RunSink for StreamSession<'_> {
    fn event(&mut self, event: StreamEvent) {
        if is_cancelled(self.cancel) {
            return;
        }

        if let StreamEvent::Finish {
            total_cost: Some(total_cost),
        } = &event
        {
            *self.cost = Some(*total_cost);
        }
        if event.is_content() {
            self.received_content = true;
            *self.retrying = false;
            if *self.phase == RunPhase::Starting {
                debug!("first content received");
                *self.phase = RunPhase::Streaming;
                self.observer.on_status(RunStatus::Streaming);
            }
        }

        if let Some(mutation) = self.reconciler.mutation_for(&event) {
            self.scheduler.enqueue(mutation);
        }
        self.publish_due();
    }

    fn idle(&mut self) {
        if is_cancelled(self.cancel) {
            return;
        }
        self.publish_due();
    }
}

impl RunController {
    pub fn new(
        transport: Arc<dyn RunTransport>,
        config: EngineConfig,
        conversation_id: impl Into<String>,
    ) -> Self {
        let scheduler = UpdateScheduler::new(config.flush_delay);
        Self {
            transport,
            config,
            conversation_id: conversation_id.into(),
            persistence: None,
            scheduler,
            phase: RunPhase::Idle,
            retrying: false,
            cancel: new_cancel_signal(),
            continuation_token: None,
            last_run: None,
            diagnostics: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: impl StatePersistence + Send + 'static) -> Self {
        self.persistence = Some(Box::new(persistence));
        self
    }

    /// Loads the latest persisted state, if any, as the starting point for
    /// the next run. Returns whether state was found.
    pub fn restore(&mut self) -> Result<bool, PersistenceError> {
        let Some(persistence) = self.persistence.as_ref() else {
            return Ok(false);
        };
        let Some(state) = persistence.load_latest()? else {
            return Ok(false);
        };
        info!(
            conversation_id = %self.conversation_id,
            run_id = %state.run_id,
            "conversation restored"
        );
        self.continuation_token = state.continuation_token;
        self.scheduler.reset(state.tree);
        Ok(true)
    }

    /// Shared flag that cancels the run in flight when set.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelSignal {
        Arc::clone(&self.cancel)
    }

    /// Runs `prompt` to a terminal outcome.
    ///
    /// Cancellation is not an error: the run ends `aborted` with its partial
    /// tree kept. Failures replace the tree with a single error block.
    pub fn submit(
        &mut self,
        prompt: &str,
        observer: &mut dyn RunObserver,
    ) -> Result<&Run, RunError> {
        self.cancel.store(false, Ordering::Release);
        let cancel = Arc::clone(&self.cancel);
        let transport = Arc::clone(&self.transport);
        let policy = self.config.retry;

        let mut run = Run::start(Uuid::new_v4().to_string());
        let request = RunRequest {
            run_id: run.id.clone(),
            conversation_id: self.conversation_id.clone(),
            prompt: prompt.to_string(),
            continuation_token: self.continuation_token.clone(),
        };
        info!(
            run_id = %run.id,
            conversation_id = %self.conversation_id,
            resumed = request.continuation_token.is_some(),
            "run started"
        );
        if let Some(persistence) = self.persistence.as_mut() {
            if let Err(error) = persistence.record_prompt(&run.id, prompt) {
                warn!(run_id = %run.id, %error, "failed to record prompt");
            }
        }

        self.scheduler.reset(BlockTree::default());
        self.phase = RunPhase::Starting;
        self.retrying = false;
        observer.on_status(RunStatus::Waiting);

        let mut reconciler = EventReconciler::new(&self.config.hidden_agent_types);
        let mut cost = None;
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            let mut session = StreamSession {
                scheduler: &mut self.scheduler,
                reconciler: &mut reconciler,
                observer: &mut *observer,
                phase: &mut self.phase,
                retrying: &mut self.retrying,
                cost: &mut cost,
                cancel: &cancel,
                received_content: false,
            };
            let outcome = transport.run(&request, Arc::clone(&cancel), &mut session);
            let received_content = session.received_content;

            match outcome {
                Err(error)
                    if error.is_retryable()
                        && !received_content
                        && !is_cancelled(&cancel)
                        && policy.allows_retry_after(attempts) =>
                {
                    let delay = policy.delay_for(attempts - 1);
                    warn!(
                        run_id = %run.id,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %error,
                        "transient run failure, retrying"
                    );
                    self.retrying = true;
                    observer.on_retry(&RetryNotice {
                        attempt: attempts,
                        max_attempts: policy.max_attempts,
                        delay,
                        message: error.message().to_string(),
                    });
                    if !sleep_cancellable(delay, &cancel) {
                        break Err(TransportError::Cancelled);
                    }
                }
                other => break other,
            }
        };

        self.retrying = false;
        self.scheduler.stop_timer();
        let terminal = if is_cancelled(&cancel) || matches!(result, Err(TransportError::Cancelled)) {
            self.scheduler.enqueue(reconciler.abort_mutation());
            self.phase = RunPhase::Aborted;
            run.finish(RunOutcomeKind::Aborted);
            info!(run_id = %run.id, "run aborted");
            Ok(())
        } else {
            match result {
                Ok(RunOutcome::Success { continuation_token }) => {
                    if continuation_token.is_some() {
                        self.continuation_token = continuation_token;
                    }
                    run.continuation_token = self.continuation_token.clone();
                    self.phase = RunPhase::Success;
                    run.finish(RunOutcomeKind::Success);
                    Ok(())
                }
                Ok(RunOutcome::Error {
                    message,
                    error_code,
                }) => Err(RunError::from_outcome(message, error_code)),
                Err(error) => Err(RunError::from_transport(error, attempts)),
            }
        };
        run.cost = cost;

        if let Err(error) = &terminal {
            warn!(
                run_id = %run.id,
                attempts,
                requires_user_action = error.requires_user_action(),
                %error,
                "run failed"
            );
            self.scheduler.reset(BlockTree::error_notice(error.to_string()));
            self.phase = RunPhase::Error;
            run.finish(RunOutcomeKind::Error);
        } else if run.outcome == Some(RunOutcomeKind::Success) {
            info!(
                run_id = %run.id,
                elapsed_ms = run.elapsed.map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
                cost = run.cost,
                "run succeeded"
            );
        }

        self.scheduler.flush_now();
        self.diagnostics = reconciler.take_diagnostics();
        self.persist(&run);

        observer.on_snapshot(&self.scheduler.snapshot());
        observer.on_status(RunStatus::Idle);
        observer.on_terminal(&run);

        let run: &Run = self.last_run.insert(run);
        match terminal {
            Ok(()) => Ok(run),
            Err(error) => Err(error),
        }
    }

    fn persist(&mut self, run: &Run) {
        let Some(persistence) = self.persistence.as_mut() else {
            return;
        };
        let state = ConversationState {
            conversation_id: self.conversation_id.clone(),
            run_id: run.id.clone(),
            continuation_token: self.continuation_token.clone(),
            tree: BlockTree::clone(&self.scheduler.snapshot()),
        };
        if let Err(error) = persistence.save(&state) {
            warn!(run_id = %run.id, %error, "failed to persist run state");
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        self.scheduler.snapshot()
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.phase.status()
    }

    #[must_use]
    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    #[must_use]
    pub fn last_run(&self) -> Option<&Run> {
        self.last_run.as_ref()
    }

    #[must_use]
    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation_token.as_deref()
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Stream anomalies recorded during the last run.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
