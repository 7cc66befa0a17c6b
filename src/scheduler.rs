//! Coalescing of tree mutations into timed flushes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::block::{BlockTree, TreeSnapshot};

/// Pure tree transformation queued for the next flush.
pub type Mutation = Box<dyn FnOnce(BlockTree) -> BlockTree + Send>;

/// Queues mutations and applies them in enqueue order on flush.
///
/// The published snapshot is replaced wholesale, so readers only ever see the
/// tree before or after a whole batch.
pub struct UpdateScheduler {
    flush_delay: Duration,
    current: TreeSnapshot,
    pending: VecDeque<Mutation>,
    deadline: Option<Instant>,
}

impl UpdateScheduler {
    #[must_use]
    pub fn new(flush_delay: Duration) -> Self {
        Self {
            flush_delay,
            current: Arc::new(BlockTree::default()),
            pending: VecDeque::new(),
            deadline: None,
        }
    }

    pub fn enqueue(&mut self, mutation: Mutation) {
        self.enqueue_at(mutation, Instant::now());
    }

    /// Queues `mutation`, arming the flush deadline if none is pending.
    pub fn enqueue_at(&mut self, mutation: Mutation, now: Instant) {
        self.pending.push_back(mutation);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.flush_delay);
        }
    }

    /// Applies every queued mutation and publishes one snapshot.
    ///
    /// Returns false when nothing was queued.
    pub fn flush_now(&mut self) -> bool {
        self.deadline = None;
        if self.pending.is_empty() {
            return false;
        }

        let mut tree = BlockTree::clone(&self.current);
        for mutation in self.pending.drain(..) {
            tree = mutation(tree);
        }
        self.current = Arc::new(tree);
        true
    }

    /// Timer hook: flushes when the deadline has passed.
    pub fn flush_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => self.flush_now(),
            _ => false,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        Arc::clone(&self.current)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn flush_delay(&self) -> Duration {
        self.flush_delay
    }

    /// Disarms the timer; queued mutations stay until the next `flush_now`.
    pub fn stop_timer(&mut self) {
        self.deadline = None;
    }

    /// Discards queued work and publishes `tree` as the current snapshot.
    pub fn reset(&mut self, tree: BlockTree) {
        self.pending.clear();
        self.deadline = None;
        self.current = Arc::new(tree);
    }
}

impl fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("flush_delay", &self.flush_delay)
            .field("pending", &self.pending.len())
            .field("deadline", &self.deadline)
            .field("blocks", &self.current.blocks.len())
            .finish()
    }
}
