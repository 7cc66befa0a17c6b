use std::thread;
use std::time::{Duration, Instant};

use agent_stream::{is_cancelled, CancelSignal};

/// Total attempts for one run, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
/// Delay before the first retry.
pub const DEFAULT_BACKOFF_FLOOR_MS: u64 = 1000;
/// Upper bound for any single backoff delay.
pub const DEFAULT_BACKOFF_CEILING_MS: u64 = 8000;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Bounded exponential backoff around the network run call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub floor: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            floor: Duration::from_millis(DEFAULT_BACKOFF_FLOOR_MS),
            ceiling: Duration::from_millis(DEFAULT_BACKOFF_CEILING_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero based): `min(ceiling, floor * 2^retry)`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.floor
            .checked_mul(factor)
            .map_or(self.ceiling, |delay| delay.min(self.ceiling))
    }

    /// True when another attempt is allowed after `attempts` have run.
    #[must_use]
    pub fn allows_retry_after(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }
}

/// Sleeps for `duration` unless `cancel` is signalled first.
///
/// Returns false when the sleep was interrupted by cancellation.
pub fn sleep_cancellable(duration: Duration, cancel: &CancelSignal) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if is_cancelled(cancel) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use agent_stream::new_cancel_signal;

    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (0..6).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000, 8000]);
        assert_eq!(policy.delay_for(64), policy.ceiling);
    }

    #[test]
    fn attempt_budget_counts_the_first_attempt() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        assert!(policy.allows_retry_after(1));
        assert!(!policy.allows_retry_after(2));

        let single = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(!single.allows_retry_after(1));
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let cancel = new_cancel_signal();
        cancel.store(true, Ordering::Release);
        let started = Instant::now();
        assert!(!sleep_cancellable(Duration::from_secs(5), &cancel));
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(sleep_cancellable(Duration::from_millis(1), &new_cancel_signal()));
    }
}
