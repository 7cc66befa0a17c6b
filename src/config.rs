//! Environment configuration.

use std::env;
use std::time::Duration;

use crate::reconciler::DEFAULT_HIDDEN_AGENT_TYPES;
use crate::retry::{
    RetryPolicy, DEFAULT_BACKOFF_CEILING_MS, DEFAULT_BACKOFF_FLOOR_MS, DEFAULT_MAX_ATTEMPTS,
};

pub const DEFAULT_FLUSH_MS: u64 = 50;

pub const ENV_FLUSH_MS: &str = "RUN_RECONCILER_FLUSH_MS";
pub const ENV_MAX_ATTEMPTS: &str = "RUN_RECONCILER_MAX_ATTEMPTS";
pub const ENV_BACKOFF_FLOOR_MS: &str = "RUN_RECONCILER_BACKOFF_FLOOR_MS";
pub const ENV_BACKOFF_CEILING_MS: &str = "RUN_RECONCILER_BACKOFF_CEILING_MS";
pub const ENV_HIDDEN_AGENTS: &str = "RUN_RECONCILER_HIDDEN_AGENTS";
pub const ENV_LOG: &str = "RUN_RECONCILER_LOG";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub flush_delay: Duration,
    pub retry: RetryPolicy,
    pub hidden_agent_types: Vec<String>,
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_millis(DEFAULT_FLUSH_MS),
            retry: RetryPolicy::default(),
            hidden_agent_types: DEFAULT_HIDDEN_AGENT_TYPES
                .iter()
                .map(ToString::to_string)
                .collect(),
            log_filter: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let floor = env_u64(ENV_BACKOFF_FLOOR_MS).unwrap_or(DEFAULT_BACKOFF_FLOOR_MS);
        let ceiling = env_u64(ENV_BACKOFF_CEILING_MS)
            .unwrap_or(DEFAULT_BACKOFF_CEILING_MS)
            .max(floor);
        let hidden_agent_types = env_string_opt(ENV_HIDDEN_AGENTS)
            .map(|value| parse_list(&value))
            .unwrap_or_else(|| Self::default().hidden_agent_types);

        Self {
            flush_delay: Duration::from_millis(env_u64(ENV_FLUSH_MS).unwrap_or(DEFAULT_FLUSH_MS)),
            retry: RetryPolicy {
                max_attempts: env_u64(ENV_MAX_ATTEMPTS)
                    .and_then(|value| u32::try_from(value).ok())
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_MAX_ATTEMPTS),
                floor: Duration::from_millis(floor),
                ceiling: Duration::from_millis(ceiling),
            },
            hidden_agent_types,
            log_filter: env_string_opt(ENV_LOG),
        }
    }

    #[must_use]
    pub fn with_flush_delay(mut self, flush_delay: Duration) -> Self {
        self.flush_delay = flush_delay;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_hidden_agent_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden_agent_types = types.into_iter().map(Into::into).collect();
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_string_opt(key).and_then(|value| value.trim().parse().ok())
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn unset_env_uses_defaults() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_FLUSH_MS, None);
        let _g2 = set_env_guard(ENV_MAX_ATTEMPTS, None);
        let _g3 = set_env_guard(ENV_BACKOFF_FLOOR_MS, None);
        let _g4 = set_env_guard(ENV_BACKOFF_CEILING_MS, None);
        let _g5 = set_env_guard(ENV_HIDDEN_AGENTS, None);
        let _g6 = set_env_guard(ENV_LOG, None);

        assert_eq!(EngineConfig::from_env(), EngineConfig::default());
    }

    #[test]
    fn env_values_override_defaults() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_FLUSH_MS, Some("10"));
        let _g2 = set_env_guard(ENV_MAX_ATTEMPTS, Some("2"));
        let _g3 = set_env_guard(ENV_BACKOFF_FLOOR_MS, Some("100"));
        let _g4 = set_env_guard(ENV_BACKOFF_CEILING_MS, Some("400"));
        let _g5 = set_env_guard(ENV_HIDDEN_AGENTS, Some(" pruner , ,summarizer"));
        let _g6 = set_env_guard(ENV_LOG, Some("run_reconciler=debug"));

        let config = EngineConfig::from_env();
        assert_eq!(config.flush_delay, Duration::from_millis(10));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.floor, Duration::from_millis(100));
        assert_eq!(config.retry.ceiling, Duration::from_millis(400));
        assert_eq!(config.hidden_agent_types, vec!["pruner", "summarizer"]);
        assert_eq!(config.log_filter.as_deref(), Some("run_reconciler=debug"));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_FLUSH_MS, Some("soon"));
        let _g2 = set_env_guard(ENV_MAX_ATTEMPTS, Some("0"));
        let _g3 = set_env_guard(ENV_BACKOFF_FLOOR_MS, Some("-5"));
        let _g4 = set_env_guard(ENV_BACKOFF_CEILING_MS, Some("10"));

        let config = EngineConfig::from_env();
        assert_eq!(config.flush_delay, Duration::from_millis(DEFAULT_FLUSH_MS));
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.retry.floor, Duration::from_millis(DEFAULT_BACKOFF_FLOOR_MS));
        assert_eq!(config.retry.ceiling, Duration::from_millis(DEFAULT_BACKOFF_FLOOR_MS));
    }
}
