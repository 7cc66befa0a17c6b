//! Tracing subscriber setup for hosts embedding the engine.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::EngineConfig;

const DEFAULT_LEVEL: &str = "info";

/// Builds the filter: explicit `level`, then `RUST_LOG`, then the defaults.
fn build_filter(level: Option<&str>) -> EnvFilter {
    let default_filter = |level: &str| {
        EnvFilter::new(format!(
            "run_reconciler={level},run_api={level},session_store={level},\
             agent_stream={level},reqwest=warn,hyper=warn,hyper_util=warn"
        ))
    };

    match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| default_filter(DEFAULT_LEVEL)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(DEFAULT_LEVEL)),
    }
}

/// Installs a compact stderr subscriber. Returns false when a global
/// subscriber was already installed.
pub fn init_tracing(config: &EngineConfig) -> bool {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .compact();

    tracing_subscriber::registry()
        .with(build_filter(config.log_filter.as_deref()))
        .with(layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins_and_bad_filters_fall_back() {
        let explicit = build_filter(Some("run_reconciler=trace"));
        assert!(explicit.to_string().contains("run_reconciler=trace"));

        let fallback = build_filter(Some("run_reconciler=loud"));
        assert!(fallback.to_string().contains("run_reconciler=info"));
    }

    #[test]
    fn second_init_is_harmless() {
        let config = EngineConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
