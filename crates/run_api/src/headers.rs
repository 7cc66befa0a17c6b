use std::collections::BTreeMap;

use crate::config::RunApiConfig;
use crate::error::RunApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for run requests.
///
/// Extra headers are applied last and may override the defaults, except for
/// `authorization` which always carries the configured token.
pub fn build_headers(config: &RunApiConfig) -> Result<BTreeMap<String, String>, RunApiError> {
    let token = config.access_token.trim();
    if token.is_empty() {
        return Err(RunApiError::MissingAccessToken);
    }

    let mut headers = BTreeMap::new();
    headers.insert(HEADER_ACCEPT.to_owned(), "text/event-stream".to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );

    let ua = config
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
    Ok(headers)
}

fn default_user_agent() -> String {
    format!(
        "run-reconciler/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
