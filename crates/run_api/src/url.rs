use crate::error::RunApiError;

/// Default base URL for the run service.
pub const DEFAULT_RUN_API_BASE_URL: &str = "http://127.0.0.1:8787/api";

/// Normalize a base URL to the runs endpoint.
///
/// Normalization rules:
/// 1) an empty base falls back to [`DEFAULT_RUN_API_BASE_URL`]
/// 2) keep a path ending in `/runs` unchanged
/// 3) append `/runs` otherwise
pub fn normalize_runs_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_RUN_API_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/runs") {
        return trimmed.to_string();
    }
    format!("{trimmed}/runs")
}

/// Normalizes and validates the endpoint, rejecting non-HTTP schemes.
pub fn resolve_runs_url(input: &str) -> Result<::url::Url, RunApiError> {
    let normalized = normalize_runs_url(input);
    let parsed = ::url::Url::parse(&normalized)
        .map_err(|error| RunApiError::InvalidBaseUrl(format!("{normalized}: {error}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(RunApiError::InvalidBaseUrl(format!(
            "{normalized}: unsupported scheme {scheme}"
        ))),
    }
}
