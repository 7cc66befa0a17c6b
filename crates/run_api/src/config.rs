use std::collections::BTreeMap;
use std::time::Duration;

use crate::url::DEFAULT_RUN_API_BASE_URL;

/// Transport configuration for run service requests.
#[derive(Debug, Clone)]
pub struct RunApiConfig {
    /// Bearer token passed to `Authorization`.
    pub access_token: String,
    /// Base URL; the runs endpoint is derived from it.
    pub base_url: String,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    /// Optional request timeout.
    pub timeout: Option<Duration>,
}

impl Default for RunApiConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: DEFAULT_RUN_API_BASE_URL.to_string(),
            user_agent: None,
            extra_headers: BTreeMap::new(),
            timeout: None,
        }
    }
}

impl RunApiConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.extra_headers.extend(headers);
        self
    }
}
