use agent_stream::RunRequest;
use serde::{Deserialize, Serialize};

/// JSON body posted to open a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPayload {
    pub run_id: String,
    pub conversation_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    /// Always true; the service must answer with an event stream.
    pub stream: bool,
}

impl From<&RunRequest> for RunPayload {
    fn from(request: &RunRequest) -> Self {
        Self {
            run_id: request.run_id.clone(),
            conversation_id: request.conversation_id.clone(),
            prompt: request.prompt.clone(),
            continuation_token: request
                .continuation_token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(ToOwned::to_owned),
            stream: true,
        }
    }
}
