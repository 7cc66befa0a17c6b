use std::fmt;

use agent_stream::TransportError;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

use crate::classify::{classify_status, is_transient_error_text};

#[derive(Debug)]
pub enum RunApiError {
    MissingAccessToken,
    InvalidBaseUrl(String),
    InvalidHeader(String),
    Request(reqwest::Error),
    Status {
        status: StatusCode,
        message: String,
        code: Option<String>,
    },
    Serde(JsonError),
    /// The body ended without a terminal `run_outcome` frame.
    MissingOutcome,
    Cancelled,
    Runtime(String),
}

impl RunApiError {
    /// Maps the client failure onto the transport-neutral retry taxonomy.
    pub fn into_transport_error(self) -> TransportError {
        match self {
            Self::Status {
                status,
                message,
                code,
            } => classify_status(status.as_u16(), code.as_deref(), message),
            Self::Request(error) => {
                let message = error.to_string();
                if error.is_connect()
                    || error.is_timeout()
                    || error.is_body()
                    || error.is_request()
                    || is_transient_error_text(&message)
                {
                    TransportError::transient(message)
                } else {
                    TransportError::failed(message)
                }
            }
            Self::MissingOutcome => TransportError::transient(Self::MissingOutcome.to_string()),
            Self::Cancelled => TransportError::Cancelled,
            other => TransportError::failed(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(rename = "error")]
    pub value: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayloadFields {
    pub message: Option<String>,
    pub code: Option<String>,
}

impl fmt::Display for RunApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAccessToken => write!(f, "access token is required"),
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status { status, message, .. } => write!(f, "HTTP {status} {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::MissingOutcome => write!(f, "stream ended before the run outcome"),
            Self::Cancelled => write!(f, "request was cancelled"),
            Self::Runtime(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for RunApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RunApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for RunApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extracts the `(message, code)` pair from a `{"error":{...}}` body.
///
/// Falls back to the raw body, then to the status reason, when the body does
/// not carry a non-empty message.
pub fn parse_error_body(status: StatusCode, body: &str) -> (String, Option<String>) {
    let fields = serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.value);

    let code = fields
        .as_ref()
        .and_then(|fields| fields.code.as_deref())
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(ToOwned::to_owned);
    let message = fields
        .and_then(|fields| fields.message)
        .filter(|message| !message.trim().is_empty());

    let message = match message {
        Some(message) => message,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        None => body.to_string(),
    };
    (message, code)
}

/// Message-only convenience over [`parse_error_body`].
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    parse_error_body(status, body).0
}
