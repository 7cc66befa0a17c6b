use agent_stream::TransportError;
use thiserror::Error;

pub const CODE_PAYMENT_REQUIRED: &str = "payment_required";
pub const CODE_UNAUTHORIZED: &str = "unauthorized";

/// Terminal failure of a run, surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("payment required: {message}")]
    PaymentRequired { message: String },

    #[error("authorization failed: {message}")]
    Unauthorized { message: String },

    #[error("run failed after {attempts} attempt(s): {message}")]
    RetryExhausted { attempts: u32, message: String },

    #[error("{message}")]
    Remote {
        message: String,
        error_code: Option<String>,
    },
}

impl RunError {
    /// Maps a transport failure that will not be retried. `Cancelled` never
    /// reaches this point; it becomes an aborted run instead.
    #[must_use]
    pub fn from_transport(error: TransportError, attempts: u32) -> Self {
        match error {
            TransportError::PaymentRequired { message } => Self::PaymentRequired { message },
            TransportError::Unauthorized { message } => Self::Unauthorized { message },
            TransportError::Transient { message } => Self::RetryExhausted { attempts, message },
            TransportError::Failed { message } => Self::Remote {
                message,
                error_code: None,
            },
            TransportError::Cancelled => Self::Remote {
                message: TransportError::Cancelled.to_string(),
                error_code: None,
            },
        }
    }

    /// Maps an error outcome reported by the run itself.
    #[must_use]
    pub fn from_outcome(message: String, error_code: Option<String>) -> Self {
        match error_code.as_deref() {
            Some(CODE_PAYMENT_REQUIRED) => Self::PaymentRequired { message },
            Some(CODE_UNAUTHORIZED) => Self::Unauthorized { message },
            _ => Self::Remote {
                message,
                error_code,
            },
        }
    }

    /// Payment and authorization failures need the user, not a retry.
    #[must_use]
    pub fn requires_user_action(&self) -> bool {
        matches!(self, Self::PaymentRequired { .. } | Self::Unauthorized { .. })
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::PaymentRequired { message }
            | Self::Unauthorized { message }
            | Self::RetryExhausted { message, .. }
            | Self::Remote { message, .. } => message,
        }
    }
}
