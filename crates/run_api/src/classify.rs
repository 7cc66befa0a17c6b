use std::sync::OnceLock;

use agent_stream::TransportError;
use regex::Regex;

pub const CODE_PAYMENT_REQUIRED: &str = "payment_required";
pub const CODE_UNAUTHORIZED: &str = "unauthorized";

fn transient_text_regex() -> Option<&'static Regex> {
    static CACHED: OnceLock<Option<Regex>> = OnceLock::new();
    CACHED
        .get_or_init(|| {
            Regex::new(
                r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?(refused|reset|closed)|timed?.?out",
            )
            .ok()
        })
        .as_ref()
}

/// Error text policy for failures that look like a flaky network or service.
pub fn is_transient_error_text(error_text: &str) -> bool {
    transient_text_regex().is_some_and(|regex| regex.is_match(error_text))
}

/// Status policy for retryable HTTP statuses, also consulting the error text.
pub fn is_transient_http_error(status: u16, error_text: &str) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504) || is_transient_error_text(error_text)
}

/// Classifies a non-success HTTP response into the transport error taxonomy.
///
/// Authorization and payment are checked before transience so that a `429`
/// carrying `payment_required` is never retried.
pub fn classify_status(status: u16, code: Option<&str>, message: String) -> TransportError {
    let code = code.map(str::trim).unwrap_or("");
    if matches!(status, 401 | 403) || code.eq_ignore_ascii_case(CODE_UNAUTHORIZED) {
        return TransportError::Unauthorized { message };
    }
    if status == 402 || code.eq_ignore_ascii_case(CODE_PAYMENT_REQUIRED) {
        return TransportError::PaymentRequired { message };
    }
    if is_transient_http_error(status, &message) {
        return TransportError::Transient { message };
    }
    TransportError::Failed { message }
}
