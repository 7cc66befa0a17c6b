use agent_stream::TransportError;
use reqwest::StatusCode;

use run_api::classify::{classify_status, is_transient_http_error};
use run_api::error::{parse_error_body, parse_error_message};
use run_api::RunApiError;

#[test]
fn parse_error_body_extracts_message_and_code() {
    let body = r#"{"error":{"code":"payment_required","message":"out of credits"}}"#;
    let (message, code) = parse_error_body(StatusCode::BAD_REQUEST, body);
    assert_eq!(message, "out of credits");
    assert_eq!(code.as_deref(), Some("payment_required"));
}

#[test]
fn parse_error_message_falls_back_to_raw_body_then_reason() {
    assert_eq!(
        parse_error_message(StatusCode::INTERNAL_SERVER_ERROR, "raw failure text"),
        "raw failure text"
    );
    assert_eq!(
        parse_error_message(StatusCode::SERVICE_UNAVAILABLE, ""),
        "Service Unavailable"
    );
}

#[test]
fn transient_statuses_and_texts_are_detected() {
    for status in [408, 429, 500, 502, 503, 504] {
        assert!(is_transient_http_error(status, ""), "status {status}");
    }
    assert!(is_transient_http_error(400, "upstream connect error"));
    assert!(is_transient_http_error(400, "Connection reset by peer"));
    assert!(!is_transient_http_error(400, "invalid prompt"));
}

#[test]
fn classify_status_distinguishes_authorization_and_payment() {
    assert_eq!(
        classify_status(401, None, "no".to_string()),
        TransportError::Unauthorized {
            message: "no".to_string()
        }
    );
    assert_eq!(
        classify_status(403, None, "no".to_string()),
        TransportError::Unauthorized {
            message: "no".to_string()
        }
    );
    assert_eq!(
        classify_status(402, None, "pay".to_string()),
        TransportError::PaymentRequired {
            message: "pay".to_string()
        }
    );
    assert_eq!(
        classify_status(429, Some("payment_required"), "pay".to_string()),
        TransportError::PaymentRequired {
            message: "pay".to_string()
        }
    );
}

#[test]
fn classify_status_marks_retryable_and_plain_failures() {
    assert!(classify_status(503, None, "down".to_string()).is_retryable());
    assert_eq!(
        classify_status(400, Some("bad_request"), "invalid model".to_string()),
        TransportError::failed("invalid model")
    );
}

#[test]
fn api_errors_map_onto_transport_taxonomy() {
    assert_eq!(
        RunApiError::Cancelled.into_transport_error(),
        TransportError::Cancelled
    );
    assert!(RunApiError::MissingOutcome
        .into_transport_error()
        .is_retryable());
    assert_eq!(
        RunApiError::MissingAccessToken.into_transport_error(),
        TransportError::failed("access token is required")
    );
}
