//! Error handling and sanitization
//!
//! This module provides utilities for sanitizing error messages to prevent
//! information disclosure to public callers while logging full details
//! internally, plus the canned error responses the relay sends.

use crate::rate_limit::RateDecision;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use ntnl_common::TunnelError;
use tracing::error;

/// Sanitize error messages for client responses
///
/// Logs the full error internally but returns a generic message to the caller.
///
/// # Examples
///
/// ```
/// use ntnl_common::TunnelError;
/// use ntnl_relay::error_handling::sanitize_error;
///
/// let err = TunnelError::InternalError("pending table poisoned at 10.0.1.5".into());
/// assert_eq!(sanitize_error(&err), "Internal server error");
/// ```
pub fn sanitize_error(e: &TunnelError) -> String {
    error!("Internal error: {}", e);
    "Internal server error".to_string()
}

/// Sanitize error with a custom client message
pub fn sanitize_error_with_message(e: &TunnelError, client_message: &str) -> String {
    error!("Error ({}): {}", client_message, e);
    client_message.to_string()
}

/// Errors whose message carries nothing internal and may be shown as-is
pub fn is_safe_error(e: &TunnelError) -> bool {
    matches!(
        e,
        TunnelError::TunnelNotFound(_)
            | TunnelError::InvalidSubdomain(_)
            | TunnelError::SubdomainInUse(_)
            | TunnelError::GatewayTimeout
            | TunnelError::RateLimitExceeded { .. }
    )
}

/// Returns the actual error message if it's safe, otherwise a sanitized version
pub fn get_client_error_message(e: &TunnelError) -> String {
    match e {
        TunnelError::TunnelNotFound(_) => "Tunnel not found".to_string(),
        _ if is_safe_error(e) => e.to_string(),
        TunnelError::BadGateway(_)
        | TunnelError::ConnectionError(_)
        | TunnelError::WebSocketError(_) => sanitize_error_with_message(e, "Bad Gateway"),
        _ => sanitize_error(e),
    }
}

/// Plain-text error response
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        message.to_string(),
    )
        .into_response()
}

/// Plain-text response for a relay error, with the message sanitized
pub fn tunnel_error_response(e: &TunnelError) -> Response {
    error_response(e.status_code(), &get_client_error_message(e))
}

/// Attach `X-RateLimit-*` headers describing `decision`
pub fn apply_rate_limit_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_after.as_secs()),
    );
}

/// 429 with `Retry-After` and a JSON body
pub fn rate_limited_response(decision: &RateDecision, message: &str) -> Response {
    let retry_after = decision.retry_after_secs.unwrap_or(1);
    let body = serde_json::json!({
        "error": "Too Many Requests",
        "message": message,
        "retryAfter": retry_after,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_rate_limit_headers(&mut response, decision);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
