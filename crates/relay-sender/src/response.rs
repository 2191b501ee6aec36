//! Mapping HTTP outcomes to delivery errors.

use relay_outbox::DeliveryError;
use serde::Deserialize;
use std::time::Duration;

/// Longest raw body kept in an error message when the body is not JSON.
const MAX_RAW_BODY_CHARS: usize = 200;

/// Standard JSON error body.
#[derive(Debug, Default, Deserialize)]
pub struct MatrixErrorBody {
    #[serde(default)]
    pub errcode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
}

/// Build a [`DeliveryError`] for a non-success response.
///
/// `retry_after_ms` in the body takes precedence over a `Retry-After` header.
pub fn error_from_response(
    status: u16,
    body: &str,
    retry_after_header: Option<Duration>,
) -> DeliveryError {
    let parsed: Option<MatrixErrorBody> = serde_json::from_str(body).ok();

    let (code, message, retry_after) = match parsed {
        Some(body) => (
            body.errcode,
            body.error,
            body.retry_after_ms.map(Duration::from_millis),
        ),
        None => (None, None, None),
    };

    let message = message.unwrap_or_else(|| {
        let raw = body.trim();
        if raw.is_empty() {
            format!("status {}", status)
        } else {
            raw.chars().take(MAX_RAW_BODY_CHARS).collect()
        }
    });

    DeliveryError::Http {
        status,
        code,
        message,
        retry_after: retry_after.or(retry_after_header),
    }
}

/// Parse a `Retry-After` header given in seconds. HTTP dates are ignored.
pub(crate) fn parse_retry_after_header(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map a client-side failure (no response) to a [`DeliveryError`].
pub fn error_from_transport(err: &reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout
    } else if err.is_connect() || err.is_request() {
        DeliveryError::Network(err.to_string())
    } else {
        DeliveryError::Other(err.to_string())
    }
}
