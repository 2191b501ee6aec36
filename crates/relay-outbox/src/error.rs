//! Outbox error types.

use std::time::Duration;
use thiserror::Error;

/// Error raised by an [`EntryStore`](crate::EntryStore) implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend failure (database, filesystem, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Batch (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a [`Transport`](crate::Transport) for a single batch.
///
/// Carries enough detail for the queue to tell permanent rejections apart
/// from transient failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The receiver answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        /// Protocol error code from the response body (e.g. `M_LIMIT_EXCEEDED`).
        code: Option<String>,
        message: String,
        /// Server-requested wait before the next attempt.
        retry_after: Option<Duration>,
    },

    /// Connection could not be established or was interrupted.
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("Request timed out")]
    Timeout,

    /// Anything the transport could not map to the cases above.
    #[error("Delivery failed: {0}")]
    Other(String),
}

impl DeliveryError {
    /// Shorthand for an HTTP error without code or retry hint.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// HTTP status, if the receiver answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Protocol error code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Server-requested retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Persistence failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The background drain task is gone
    #[error("Delivery queue has shut down")]
    Closed,
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_error_accessors() {
        let err = DeliveryError::Http {
            status: 429,
            code: Some("M_LIMIT_EXCEEDED".to_string()),
            message: "Too many requests".to_string(),
            retry_after: Some(Duration::from_millis(1500)),
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.code(), Some("M_LIMIT_EXCEEDED"));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
        assert_eq!(err.to_string(), "HTTP 429: Too many requests");
    }

    #[test]
    fn test_non_http_errors_have_no_status() {
        assert_eq!(DeliveryError::Timeout.status(), None);
        assert_eq!(DeliveryError::Network("reset".into()).code(), None);
        assert_eq!(DeliveryError::Other("boom".into()).retry_after(), None);
    }

    #[test]
    fn test_store_error_converts_into_outbox_error() {
        let err: OutboxError = StoreError::Backend("disk full".to_string()).into();
        assert!(matches!(err, OutboxError::Store(_)));
        assert_eq!(err.to_string(), "Store error: Storage backend error: disk full");
    }
}
