//! Sender error types.

use thiserror::Error;

/// Errors constructing the transport. Delivery failures are reported as
/// `DeliveryError` instead.
#[derive(Error, Debug)]
pub enum SenderError {
    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Base URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Base URL cannot carry path segments (e.g. `mailto:`)
    #[error("Base URL cannot be a base: {0}")]
    CannotBeABase(String),
}

/// Result type alias using SenderError.
pub type SenderResult<T> = Result<T, SenderError>;
