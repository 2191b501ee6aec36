//! Retry backoff policy.

use crate::DeliveryError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate-limit error code carrying a `retry_after` hint.
pub const LIMIT_EXCEEDED_CODE: &str = "M_LIMIT_EXCEEDED";

/// Error code for payloads the receiver will never accept.
pub const TOO_LARGE_CODE: &str = "M_TOO_LARGE";

/// What to do after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay.
    RetryAfter(Duration),
    /// Stop retrying automatically.
    GiveUp,
}

/// Maps (attempt count, error) to a retry decision.
///
/// `attempt` starts at 1 for the first failure. Implementations must be pure:
/// the queue owns the attempt counter.
pub trait BackoffPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32, error: &DeliveryError) -> RetryDecision;
}

impl<F> BackoffPolicy for F
where
    F: Fn(u32, &DeliveryError) -> RetryDecision + Send + Sync,
{
    fn next_delay(&self, attempt: u32, error: &DeliveryError) -> RetryDecision {
        self(attempt, error)
    }
}

/// Backoff configuration.
///
/// Delay for attempt `n` is `base_delay_ms * 2^n`, capped at `max_delay_ms`.
/// With the defaults:
///
/// | Attempt | Delay   |
/// |---------|---------|
/// | 1       | 2s      |
/// | 2       | 4s      |
/// | 3       | 8s      |
/// | 4       | 16s     |
/// | 5+      | give up |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,
    /// Attempts after which the policy gives up.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            max_attempts: 4,
        }
    }
}

/// Exponential backoff that honors rate-limit hints and gives up on client errors.
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self
            .config
            .base_delay_ms
            .saturating_mul(multiplier)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, error: &DeliveryError) -> RetryDecision {
        if matches!(error.status(), Some(400 | 401 | 403)) {
            return RetryDecision::GiveUp;
        }

        match error.code() {
            Some(TOO_LARGE_CODE) => return RetryDecision::GiveUp,
            Some(LIMIT_EXCEEDED_CODE) => {
                if let Some(wait) = error.retry_after().filter(|d| !d.is_zero()) {
                    return RetryDecision::RetryAfter(wait);
                }
            }
            _ => {}
        }

        if attempt > self.config.max_attempts {
            return RetryDecision::GiveUp;
        }

        RetryDecision::RetryAfter(self.delay_for(attempt))
    }
}
