//! Delivery error classification.

use crate::DeliveryError;

/// How a delivery failure is expected to behave on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, timeout or server-side failure; worth retrying.
    Transient,
    /// The receiver rejected the batch; retrying will fail identically.
    Permanent,
    /// Not enough information to tell.
    Unknown,
}

/// Pure predicate mapping a delivery error to an [`ErrorClass`].
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &DeliveryError) -> ErrorClass;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&DeliveryError) -> ErrorClass + Send + Sync,
{
    fn classify(&self, error: &DeliveryError) -> ErrorClass {
        self(error)
    }
}

/// Classifies by HTTP status range: 4xx is permanent, 5xx is transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpStatusClassifier;

impl ErrorClassifier for HttpStatusClassifier {
    fn classify(&self, error: &DeliveryError) -> ErrorClass {
        match error {
            DeliveryError::Http { status, .. } => match status / 100 {
                4 => ErrorClass::Permanent,
                5 => ErrorClass::Transient,
                _ => ErrorClass::Unknown,
            },
            DeliveryError::Network(_) | DeliveryError::Timeout => ErrorClass::Transient,
            DeliveryError::Other(_) => ErrorClass::Unknown,
        }
    }
}
