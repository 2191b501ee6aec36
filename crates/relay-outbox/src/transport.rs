//! Delivery seam.

use crate::{Batch, DeliveryError};
use async_trait::async_trait;

/// Sends one batch to the remote service.
///
/// Implementations report failures as [`DeliveryError`] with enough detail
/// (status, error code) for the queue to classify them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError>;
}
