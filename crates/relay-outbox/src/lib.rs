//! Durable, ordered, retrying delivery queue.
//!
//! Callers enqueue outbound items; the queue splits them into bounded
//! batches, persists them through an [`EntryStore`] and delivers them one at
//! a time, oldest first, through a [`Transport`]. Failures are retried with
//! backoff, permanent rejections are dropped, and everything still queued
//! survives a restart when the store is durable.
//!
//! - [`DeliveryQueue`]: handle to the background drain task
//! - [`EntryStore`] / [`MemoryStore`]: persistence seam
//! - [`Transport`]: delivery seam
//! - [`BackoffPolicy`], [`ErrorClassifier`], [`RetryScheduler`]: failure handling

mod backoff;
mod batch;
mod classify;
mod error;
mod queue;
mod scheduler;
mod store;
mod transport;

#[cfg(test)]
mod test_support;

pub use backoff::{
    BackoffConfig, BackoffPolicy, ExponentialBackoff, RetryDecision, LIMIT_EXCEEDED_CODE,
    TOO_LARGE_CODE,
};
pub use batch::{
    split_into_batches, Batch, EntryId, OutboundItem, QueueEntry, TxnIdGenerator, MAX_BATCH_SIZE,
};
pub use classify::{ErrorClass, ErrorClassifier, HttpStatusClassifier};
pub use error::{DeliveryError, OutboxError, OutboxResult, StoreError, StoreResult};
pub use queue::{DeliveryQueue, QueueOptions, QueueSnapshot, QueueState, QueueStatus};
pub use scheduler::{RetryScheduler, RetryWakeup, ScheduledRetry, TokioScheduler};
pub use store::{EntryStore, MemoryStore};
pub use transport::Transport;
