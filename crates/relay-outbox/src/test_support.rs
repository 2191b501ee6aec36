//! Test doubles for the queue.

use crate::{
    Batch, BackoffPolicy, DeliveryError, DeliveryQueue, EntryId, EntryStore, OutboundItem,
    QueueEntry, QueueSnapshot, RetryDecision, RetryScheduler, RetryWakeup, ScheduledRetry,
    StoreError, StoreResult, Transport,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// `count` distinct items.
pub fn items(count: usize) -> Vec<OutboundItem> {
    (0..count)
        .map(|i| {
            OutboundItem::new(
                format!("@user{}:example.org", i),
                format!("DEVICE{}", i),
                json!({ "index": i }),
            )
        })
        .collect()
}

/// Wait until the queue snapshot satisfies `predicate`.
pub async fn wait_for<F>(queue: &DeliveryQueue, predicate: F) -> QueueSnapshot
where
    F: FnMut(&QueueSnapshot) -> bool,
{
    let mut rx = queue.subscribe();
    let snapshot = tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out, last snapshot: {:?}", queue.snapshot()))
        .expect("drain task exited")
        .clone();
    snapshot
}

/// Transport that records batches and replays scripted outcomes.
///
/// Outcomes are consumed in order; once exhausted every delivery succeeds.
/// In held mode each delivery blocks until `release` grants it a permit.
pub struct RecordingTransport {
    calls: Mutex<Vec<Batch>>,
    outcomes: Mutex<VecDeque<Result<(), DeliveryError>>>,
    held: AtomicBool,
    gate: Semaphore,
    in_flight: AtomicUsize,
    max_concurrent: AtomicUsize,
    call_count: watch::Sender<usize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            outcomes: Mutex::new(VecDeque::new()),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            call_count: watch::Sender::new(0),
        }
    }

    pub fn push_outcome(&self, outcome: Result<(), DeliveryError>) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, deliveries: usize) {
        self.gate.add_permits(deliveries);
    }

    pub fn calls(&self) -> Vec<Batch> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub async fn wait_for_calls(&self, count: usize) {
        let mut rx = self.call_count.subscribe();
        tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|c| *c >= count))
            .await
            .expect("timed out waiting for deliveries")
            .expect("transport dropped");
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(in_flight, Ordering::SeqCst);

        let count = {
            let mut calls = self.calls.lock();
            calls.push(batch.clone());
            calls.len()
        };
        self.call_count.send_replace(count);

        if self.held.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }

        let outcome = self.outcomes.lock().pop_front().unwrap_or(Ok(()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

struct ScheduledSlot {
    delay: Duration,
    wakeup: Option<RetryWakeup>,
    cancelled: Arc<AtomicBool>,
}

/// Scheduler that never fires on its own.
#[derive(Default)]
pub struct ManualScheduler {
    slots: Mutex<Vec<ScheduledSlot>>,
}

struct ManualRetry {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledRetry for ManualRetry {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.slots.lock().iter().map(|s| s.delay).collect()
    }

    pub fn cancelled_count(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Fire the most recent retry unless it was cancelled.
    pub fn fire_latest(&self) -> bool {
        let wakeup = {
            let mut slots = self.slots.lock();
            match slots.last_mut() {
                Some(slot) if !slot.cancelled.load(Ordering::SeqCst) => slot.wakeup.take(),
                _ => None,
            }
        };
        wakeup.map(RetryWakeup::fire).unwrap_or(false)
    }

    /// Fire retry `index` even if it was cancelled.
    pub fn force_fire(&self, index: usize) -> bool {
        let wakeup = self
            .slots
            .lock()
            .get_mut(index)
            .and_then(|slot| slot.wakeup.take());
        wakeup.map(RetryWakeup::fire).unwrap_or(false)
    }

    pub fn force_fire_latest(&self) -> bool {
        let len = self.slots.lock().len();
        len > 0 && self.force_fire(len - 1)
    }
}

impl RetryScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, wakeup: RetryWakeup) -> Box<dyn ScheduledRetry> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.slots.lock().push(ScheduledSlot {
            delay,
            wakeup: Some(wakeup),
            cancelled: cancelled.clone(),
        });
        Box::new(ManualRetry { cancelled })
    }
}

/// Backoff returning a fixed decision and recording the attempts it saw.
pub struct RecordingBackoff {
    decision: RetryDecision,
    attempts: Mutex<Vec<u32>>,
}

impl RecordingBackoff {
    pub fn retry_after(delay: Duration) -> Self {
        Self {
            decision: RetryDecision::RetryAfter(delay),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn give_up() -> Self {
        Self {
            decision: RetryDecision::GiveUp,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().clone()
    }
}

impl BackoffPolicy for RecordingBackoff {
    fn next_delay(&self, attempt: u32, _error: &DeliveryError) -> RetryDecision {
        self.attempts.lock().push(attempt);
        self.decision
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

impl EntryStore for FailingStore {
    fn append_entries(&self, _batches: &[Batch]) -> StoreResult<()> {
        Err(StoreError::Backend("disk unavailable".to_string()))
    }

    fn oldest_entry(&self) -> StoreResult<Option<QueueEntry>> {
        Err(StoreError::Backend("disk unavailable".to_string()))
    }

    fn remove_entry(&self, _id: EntryId) -> StoreResult<()> {
        Err(StoreError::Backend("disk unavailable".to_string()))
    }

    fn pending_count(&self) -> StoreResult<usize> {
        Err(StoreError::Backend("disk unavailable".to_string()))
    }
}
