//! Delivery queue and its drain task.

use crate::{
    split_into_batches, BackoffPolicy, DeliveryError, EntryStore, ErrorClass, ErrorClassifier,
    ExponentialBackoff, HttpStatusClassifier, OutboundItem, OutboxError, OutboxResult,
    QueueEntry, RetryDecision, RetryScheduler, RetryWakeup, ScheduledRetry, TokioScheduler,
    Transport, TxnIdGenerator,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Messages handled by the drain task.
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    Drain,
    RetryDue(u64),
    Shutdown,
}

/// Observable lifecycle state of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Running, nothing in flight, no retry pending.
    Idle,
    /// A drain pass is active.
    Draining,
    /// Waiting for a scheduled retry.
    AwaitingRetry,
    /// Stopped; no drain will start until `start()`.
    Stopped,
}

/// Point-in-time view of the drain task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub state: QueueState,
    /// Consecutive failed attempts since the last successful delivery.
    pub retry_attempts: u32,
    /// Batches delivered since the queue was spawned.
    pub delivered: u64,
    /// Batches dropped as permanent failures.
    pub dropped: u64,
    /// Completed drain passes.
    pub passes: u64,
    /// Last store error seen by the drain task.
    pub last_error: Option<String>,
}

impl Default for QueueSnapshot {
    fn default() -> Self {
        Self {
            state: QueueState::Idle,
            retry_attempts: 0,
            delivered: 0,
            dropped: 0,
            passes: 0,
            last_error: None,
        }
    }
}

/// Queue status combining the drain snapshot with the store backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    /// Entries still persisted.
    pub pending: usize,
    pub snapshot: QueueSnapshot,
}

/// Collaborators consulted on delivery failure.
pub struct QueueOptions {
    pub backoff: Arc<dyn BackoffPolicy>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub scheduler: Arc<dyn RetryScheduler>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            backoff: Arc::new(ExponentialBackoff::default()),
            classifier: Arc::new(HttpStatusClassifier),
            scheduler: Arc::new(TokioScheduler),
        }
    }
}

/// Durable, ordered, retrying delivery queue.
///
/// Batches are persisted through the [`EntryStore`] and delivered strictly
/// oldest-first through the [`Transport`] by a single background task. A
/// failing head entry blocks everything behind it until it is delivered,
/// dropped as a permanent failure, or the queue is stopped.
pub struct DeliveryQueue {
    store: Arc<dyn EntryStore>,
    txn_ids: TxnIdGenerator,
    commands: mpsc::UnboundedSender<Command>,
    running: Arc<AtomicBool>,
    snapshot: watch::Receiver<QueueSnapshot>,
    task: JoinHandle<()>,
}

impl DeliveryQueue {
    /// Spawn a queue with the default backoff, classifier and tokio scheduler.
    ///
    /// Must be called from within a tokio runtime. The queue starts in the
    /// running state but does not drain until `start()` or `enqueue()`.
    pub fn spawn(store: Arc<dyn EntryStore>, transport: Arc<dyn Transport>) -> Self {
        Self::spawn_with(store, transport, QueueOptions::default())
    }

    /// Spawn a queue with custom failure-handling collaborators.
    pub fn spawn_with(
        store: Arc<dyn EntryStore>,
        transport: Arc<dyn Transport>,
        options: QueueOptions,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(QueueSnapshot::default());
        let running = Arc::new(AtomicBool::new(true));

        let task = DrainTask {
            store: store.clone(),
            transport,
            backoff: options.backoff,
            classifier: options.classifier,
            scheduler: options.scheduler,
            receiver,
            wakeup_sender: commands.downgrade(),
            receiver_closed: false,
            snapshot: snapshot_tx,
            running: running.clone(),
            draining: false,
            shutdown_requested: false,
            retry_attempts: 0,
            pending_retry: None,
            retry_generation: 0,
        };

        Self {
            store,
            txn_ids: TxnIdGenerator::new(),
            commands,
            running,
            snapshot,
            task: tokio::spawn(task.run()),
        }
    }

    /// Resume draining. Idempotent.
    pub fn start(&self) -> OutboxResult<()> {
        self.running.store(true, Ordering::SeqCst);
        self.send(Command::Start)
    }

    /// Stop draining and cancel any pending retry. Idempotent.
    ///
    /// A delivery already in flight completes and its result is applied, but
    /// no further entries are sent until `start()`. The drain task sees the
    /// stop before this returns, even while a delivery is in flight.
    pub fn stop(&self) -> OutboxResult<()> {
        self.running.store(false, Ordering::SeqCst);
        self.send(Command::Stop)
    }

    /// Persist `items` as one or more batches and trigger a drain.
    ///
    /// Returns the number of batches created once they are persisted; does
    /// not wait for delivery. Empty `items` is a no-op.
    pub fn enqueue(&self, event_type: &str, items: Vec<OutboundItem>) -> OutboxResult<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let batches = split_into_batches(event_type, &items, &self.txn_ids);
        self.store.append_entries(&batches)?;

        debug!(
            event_type = %event_type,
            items = items.len(),
            batches = batches.len(),
            "Enqueued outbound batches"
        );

        // Entries are durable; a dead drain task only delays delivery.
        if self.send(Command::Drain).is_err() {
            warn!(event_type = %event_type, "Drain task gone, batches left queued");
        }

        Ok(batches.len())
    }

    /// Current drain snapshot.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch drain progress.
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshot.clone()
    }

    /// Drain snapshot plus the number of entries still persisted.
    pub fn status(&self) -> OutboxResult<QueueStatus> {
        Ok(QueueStatus {
            pending: self.store.pending_count()?,
            snapshot: self.snapshot(),
        })
    }

    /// Stop the queue and wait for the drain task to exit.
    ///
    /// An in-flight delivery is allowed to finish first.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Drain task ended abnormally");
        }
    }

    fn send(&self, command: Command) -> OutboxResult<()> {
        self.commands.send(command).map_err(|_| OutboxError::Closed)
    }
}

/// How a drain pass ended.
#[derive(Debug)]
enum PassOutcome {
    Drained,
    Stopped,
    RetryAfter(Duration),
    Dropped,
    GaveUp,
    StoreFailed,
}

struct DrainTask {
    store: Arc<dyn EntryStore>,
    transport: Arc<dyn Transport>,
    backoff: Arc<dyn BackoffPolicy>,
    classifier: Arc<dyn ErrorClassifier>,
    scheduler: Arc<dyn RetryScheduler>,
    receiver: mpsc::UnboundedReceiver<Command>,
    wakeup_sender: mpsc::WeakUnboundedSender<Command>,
    receiver_closed: bool,
    snapshot: watch::Sender<QueueSnapshot>,
    /// Written by the handle's `start()`/`stop()`; commands only trigger work.
    running: Arc<AtomicBool>,
    draining: bool,
    shutdown_requested: bool,
    retry_attempts: u32,
    pending_retry: Option<Box<dyn ScheduledRetry>>,
    retry_generation: u64,
}

impl DrainTask {
    async fn run(mut self) {
        while !self.shutdown_requested {
            let Some(command) = self.receiver.recv().await else {
                break;
            };

            match command {
                Command::Start => {
                    self.publish();
                    self.drain().await;
                }
                Command::Stop => self.on_stop(),
                Command::Drain => self.drain().await,
                Command::RetryDue(generation) => {
                    if generation == self.retry_generation && self.pending_retry.is_some() {
                        self.pending_retry = None;
                        self.drain().await;
                    } else {
                        debug!(generation, current = self.retry_generation, "Ignoring stale retry");
                    }
                }
                Command::Shutdown => {
                    self.on_stop();
                    self.shutdown_requested = true;
                }
            }
        }

        self.cancel_pending_retry();
        debug!("Drain task exited");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn on_stop(&mut self) {
        self.cancel_pending_retry();
        self.publish();
    }

    /// Commands arriving while a delivery is in flight.
    fn handle_while_draining(&mut self, command: Command) {
        match command {
            Command::Start => {}
            Command::Stop => self.cancel_pending_retry(),
            // The active pass picks up newly appended entries itself
            Command::Drain => {}
            Command::RetryDue(generation) => {
                debug!(generation, "Ignoring retry while draining");
            }
            Command::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
                self.shutdown_requested = true;
            }
        }
    }

    async fn drain(&mut self) {
        if self.draining || !self.is_running() {
            return;
        }

        // A new pass supersedes any scheduled retry
        self.cancel_pending_retry();
        self.draining = true;
        self.publish();

        debug!("Attempting to send queued batches");
        let outcome = self.drain_pass().await;
        self.draining = false;

        let running = self.is_running();
        match outcome {
            PassOutcome::RetryAfter(delay) if running => self.schedule_retry(delay),
            PassOutcome::Drained if running => debug!("All queued batches sent"),
            _ => {}
        }

        self.publish_with(|s| s.passes += 1);
    }

    async fn drain_pass(&mut self) -> PassOutcome {
        while self.is_running() {
            let entry = match self.store.oldest_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => return PassOutcome::Drained,
                Err(e) => return self.store_failed("read oldest entry", e),
            };

            info!(
                entry_id = %entry.id,
                txn_id = %entry.batch.txn_id,
                event_type = %entry.batch.event_type,
                items = entry.batch.items.len(),
                "Sending batch"
            );

            match self.deliver(&entry).await {
                Ok(()) => {
                    if let Err(e) = self.store.remove_entry(entry.id) {
                        return self.store_failed("remove delivered entry", e);
                    }
                    self.retry_attempts = 0;
                    self.snapshot.send_modify(|s| {
                        s.delivered += 1;
                        s.retry_attempts = 0;
                    });
                }
                Err(e) => return self.handle_failure(&entry, e),
            }
        }

        PassOutcome::Stopped
    }

    /// Await one delivery while still servicing commands.
    async fn deliver(&mut self, entry: &QueueEntry) -> Result<(), DeliveryError> {
        let transport = self.transport.clone();
        let delivery = transport.deliver(&entry.batch);
        tokio::pin!(delivery);

        loop {
            tokio::select! {
                outcome = &mut delivery => return outcome,
                command = self.receiver.recv(), if !self.receiver_closed => match command {
                    Some(command) => self.handle_while_draining(command),
                    None => self.receiver_closed = true,
                },
            }
        }
    }

    fn handle_failure(&mut self, entry: &QueueEntry, error: DeliveryError) -> PassOutcome {
        self.retry_attempts += 1;
        let attempt = self.retry_attempts;
        self.snapshot.send_modify(|s| s.retry_attempts = attempt);

        match self.backoff.next_delay(attempt, &error) {
            RetryDecision::GiveUp => {
                // The policy does not say why it gave up; only a permanent
                // rejection justifies dropping the entry.
                if self.classifier.classify(&error) == ErrorClass::Permanent {
                    error!(
                        entry_id = %entry.id,
                        txn_id = %entry.batch.txn_id,
                        error = %error,
                        "Fatal error sending batch, dropping it"
                    );
                    if let Err(e) = self.store.remove_entry(entry.id) {
                        return self.store_failed("drop rejected entry", e);
                    }
                    self.snapshot.send_modify(|s| s.dropped += 1);
                    PassOutcome::Dropped
                } else {
                    info!(
                        entry_id = %entry.id,
                        attempt,
                        error = %error,
                        "Automatic retry limit reached, batch left queued"
                    );
                    PassOutcome::GaveUp
                }
            }
            RetryDecision::RetryAfter(delay) => {
                info!(
                    entry_id = %entry.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Failed to send batch, will retry"
                );
                PassOutcome::RetryAfter(delay)
            }
        }
    }

    fn store_failed(&mut self, operation: &str, e: crate::StoreError) -> PassOutcome {
        error!(operation, error = %e, "Outbox store failure, ending drain pass");
        let message = e.to_string();
        self.snapshot.send_modify(|s| s.last_error = Some(message));
        PassOutcome::StoreFailed
    }

    fn schedule_retry(&mut self, delay: Duration) {
        let Some(sender) = self.wakeup_sender.upgrade() else {
            debug!("Queue handle dropped, not scheduling retry");
            return;
        };
        self.retry_generation += 1;
        let wakeup = RetryWakeup::new(sender, self.retry_generation);
        self.pending_retry = Some(self.scheduler.schedule(delay, wakeup));
    }

    fn cancel_pending_retry(&mut self) {
        if let Some(mut retry) = self.pending_retry.take() {
            retry.cancel();
            debug!(generation = self.retry_generation, "Cancelled pending retry");
        }
        // Invalidate any wakeup that already fired
        self.retry_generation += 1;
    }

    fn state(&self) -> QueueState {
        if self.draining {
            QueueState::Draining
        } else if !self.is_running() {
            QueueState::Stopped
        } else if self.pending_retry.is_some() {
            QueueState::AwaitingRetry
        } else {
            QueueState::Idle
        }
    }

    fn publish(&self) {
        self.publish_with(|_| {});
    }

    /// Publish the current state together with `update` as one change.
    fn publish_with<F: FnOnce(&mut QueueSnapshot)>(&self, update: F) {
        let state = self.state();
        let attempts = self.retry_attempts;
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.retry_attempts = attempts;
            update(s);
        });
    }
}
