//! Retry scheduling.
//!
//! The queue never calls itself back. It hands the scheduler a
//! [`RetryWakeup`] that, when fired, posts a message to the queue's drain
//! task. Each wakeup carries the generation it was scheduled under; the
//! drain task ignores wakeups whose generation has been superseded, so a
//! cancelled retry can never start a drain even if its timer already fired.

use crate::queue::Command;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// One-shot token that re-enters the drain loop when fired.
#[derive(Debug)]
pub struct RetryWakeup {
    sender: mpsc::UnboundedSender<Command>,
    generation: u64,
}

impl RetryWakeup {
    pub(crate) fn new(sender: mpsc::UnboundedSender<Command>, generation: u64) -> Self {
        Self { sender, generation }
    }

    /// Generation this wakeup was scheduled under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver the wakeup. Returns false if the queue has shut down.
    pub fn fire(self) -> bool {
        self.sender.send(Command::RetryDue(self.generation)).is_ok()
    }
}

/// Handle to a pending retry.
pub trait ScheduledRetry: Send {
    /// Prevent the wakeup from firing. Idempotent.
    fn cancel(&mut self);
}

/// Environment-provided timer.
pub trait RetryScheduler: Send + Sync {
    /// Fire `wakeup` after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, wakeup: RetryWakeup) -> Box<dyn ScheduledRetry>;
}

/// Scheduler backed by `tokio::time::sleep` on a spawned task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

struct TokioRetry {
    handle: JoinHandle<()>,
}

impl ScheduledRetry for TokioRetry {
    fn cancel(&mut self) {
        self.handle.abort();
    }
}

impl RetryScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, wakeup: RetryWakeup) -> Box<dyn ScheduledRetry> {
        let generation = wakeup.generation();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !wakeup.fire() {
                debug!(generation, "Retry fired after queue shut down");
            }
        });
        Box::new(TokioRetry { handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _retry = TokioScheduler.schedule(Duration::from_secs(2), RetryWakeup::new(tx, 7));

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(2)).await;
        match rx.recv().await {
            Some(Command::RetryDue(generation)) => assert_eq!(generation, 7),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut retry = TokioScheduler.schedule(Duration::from_secs(2), RetryWakeup::new(tx, 1));

        retry.cancel();
        retry.cancel();
        tokio::time::advance(Duration::from_secs(10)).await;

        // The aborted task dropped the only sender
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_fire_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!RetryWakeup::new(tx, 3).fire());
    }
}
