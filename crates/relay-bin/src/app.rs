//! Command implementations.

use relay_config_and_utils::{Config, Paths};
use relay_database::Database;
use relay_outbox::{
    split_into_batches, DeliveryQueue, EntryStore, ExponentialBackoff, OutboundItem,
    QueueOptions, QueueSnapshot, QueueState, TxnIdGenerator,
};
use relay_sender::{HttpTransport, SenderConfig};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Read a JSON array of outbound items.
pub fn read_items(file: &Path) -> AppResult<Vec<OutboundItem>> {
    let content = std::fs::read_to_string(file)?;
    let items: Vec<OutboundItem> = serde_json::from_str(&content)?;
    Ok(items)
}

/// Persist the items in `file` as batches of `event_type`.
pub fn enqueue_file(paths: &Paths, event_type: &str, file: &Path) -> AppResult<usize> {
    let items = read_items(file)?;
    let db = Database::open(&paths.database_file())?;

    let batches = split_into_batches(event_type, &items, &TxnIdGenerator::new());
    db.append_entries(&batches)?;

    info!(
        event_type = %event_type,
        items = items.len(),
        batches = batches.len(),
        "Enqueued items from file"
    );
    Ok(batches.len())
}

/// Queued batch counts, formatted for the terminal.
pub fn status(paths: &Paths) -> AppResult<String> {
    let db = Database::open(&paths.database_file())?;

    let mut out = format!("Pending batches: {}\n", db.count_batches()?);
    for (event_type, count) in db.count_batches_by_event_type()? {
        out.push_str(&format!("  {}: {}\n", event_type, count));
    }
    let quarantined = db.count_quarantined()?;
    if quarantined > 0 {
        out.push_str(&format!("Quarantined batches: {}\n", quarantined));
    }
    Ok(out)
}

/// Why a drain run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainEnd {
    /// Nothing left to deliver.
    Empty,
    /// The head entry exhausted its retries or the store failed.
    Stalled,
    /// Ctrl-C.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub end: DrainEnd,
    pub delivered: u64,
    pub dropped: u64,
    pub remaining: usize,
    pub last_error: Option<String>,
}

impl fmt::Display for DrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = match self.end {
            DrainEnd::Empty => "queue empty",
            DrainEnd::Stalled => "stalled",
            DrainEnd::Interrupted => "interrupted",
        };
        write!(
            f,
            "Drain {}: {} delivered, {} dropped, {} remaining",
            end, self.delivered, self.dropped, self.remaining
        )?;
        if let Some(error) = &self.last_error {
            write!(f, " (last error: {})", error)?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Progress {
    /// A pass is running or a retry is pending.
    Waiting,
    /// A permanent failure was dropped; entries behind it need a new pass.
    Resume,
    Finished,
    Stalled,
}

/// Decide what to do after a drain pass completed.
fn assess(snapshot: &QueueSnapshot, pending: usize, dropped_before: u64) -> Progress {
    match snapshot.state {
        QueueState::Draining | QueueState::AwaitingRetry => Progress::Waiting,
        QueueState::Stopped => Progress::Stalled,
        QueueState::Idle if pending == 0 => Progress::Finished,
        QueueState::Idle if snapshot.dropped > dropped_before => Progress::Resume,
        QueueState::Idle => Progress::Stalled,
    }
}

/// Deliver queued batches until the store is empty, the queue stalls, or Ctrl-C.
pub async fn run_drain(config: &Config, paths: &Paths) -> AppResult<DrainReport> {
    let store = Arc::new(Database::open(&paths.database_file())?);
    let transport = Arc::new(HttpTransport::new(SenderConfig {
        base_url: config.base_url()?.to_string(),
        access_token: config.access_token()?.to_string(),
        timeout_secs: config.request_timeout_secs,
    })?);

    let queue = DeliveryQueue::spawn_with(
        store.clone(),
        transport,
        QueueOptions {
            backoff: Arc::new(ExponentialBackoff::new(config.backoff.clone())),
            ..Default::default()
        },
    );

    info!(pending = store.count_batches()?, base_url = %config.base_url, "Draining outbox");

    let mut updates = queue.subscribe();
    let mut seen_passes = 0;
    let mut dropped_before = 0;
    queue.start()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let end = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("Interrupted, stopping after the in-flight batch");
                break DrainEnd::Interrupted;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break DrainEnd::Stalled;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.passes == seen_passes {
                    continue;
                }
                seen_passes = snapshot.passes;

                match assess(&snapshot, store.count_batches()?, dropped_before) {
                    Progress::Waiting => {}
                    Progress::Resume => {
                        dropped_before = snapshot.dropped;
                        queue.start()?;
                    }
                    Progress::Finished => break DrainEnd::Empty,
                    Progress::Stalled => break DrainEnd::Stalled,
                }
            }
        }
    };

    let snapshot = queue.snapshot();
    queue.shutdown().await;

    Ok(DrainReport {
        end,
        delivered: snapshot.delivered,
        dropped: snapshot.dropped,
        remaining: store.count_batches()?,
        last_error: snapshot.last_error,
    })
}
