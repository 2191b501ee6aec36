//! Persistence seam for queued batches.

use crate::{Batch, EntryId, QueueEntry, StoreResult};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// FIFO storage for queued batches.
///
/// Implementations must never reorder entries: ids are assigned in append
/// order and `oldest_entry` always returns the lowest remaining id. Durable
/// implementations must survive process restarts.
pub trait EntryStore: Send + Sync {
    /// Persist `batches` as new entries at the tail, atomically.
    fn append_entries(&self, batches: &[Batch]) -> StoreResult<()>;

    /// The entry at the head of the queue, if any.
    fn oldest_entry(&self) -> StoreResult<Option<QueueEntry>>;

    /// Remove an entry. Removing an unknown id is not an error.
    fn remove_entry(&self, id: EntryId) -> StoreResult<()>;

    /// Number of entries still queued.
    fn pending_count(&self) -> StoreResult<usize>;
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: VecDeque<QueueEntry>,
    next_id: i64,
}

/// In-memory store. Not durable; for tests and ephemeral queues.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all queued entries, oldest first.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }
}

impl EntryStore for MemoryStore {
    fn append_entries(&self, batches: &[Batch]) -> StoreResult<()> {
        let mut state = self.state.lock();
        for batch in batches {
            state.next_id += 1;
            let id = EntryId(state.next_id);
            state.entries.push_back(QueueEntry {
                id,
                batch: batch.clone(),
            });
        }
        Ok(())
    }

    fn oldest_entry(&self) -> StoreResult<Option<QueueEntry>> {
        Ok(self.state.lock().entries.front().cloned())
    }

    fn remove_entry(&self, id: EntryId) -> StoreResult<()> {
        self.state.lock().entries.retain(|entry| entry.id != id);
        Ok(())
    }

    fn pending_count(&self) -> StoreResult<usize> {
        Ok(self.state.lock().entries.len())
    }
}
