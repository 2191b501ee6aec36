//! Outbound batch model and chunking.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum items per batch.
pub const MAX_BATCH_SIZE: usize = 20;

/// A single outbound message addressed to one device of one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundItem {
    /// Recipient (user) identifier.
    pub recipient: String,
    /// Sub-recipient (device) identifier.
    pub device: String,
    /// Opaque message content.
    pub payload: serde_json::Value,
}

impl OutboundItem {
    pub fn new(
        recipient: impl Into<String>,
        device: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            device: device.into(),
            payload,
        }
    }
}

/// A bounded group of items sharing an event type and transaction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Opaque event type tag.
    pub event_type: String,
    /// Transaction id, unique per batch.
    pub txn_id: String,
    /// Items in delivery order.
    pub items: Vec<OutboundItem>,
}

/// Store-assigned identifier; ascending ids are delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: EntryId,
    pub batch: Batch,
}

/// Generates `m{millis}.{counter}` transaction ids.
#[derive(Debug, Default)]
pub struct TxnIdGenerator {
    counter: AtomicU64,
}

impl TxnIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next transaction id. The counter keeps ids unique within a millisecond.
    pub fn next_id(&self) -> String {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("m{}.{}", Utc::now().timestamp_millis(), counter)
    }
}

/// Split `items` into batches of at most [`MAX_BATCH_SIZE`], preserving order.
///
/// Each batch gets a fresh transaction id. Empty input yields no batches.
pub fn split_into_batches(
    event_type: &str,
    items: &[OutboundItem],
    txn_ids: &TxnIdGenerator,
) -> Vec<Batch> {
    items
        .chunks(MAX_BATCH_SIZE)
        .map(|chunk| Batch {
            event_type: event_type.to_string(),
            txn_id: txn_ids.next_id(),
            items: chunk.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn items(count: usize) -> Vec<OutboundItem> {
        (0..count)
            .map(|i| {
                OutboundItem::new(
                    format!("@user{}:example.org", i % 3),
                    format!("DEVICE{}", i),
                    json!({ "n": i }),
                )
            })
            .collect()
    }

    #[test]
    fn test_split_preserves_order_and_caps_size() {
        let all = items(45);
        let batches = split_into_batches("m.room_key", &all, &TxnIdGenerator::new());

        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(|b| b.items.len()).collect::<Vec<_>>(),
            vec![20, 20, 5]
        );

        let rejoined: Vec<OutboundItem> = batches.into_iter().flat_map(|b| b.items).collect();
        assert_eq!(rejoined, all);
    }

    #[test]
    fn test_split_exact_multiple() {
        let batches = split_into_batches("m.dummy", &items(40), &TxnIdGenerator::new());
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.items.len() == MAX_BATCH_SIZE));
    }

    #[test]
    fn test_split_small_and_empty() {
        let txn_ids = TxnIdGenerator::new();
        assert!(split_into_batches("m.dummy", &[], &txn_ids).is_empty());

        let batches = split_into_batches("m.dummy", &items(1), &txn_ids);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].event_type, "m.dummy");
        assert_eq!(batches[0].items.len(), 1);
    }

    #[test]
    fn test_each_batch_gets_unique_txn_id() {
        let batches = split_into_batches("m.room_key", &items(100), &TxnIdGenerator::new());
        let ids: HashSet<_> = batches.iter().map(|b| b.txn_id.clone()).collect();
        assert_eq!(ids.len(), batches.len());
    }

    #[test]
    fn test_txn_id_format() {
        let txn_ids = TxnIdGenerator::new();
        let first = txn_ids.next_id();
        let second = txn_ids.next_id();

        assert!(first.starts_with('m'));
        assert!(first.ends_with(".0"));
        assert!(second.ends_with(".1"));
    }

    #[test]
    fn test_entry_id_display_and_order() {
        assert_eq!(EntryId(42).to_string(), "42");
        assert!(EntryId(1) < EntryId(2));
    }
}
