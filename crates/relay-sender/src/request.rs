//! Request construction.

use crate::{SenderError, SenderResult};
use relay_outbox::Batch;
use serde::Serialize;
use std::collections::BTreeMap;
use url::Url;

/// `{recipient: {device: payload}}`.
pub type ContentMap = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// Request body for `sendToDevice`.
#[derive(Debug, Serialize)]
pub struct SendToDeviceBody {
    pub messages: ContentMap,
}

/// Group a batch's items by recipient and device.
///
/// A later item for the same recipient and device replaces the earlier one.
pub fn build_content_map(batch: &Batch) -> ContentMap {
    let mut messages = ContentMap::new();
    for item in &batch.items {
        messages
            .entry(item.recipient.clone())
            .or_default()
            .insert(item.device.clone(), item.payload.clone());
    }
    messages
}

/// Endpoint for delivering `batch`, with event type and txn id path-encoded.
pub fn send_to_device_url(base_url: &Url, batch: &Batch) -> SenderResult<Url> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| SenderError::CannotBeABase(base_url.to_string()))?
        .pop_if_empty()
        .extend([
            "_matrix",
            "client",
            "v3",
            "sendToDevice",
            batch.event_type.as_str(),
            batch.txn_id.as_str(),
        ]);
    Ok(url)
}
