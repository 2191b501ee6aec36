//! HTTP transport for the relay outbox.
//!
//! [`HttpTransport`] delivers a batch as one
//! `PUT {base_url}/_matrix/client/v3/sendToDevice/{event_type}/{txn_id}`
//! request and reports failures as classified
//! [`DeliveryError`](relay_outbox::DeliveryError)s.

mod error;
mod request;
mod response;
mod sender;

pub use error::{SenderError, SenderResult};
pub use request::{build_content_map, send_to_device_url, ContentMap, SendToDeviceBody};
pub use response::{error_from_response, error_from_transport, MatrixErrorBody};
pub use sender::{HttpTransport, SenderConfig};
