//! HTTP transport.

use crate::request::{build_content_map, send_to_device_url, SendToDeviceBody};
use crate::response::{error_from_response, error_from_transport, parse_retry_after_header};
use crate::SenderResult;
use async_trait::async_trait;
use relay_outbox::{Batch, DeliveryError, Transport};
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Homeserver base URL.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub access_token: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8008".to_string(),
            access_token: String::new(),
            timeout_secs: 30,
        }
    }
}

/// [`Transport`] delivering each batch with a single `PUT` request.
///
/// The txn id in the path makes the request idempotent on the server, so a
/// batch redelivered after a lost response is not duplicated.
pub struct HttpTransport {
    base_url: Url,
    access_token: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: SenderConfig) -> SenderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Self::with_client(config, client)
    }

    /// Use a preconfigured client. `config.timeout_secs` is ignored.
    pub fn with_client(config: SenderConfig, client: Client) -> SenderResult<Self> {
        Ok(Self {
            base_url: Url::parse(&config.base_url)?,
            access_token: config.access_token,
            client,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let url = send_to_device_url(&self.base_url, batch)
            .map_err(|e| DeliveryError::Other(e.to_string()))?;
        let body = SendToDeviceBody {
            messages: build_content_map(batch),
        };

        debug!(
            url = %url,
            txn_id = %batch.txn_id,
            recipients = body.messages.len(),
            "Sending to-device batch"
        );

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| error_from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);
        let text = response.text().await.unwrap_or_default();
        let error = error_from_response(status.as_u16(), &text, retry_after);

        warn!(
            txn_id = %batch.txn_id,
            status = status.as_u16(),
            error = %error,
            "To-device batch rejected"
        );
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_outbox::OutboundItem;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn batch() -> Batch {
        Batch {
            event_type: "m.room_key".to_string(),
            txn_id: "m1.0".to_string(),
            items: vec![OutboundItem::new("@a:hs", "DEV", json!({"k": "v"}))],
        }
    }

    /// Accept one request and answer it with `response`. The handle yields the raw request.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (base_url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn transport(base_url: String) -> HttpTransport {
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        HttpTransport::with_client(
            SenderConfig {
                base_url,
                access_token: "syt_token".to_string(),
                timeout_secs: 5,
            },
            client,
        )
        .unwrap()
    }

    #[test]
    fn test_sender_config_default() {
        let config = SenderConfig::default();
        assert_eq!(config.base_url, "http://localhost:8008");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpTransport::new(SenderConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(crate::SenderError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_deliver_success_sends_put() {
        let (base_url, server) =
            serve_once("HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\n\r\n{}")
                .await;

        transport(base_url).deliver(&batch()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /_matrix/client/v3/sendToDevice/m.room_key/m1.0 "));
        assert!(request
            .to_ascii_lowercase()
            .contains("authorization: bearer syt_token"));
        assert!(request.ends_with(r#"{"messages":{"@a:hs":{"DEV":{"k":"v"}}}}"#));
    }

    #[tokio::test]
    async fn test_deliver_maps_rate_limit() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 429 Too Many Requests\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{\"errcode\":\"M_LIMIT_EXCEEDED\",\"error\":\"slow\",\"retry_after_ms\":7}",
        )
        .await;

        let err = transport(base_url).deliver(&batch()).await.unwrap_err();
        server.await.unwrap();

        assert_eq!(err.status(), Some(429));
        assert_eq!(err.code(), Some("M_LIMIT_EXCEEDED"));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(7)));
    }

    #[tokio::test]
    async fn test_deliver_connection_refused_is_network() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport(format!("http://{}", addr))
            .deliver(&batch())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Network(_)), "got {:?}", err);
    }
}
