//! JSON-RPC request/response client over an [`McpTransport`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use gatehouse_types::protocol::JsonRpcMessage;
use gatehouse_types::traits::McpTransport;
use gatehouse_types::GatewayError;

/// Issues requests with monotonically increasing IDs and matches responses
/// back to them.
///
/// One request is in flight per connection at a time; concurrent callers
/// queue on the internal lock. While waiting for a response, messages that
/// are notifications or that carry a stale ID (left behind by an abandoned
/// call) are skipped.
pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    next_id: AtomicI64,
    in_flight: Mutex<()>,
}

impl McpClient {
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicI64::new(1),
            in_flight: Mutex::new(()),
        }
    }

    /// Send a request and wait for its response. Returns the `result` value
    /// or [`GatewayError::Upstream`] for error responses and transport
    /// failures.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let _guard = self.in_flight.lock().await;

        self.transport
            .send(JsonRpcMessage::request(id, method, params))
            .await?;

        loop {
            let message = self.transport.recv().await?;
            match message.id_i64() {
                Some(got) if got == id => {
                    if let Some(error) = message.error {
                        return Err(GatewayError::Upstream(format!(
                            "{method} failed: {} (code {})",
                            error.message, error.code
                        )));
                    }
                    return message.result.ok_or_else(|| {
                        GatewayError::Upstream(format!("{method} response has no result"))
                    });
                }
                Some(got) => {
                    debug!(expected = id, got, "skipping response with stale id");
                }
                None => {
                    debug!(method = ?message.method, "skipping server-initiated message");
                }
            }
        }
    }

    /// Send a notification; no reply is expected.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        self.transport
            .send(JsonRpcMessage::notification(method, params))
            .await
    }

    pub async fn close(&self) -> Result<(), GatewayError> {
        self.transport.close().await
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}
