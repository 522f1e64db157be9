//! Scripted transports and response builders for tests.
//!
//! Downstream crates enable the `test-utils` feature to drive upstreams
//! without spawning real child processes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use gatehouse_types::protocol::{JsonRpcMessage, ResourceDef, ToolDef};
use gatehouse_types::traits::McpTransport;
use gatehouse_types::{GatewayError, UpstreamConfig};

/// A transport that replays pre-programmed responses and records every
/// message sent through it.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<JsonRpcMessage>>,
    sent: Mutex<Vec<JsonRpcMessage>>,
    connected: AtomicBool,
    /// When true, an exhausted script parks `recv` forever instead of
    /// erroring — models a child that never replies.
    hang_when_empty: bool,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<JsonRpcMessage>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            hang_when_empty: false,
        }
    }

    /// Like [`new`](Self::new), but once the script runs out the transport
    /// hangs instead of failing.
    pub fn hanging_after(responses: Vec<JsonRpcMessage>) -> Self {
        Self {
            hang_when_empty: true,
            ..Self::new(responses)
        }
    }

    /// Everything sent so far, in order.
    pub async fn sent(&self) -> Vec<JsonRpcMessage> {
        self.sent.lock().await.clone()
    }

    /// The method names of everything sent so far.
    pub async fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|m| m.method.clone())
            .collect()
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), GatewayError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::Upstream("transport is closed".to_string()));
        }
        self.sent.lock().await.push(message);
        Ok(())
    }

    async fn recv(&self) -> Result<JsonRpcMessage, GatewayError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::Upstream("transport is closed".to_string()));
        }
        let next = self.responses.lock().await.pop_front();
        match next {
            Some(message) => Ok(message),
            None if self.hang_when_empty => std::future::pending().await,
            None => Err(GatewayError::Upstream(
                "no more scripted responses".to_string(),
            )),
        }
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A transport that fails every operation; models a child that could not be
/// reached at all.
pub struct FailingTransport;

#[async_trait]
impl McpTransport for FailingTransport {
    async fn send(&self, _message: JsonRpcMessage) -> Result<(), GatewayError> {
        Err(GatewayError::Upstream("connection refused".to_string()))
    }

    async fn recv(&self) -> Result<JsonRpcMessage, GatewayError> {
        Err(GatewayError::Upstream("connection refused".to_string()))
    }

    async fn close(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }
}

// ── Response builders ─────────────────────────────────────────

pub fn init_response(id: i64) -> JsonRpcMessage {
    JsonRpcMessage::response(
        json!(id),
        json!({
            "protocolVersion": gatehouse_types::protocol::LATEST_PROTOCOL_VERSION,
            "capabilities": {"tools": {}, "resources": {}},
            "serverInfo": {"name": "scripted-server", "version": "1.0"}
        }),
    )
}

pub fn tools_response(id: i64, tools: &[ToolDef]) -> JsonRpcMessage {
    JsonRpcMessage::response(json!(id), json!({ "tools": tools }))
}

pub fn resources_response(id: i64, resources: &[ResourceDef]) -> JsonRpcMessage {
    JsonRpcMessage::response(json!(id), json!({ "resources": resources }))
}

pub fn call_response(id: i64, result: serde_json::Value) -> JsonRpcMessage {
    JsonRpcMessage::response(json!(id), result)
}

pub fn text_call_response(id: i64, text: &str) -> JsonRpcMessage {
    call_response(
        id,
        json!({"content": [{"type": "text", "text": text}], "isError": false}),
    )
}

/// The responses a fresh client consumes during startup: `initialize`,
/// `tools/list`, `resources/list`, with the IDs the client will assign.
pub fn handshake_script(tools: &[ToolDef], resources: &[ResourceDef]) -> Vec<JsonRpcMessage> {
    vec![
        init_response(1),
        tools_response(2, tools),
        resources_response(3, resources),
    ]
}

pub fn tool_def(name: &str) -> ToolDef {
    ToolDef {
        name: name.to_string(),
        title: None,
        description: Some(format!("the {name} tool")),
        input_schema: Some(json!({
            "type": "object",
            "properties": {"text": {"type": "string"}}
        })),
    }
}

pub fn resource_def(uri: &str, name: &str) -> ResourceDef {
    ResourceDef {
        uri: uri.to_string(),
        name: name.to_string(),
        description: None,
        mime_type: Some("text/plain".to_string()),
    }
}

pub fn upstream_config(name: &str, auto_approve: bool) -> UpstreamConfig {
    UpstreamConfig {
        name: name.to_string(),
        command: "/bin/false".to_string(),
        args: Vec::new(),
        workdir: None,
        env: Vec::new(),
        auto_approve,
    }
}
