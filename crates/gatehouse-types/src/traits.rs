/// Trait contracts for the gatehouse subsystems.
///
/// Modules code against these interfaces, not against each other's concrete
/// types; the composition root wires the implementations together and tests
/// substitute fakes.
use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::protocol::{CallRecord, JsonRpcMessage, NewCallRecord};

/// MCP transport abstraction over a line-framed JSON-RPC connection.
///
/// The production implementation owns a stdio child process; tests use
/// scripted transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send one JSON-RPC message, terminated by a newline.
    async fn send(&self, message: JsonRpcMessage) -> Result<(), GatewayError>;

    /// Receive the next JSON-RPC message. Fails with
    /// [`GatewayError::Upstream`] on transport errors and non-JSON lines.
    async fn recv(&self) -> Result<JsonRpcMessage, GatewayError>;

    /// Close the connection. For a child process this closes stdin and, if
    /// the child does not exit within a short grace window, kills it.
    async fn close(&self) -> Result<(), GatewayError>;

    /// Whether the transport is still usable.
    fn is_connected(&self) -> bool;
}

/// Decides whether a pending tool call may proceed.
///
/// Implementations: the queue-backed interceptor that blocks on the approval
/// channel, and the permissive interceptor that always allows.
#[async_trait]
pub trait ApprovalInterceptor: Send + Sync {
    /// Returns true to allow the call. `arguments` is the call's argument
    /// object serialized to JSON text.
    async fn approve(&self, upstream: &str, tool: &str, arguments: &str) -> bool;
}

/// Append-only audit logging for tool invocations.
///
/// The trail is append-only — no updates or deletes. Sink failures are
/// logged by callers and never propagated into call results.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record.
    async fn record_call(&self, record: NewCallRecord) -> Result<(), GatewayError>;

    /// The most recent records, newest first.
    async fn recent_calls(&self, limit: u32) -> Result<Vec<CallRecord>, GatewayError>;

    /// Flush and release the underlying storage.
    async fn close(&self);
}
