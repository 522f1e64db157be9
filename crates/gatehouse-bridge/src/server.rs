//! Bridge construction and JSON-RPC dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, error, info, warn};

use gatehouse_types::protocol::{
    CallRequest, CallStatus, CallToolResult, JsonRpcMessage, NewCallRecord, ResourceDef,
    ToolSchema, CLIENT_NAME, CLIENT_VERSION, INTERNAL_ERROR, INVALID_PARAMS,
    LATEST_PROTOCOL_VERSION, METHOD_NOT_FOUND, RESOURCE_NOT_FOUND,
};
use gatehouse_types::traits::AuditSink;
use gatehouse_types::GatewayError;
use gatehouse_upstream::UpstreamManager;

/// One outward tool registered on the bridge.
#[derive(Debug, Clone)]
pub struct BridgeTool {
    /// Fully-qualified outward name, `<upstream>/<tool>`.
    pub name: String,
    /// Which upstream serves it.
    pub upstream: String,
    /// The tool's unprefixed name on that upstream.
    pub tool: String,
    pub description: Option<String>,
    /// Schema in the form the upstream emitted it. Only the structured slot
    /// is ever re-emitted, so the raw alternative cannot coexist with it.
    pub schema: ToolSchema,
}

/// Aggregated MCP server over the manager's catalog union.
pub struct Bridge {
    manager: Arc<UpstreamManager>,
    audit: Arc<dyn AuditSink>,
    tools: Vec<BridgeTool>,
    by_name: HashMap<String, usize>,
    resources: Vec<ResourceDef>,
}

impl Bridge {
    /// Snapshot the manager's catalogs and build the outward registry.
    pub async fn new(
        manager: Arc<UpstreamManager>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, GatewayError> {
        let descriptors = manager.list_tools("").await?;
        let mut tools = Vec::with_capacity(descriptors.len());
        let mut by_name = HashMap::new();
        for descriptor in descriptors {
            let name = descriptor.qualified_name();
            by_name.insert(name.clone(), tools.len());
            tools.push(BridgeTool {
                name,
                upstream: descriptor.upstream,
                tool: descriptor.name,
                description: descriptor.description,
                schema: descriptor.input_schema,
            });
        }

        let resources = manager.list_resources("").await?;

        info!(
            tool_count = tools.len(),
            resource_count = resources.len(),
            "bridge registry built"
        );
        Ok(Self {
            manager,
            audit,
            tools,
            by_name,
            resources,
        })
    }

    /// The registered outward tools.
    pub fn tools(&self) -> &[BridgeTool] {
        &self.tools
    }

    /// Call a tool through the manager and write exactly one audit record.
    ///
    /// The write is synchronous on the call path so no record can be lost
    /// to a crash after the response is sent; sink failures are logged and
    /// never propagated.
    pub async fn call_tool_audited(
        &self,
        upstream: &str,
        tool: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult, GatewayError> {
        let start = Instant::now();
        let arguments_json = arguments
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "{}".to_string());

        let result = self
            .manager
            .call_tool(&CallRequest {
                upstream: upstream.to_string(),
                tool: tool.to_string(),
                arguments,
            })
            .await;

        // Sub-millisecond calls still get a visible duration.
        let duration_ms = (start.elapsed().as_millis() as i64).max(1);
        let (status, error) = match &result {
            Ok(_) => (CallStatus::Success, String::new()),
            Err(e) => (CallStatus::Error, e.to_string()),
        };
        if let Err(e) = self
            .audit
            .record_call(NewCallRecord {
                upstream: upstream.to_string(),
                tool: tool.to_string(),
                arguments: arguments_json,
                status,
                error,
                duration_ms,
            })
            .await
        {
            error!(error = %e, "failed to write audit record");
        }

        result
    }

    /// Dispatch one inbound JSON-RPC message. Returns `None` for
    /// notifications and for messages that are not requests.
    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        let method = message.method.clone()?;
        if message.is_notification() {
            debug!(method = %method, "notification accepted");
            return None;
        }
        let id = message.id.clone().unwrap_or(serde_json::Value::Null);

        let response = match method.as_str() {
            "initialize" => JsonRpcMessage::response(
                id,
                json!({
                    "protocolVersion": LATEST_PROTOCOL_VERSION,
                    "capabilities": {"tools": {}, "resources": {}},
                    "serverInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION},
                }),
            ),
            "ping" => JsonRpcMessage::response(id, json!({})),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, message.params).await,
            "resources/list" => self.handle_resources_list(id),
            "resources/read" => self.handle_resources_read(id, message.params).await,
            other => {
                warn!(method = %other, "unknown method");
                JsonRpcMessage::error_response(
                    id,
                    METHOD_NOT_FOUND,
                    &format!("method not found: {other}"),
                )
            }
        };
        Some(response)
    }

    fn handle_tools_list(&self, id: serde_json::Value) -> JsonRpcMessage {
        let tools: Vec<serde_json::Value> = self
            .tools
            .iter()
            .map(|tool| {
                let mut entry = json!({"name": tool.name});
                if let Some(description) = &tool.description {
                    entry["description"] = json!(description);
                }
                if let Some(schema) = tool.schema.to_value() {
                    entry["inputSchema"] = schema;
                }
                entry
            })
            .collect();
        JsonRpcMessage::response(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(
        &self,
        id: serde_json::Value,
        params: Option<serde_json::Value>,
    ) -> JsonRpcMessage {
        let Some(params) = params else {
            return JsonRpcMessage::error_response(id, INVALID_PARAMS, "missing params");
        };
        let Some(name) = params.get("name").and_then(serde_json::Value::as_str) else {
            return JsonRpcMessage::error_response(id, INVALID_PARAMS, "missing tool name");
        };
        let arguments = params.get("arguments").cloned();

        let Some(&index) = self.by_name.get(name) else {
            // Unknown tools are a tool-error, not a protocol fault.
            let result = CallToolResult::error(format!("tool {name} not found"));
            return JsonRpcMessage::response(id, serde_json::to_value(result).unwrap_or_default());
        };
        let tool = &self.tools[index];

        let result = match self
            .call_tool_audited(&tool.upstream, &tool.tool, arguments)
            .await
        {
            Ok(result) => result,
            // Failures travel back as well-formed tool results so one
            // misbehaving upstream cannot take down the client session.
            Err(e) => CallToolResult::error(e.to_string()),
        };
        JsonRpcMessage::response(id, serde_json::to_value(result).unwrap_or_default())
    }

    fn handle_resources_list(&self, id: serde_json::Value) -> JsonRpcMessage {
        JsonRpcMessage::response(id, json!({ "resources": self.resources }))
    }

    async fn handle_resources_read(
        &self,
        id: serde_json::Value,
        params: Option<serde_json::Value>,
    ) -> JsonRpcMessage {
        let uri = params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(serde_json::Value::as_str);
        let Some(uri) = uri else {
            return JsonRpcMessage::error_response(id, INVALID_PARAMS, "missing uri");
        };
        // Unlike tools/call, resources/read has no result-level error slot,
        // so failures travel as protocol errors. Unknown URIs get the
        // dedicated code; everything else is an internal error.
        match self.manager.read_resource(uri).await {
            Ok(result) => JsonRpcMessage::response(id, result),
            Err(GatewayError::NotFound(message)) => {
                JsonRpcMessage::error_response(id, RESOURCE_NOT_FOUND, &message)
            }
            Err(e) => JsonRpcMessage::error_response(id, INTERNAL_ERROR, &e.to_string()),
        }
    }
}
