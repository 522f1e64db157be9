/// Wire and catalog types shared across the workspace.
///
/// The gateway speaks JSON-RPC 2.0 in both directions: as a client to each
/// upstream child process and as a server on the aggregated bridge. Framing
/// is one JSON object per line.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON-RPC protocol version marker.
pub const JSONRPC_VERSION: &str = "2.0";

/// Latest MCP protocol revision spoken on both surfaces.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

/// Fixed client identity sent in the `initialize` handshake. The bridge
/// advertises the same pair as its server identity.
pub const CLIENT_NAME: &str = "gomcp-pilot";
pub const CLIENT_VERSION: &str = "0.1.0";

// ============================================================
// JSON-RPC
// ============================================================

/// A JSON-RPC 2.0 message: request, notification, or response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Request ID. Absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Method name, for requests and notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Parameters, for requests and notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Result, for success responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error, for error responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// Build a request with a numeric ID.
    pub fn request(id: i64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(serde_json::Value::from(id)),
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a notification (no ID, no reply expected).
    pub fn notification(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a success response echoing the request's ID.
    pub fn response(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response echoing the request's ID.
    pub fn error_response(id: serde_json::Value, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    /// Numeric ID of this message, if present.
    pub fn id_i64(&self) -> Option<i64> {
        self.id.as_ref().and_then(serde_json::Value::as_i64)
    }

    /// Whether this message is a notification (method without an ID).
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Standard JSON-RPC error codes used by the bridge.
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// MCP-defined code for `resources/read` against an unknown URI.
pub const RESOURCE_NOT_FOUND: i64 = -32002;

// ============================================================
// Catalog types
// ============================================================

/// A tool as advertised by an upstream's `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque JSON Schema, preserved verbatim.
    #[serde(
        default,
        rename = "inputSchema",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<serde_json::Value>,
}

/// A resource as advertised by an upstream's `resources/list`. URIs are
/// globally unique in the aggregated view; first-seen wins on collision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDef {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// An input schema in whichever form the upstream emitted it.
///
/// The structured and raw forms are mutually exclusive by construction; the
/// bridge only ever re-emits the variant it received.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolSchema {
    /// A raw, unparsed schema document.
    Raw(String),
    /// A structured JSON Schema object.
    Object(serde_json::Value),
    /// No schema advertised.
    #[default]
    None,
}

impl ToolSchema {
    pub fn from_value(value: Option<serde_json::Value>) -> Self {
        match value {
            Some(v) => ToolSchema::Object(v),
            None => ToolSchema::None,
        }
    }

    /// Structured JSON form, parsing the raw variant when necessary.
    pub fn to_value(&self) -> Option<serde_json::Value> {
        match self {
            ToolSchema::Object(v) => Some(v.clone()),
            ToolSchema::Raw(s) => serde_json::from_str(s).ok(),
            ToolSchema::None => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ToolSchema::None)
    }
}

/// A tool in the aggregated catalog, as returned to outward clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Which upstream advertises this tool.
    pub upstream: String,
    /// The tool's name on that upstream (unprefixed).
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "ToolSchema::is_none")]
    pub input_schema: ToolSchema,
}

impl ToolDescriptor {
    /// Fully-qualified name in the aggregated view.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.upstream, self.name)
    }
}

// ============================================================
// Calls
// ============================================================

/// A tool invocation against a specific upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub upstream: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// One content item in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CallContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource, preserved opaquely.
    Resource {
        resource: serde_json::Value,
    },
}

/// The MCP tool-result shape: ordered content items plus an error flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<CallContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![CallContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A tool-error result carrying a message. This is a well-formed MCP
    /// response, not a JSON-RPC fault.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![CallContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// The first text content item, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|item| match item {
            CallContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

// ============================================================
// Audit records
// ============================================================

/// Outcome of an audited call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A new audit entry, before the sink assigns ID and timestamp.
#[derive(Debug, Clone)]
pub struct NewCallRecord {
    pub upstream: String,
    pub tool: String,
    /// The call arguments serialized to JSON text.
    pub arguments: String,
    pub status: CallStatus,
    /// Error text; empty on success.
    pub error: String,
    pub duration_ms: i64,
}

/// A stored audit entry. Rows are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub upstream: String,
    pub tool: String,
    pub arguments: String,
    pub status: CallStatus,
    pub error: String,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization_omits_empty_fields() {
        let message = JsonRpcMessage::request(1, "tools/list", None);
        let encoded = serde_json::to_string(&message).unwrap();
        assert!(encoded.contains("\"jsonrpc\":\"2.0\""));
        assert!(encoded.contains("\"method\":\"tools/list\""));
        assert!(!encoded.contains("params"));
        assert!(!encoded.contains("result"));
        assert!(!encoded.contains("error"));
    }

    #[test]
    fn notification_has_no_id() {
        let message = JsonRpcMessage::notification("notifications/initialized", None);
        assert!(message.is_notification());
        let encoded = serde_json::to_string(&message).unwrap();
        assert!(!encoded.contains("\"id\""));
    }

    #[test]
    fn parses_error_response() {
        let raw = r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"no such method"}}"#;
        let message: JsonRpcMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message.id_i64(), Some(7));
        assert_eq!(message.error.as_ref().unwrap().code, METHOD_NOT_FOUND);
    }

    #[test]
    fn call_content_round_trip() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "hi"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"}
            ],
            "isError": false
        });
        let result: CallToolResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.first_text(), Some("hi"));
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 2);
    }

    #[test]
    fn missing_is_error_defaults_false() {
        let result: CallToolResult =
            serde_json::from_value(json!({"content": [{"type": "text", "text": "x"}]})).unwrap();
        assert!(!result.is_error);
    }

    #[test]
    fn schema_preserves_emitted_variant() {
        let object = ToolSchema::from_value(Some(json!({"type": "object"})));
        assert_eq!(object.to_value(), Some(json!({"type": "object"})));

        let raw = ToolSchema::Raw("{\"type\":\"object\"}".to_string());
        assert_eq!(raw.to_value(), Some(json!({"type": "object"})));

        assert!(ToolSchema::from_value(None).is_none());
    }

    #[test]
    fn descriptor_qualified_name() {
        let descriptor = ToolDescriptor {
            upstream: "files".into(),
            name: "read".into(),
            title: None,
            description: None,
            input_schema: ToolSchema::None,
        };
        assert_eq!(descriptor.qualified_name(), "files/read");
    }
}
