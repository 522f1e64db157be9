//! One upstream child: handshake, cached catalogs, call forwarding.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::client::McpClient;
use crate::transport::StdioTransport;
use gatehouse_types::protocol::{
    CallToolResult, ResourceDef, ToolDef, CLIENT_NAME, CLIENT_VERSION, LATEST_PROTOCOL_VERSION,
};
use gatehouse_types::traits::McpTransport;
use gatehouse_types::{GatewayError, UpstreamConfig};

/// Deadlines for upstream operations. The startup `tools/list` deliberately
/// has no deadline of its own, so a slow catalog does not time out behind
/// the handshake budget.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Bounds the `initialize` exchange.
    pub handshake: Duration,
    /// Bounds each `tools/call` and `resources/read`.
    pub call: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(60),
            call: Duration::from_secs(60),
        }
    }
}

/// Lifecycle of one upstream.
///
/// ```text
/// NEW → STARTING → READY → CLOSED
/// ```
///
/// Calls are legal only in `Ready`. A transport error while `Ready` moves
/// the upstream to `Closed`; there is no recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    /// Child spawned, handshake not yet attempted.
    New,
    /// `initialize` and catalog fetch in progress.
    Starting,
    /// Serving calls.
    Ready,
    /// Transport closed or failed; the child has been signaled to exit.
    Closed,
}

impl std::fmt::Display for UpstreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamState::New => write!(f, "NEW"),
            UpstreamState::Starting => write!(f, "STARTING"),
            UpstreamState::Ready => write!(f, "READY"),
            UpstreamState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A running upstream child with its cached catalogs.
pub struct Upstream {
    config: UpstreamConfig,
    client: McpClient,
    state: RwLock<UpstreamState>,
    tools: RwLock<Vec<ToolDef>>,
    resources: RwLock<Vec<ResourceDef>>,
    call_timeout: Duration,
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("config", &self.config)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl Upstream {
    /// Spawn the configured child and drive it to `Ready`.
    pub async fn start(
        config: UpstreamConfig,
        timeouts: &Timeouts,
    ) -> Result<Arc<Self>, GatewayError> {
        let transport = Arc::new(StdioTransport::spawn(&config).await?);
        Self::start_with_transport(config, transport, timeouts).await
    }

    /// Drive an already-connected transport through the handshake. Exposed
    /// so embedders and tests can supply their own transports.
    pub async fn start_with_transport(
        config: UpstreamConfig,
        transport: Arc<dyn McpTransport>,
        timeouts: &Timeouts,
    ) -> Result<Arc<Self>, GatewayError> {
        let upstream = Arc::new(Self {
            config,
            client: McpClient::new(transport),
            state: RwLock::new(UpstreamState::New),
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            call_timeout: timeouts.call,
        });
        upstream.handshake(timeouts.handshake).await?;
        Ok(upstream)
    }

    async fn handshake(&self, deadline: Duration) -> Result<(), GatewayError> {
        *self.state.write().await = UpstreamState::Starting;
        let name = self.name().to_string();

        let init = self.client.request(
            "initialize",
            Some(json!({
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION},
            })),
        );
        match timeout(deadline, init).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                self.close().await;
                return Err(GatewayError::Startup(format!("initialize {name}: {e}")));
            }
            Err(_) => {
                self.close().await;
                return Err(GatewayError::Startup(format!(
                    "initialize {name}: handshake timed out after {deadline:?}"
                )));
            }
        }

        if let Err(e) = self.client.notify("notifications/initialized", None).await {
            self.close().await;
            return Err(GatewayError::Startup(format!(
                "initialized notification for {name}: {e}"
            )));
        }

        let tools = match self.client.request("tools/list", Some(json!({}))).await {
            Ok(result) => match parse_tools(&result) {
                Ok(tools) => tools,
                Err(e) => {
                    self.close().await;
                    return Err(GatewayError::Startup(format!("list tools for {name}: {e}")));
                }
            },
            Err(e) => {
                self.close().await;
                return Err(GatewayError::Startup(format!("list tools for {name}: {e}")));
            }
        };

        // A server without resources is common; failure here is non-fatal.
        let resources = match self.client.request("resources/list", Some(json!({}))).await {
            Ok(result) => parse_resources(&result).unwrap_or_else(|e| {
                warn!(upstream = %name, error = %e, "malformed resources/list, continuing without resources");
                Vec::new()
            }),
            Err(e) => {
                warn!(upstream = %name, error = %e, "resources/list failed, continuing without resources");
                Vec::new()
            }
        };

        info!(
            upstream = %name,
            tool_count = tools.len(),
            resource_count = resources.len(),
            "upstream ready"
        );
        *self.tools.write().await = tools;
        *self.resources.write().await = resources;
        *self.state.write().await = UpstreamState::Ready;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn auto_approve(&self) -> bool {
        self.config.auto_approve
    }

    pub async fn state(&self) -> UpstreamState {
        *self.state.read().await
    }

    /// The tool list cached at handshake time. Never re-queries the child.
    pub async fn tools(&self) -> Vec<ToolDef> {
        self.tools.read().await.clone()
    }

    /// The resource list cached at handshake time.
    pub async fn resources(&self) -> Vec<ResourceDef> {
        self.resources.read().await.clone()
    }

    /// Forward one `tools/call` under the per-call deadline.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult, GatewayError> {
        {
            let state = *self.state.read().await;
            if state != UpstreamState::Ready {
                return Err(GatewayError::Upstream(format!(
                    "upstream {} is {state}, cannot call tools",
                    self.name()
                )));
            }
        }

        let params = json!({
            "name": tool,
            "arguments": arguments.unwrap_or_else(|| json!({})),
        });
        let result = match timeout(
            self.call_timeout,
            self.client.request("tools/call", Some(params)),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.close_if_disconnected().await;
                return Err(e);
            }
            Err(_) => {
                return Err(GatewayError::Timeout(format!(
                    "tools/call {}/{tool} timed out after {:?}",
                    self.name(),
                    self.call_timeout
                )));
            }
        };

        serde_json::from_value(result).map_err(|e| {
            GatewayError::Upstream(format!("malformed tool result from {}: {e}", self.name()))
        })
    }

    /// Forward one `resources/read` under the per-call deadline. Returns
    /// the raw result object.
    pub async fn read_resource(&self, uri: &str) -> Result<serde_json::Value, GatewayError> {
        {
            let state = *self.state.read().await;
            if state != UpstreamState::Ready {
                return Err(GatewayError::Upstream(format!(
                    "upstream {} is {state}, cannot read resources",
                    self.name()
                )));
            }
        }

        match timeout(
            self.call_timeout,
            self.client
                .request("resources/read", Some(json!({ "uri": uri }))),
        )
        .await
        {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                self.close_if_disconnected().await;
                Err(e)
            }
            Err(_) => Err(GatewayError::Timeout(format!(
                "resources/read {uri} timed out after {:?}",
                self.call_timeout
            ))),
        }
    }

    async fn close_if_disconnected(&self) {
        if !self.client.is_connected() {
            warn!(upstream = %self.name(), "transport failed, upstream is now CLOSED");
            *self.state.write().await = UpstreamState::Closed;
        }
    }

    /// Close the transport; the child gets a grace window, then is killed.
    pub async fn close(&self) {
        *self.state.write().await = UpstreamState::Closed;
        let _ = self.client.close().await;
    }
}

fn parse_tools(result: &serde_json::Value) -> Result<Vec<ToolDef>, GatewayError> {
    let tools = result
        .get("tools")
        .ok_or_else(|| GatewayError::Upstream("tools/list result has no 'tools' field".into()))?;
    serde_json::from_value(tools.clone())
        .map_err(|e| GatewayError::Upstream(format!("malformed tools list: {e}")))
}

fn parse_resources(result: &serde_json::Value) -> Result<Vec<ResourceDef>, GatewayError> {
    let resources = result.get("resources").ok_or_else(|| {
        GatewayError::Upstream("resources/list result has no 'resources' field".into())
    })?;
    serde_json::from_value(resources.clone())
        .map_err(|e| GatewayError::Upstream(format!("malformed resources list: {e}")))
}
