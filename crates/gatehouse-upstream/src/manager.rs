//! The upstream collection: catalog union and dispatch.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::transport::StdioTransport;
use crate::upstream::{Timeouts, Upstream};
use gatehouse_types::protocol::{CallRequest, CallToolResult, ResourceDef, ToolDescriptor, ToolSchema};
use gatehouse_types::traits::{ApprovalInterceptor, McpTransport};
use gatehouse_types::{GatewayConfig, GatewayError, UpstreamConfig};

/// Future returned by a transport factory.
pub type TransportFuture =
    Pin<Box<dyn Future<Output = Result<Arc<dyn McpTransport>, GatewayError>> + Send>>;

/// Builds the transport for one upstream. The default factory spawns the
/// configured command over stdio; tests substitute scripted transports.
pub type TransportFactory = Box<dyn Fn(&UpstreamConfig) -> TransportFuture + Send + Sync>;

fn stdio_factory() -> TransportFactory {
    Box::new(|config| {
        let config = config.clone();
        Box::pin(async move {
            let transport = StdioTransport::spawn(&config).await?;
            Ok(Arc::new(transport) as Arc<dyn McpTransport>)
        })
    })
}

/// Owns every upstream runtime behind a single read/write lock.
///
/// The lock protects the map only and is never held across a subprocess
/// call: dispatch clones the runtime handle under the read lock, releases
/// it, then issues the remote call.
pub struct UpstreamManager {
    upstreams: RwLock<HashMap<String, Arc<Upstream>>>,
    interceptor: RwLock<Option<Arc<dyn ApprovalInterceptor>>>,
    timeouts: Timeouts,
    factory: TransportFactory,
}

impl UpstreamManager {
    pub fn new() -> Self {
        Self::with_timeouts(Timeouts::default())
    }

    pub fn with_timeouts(timeouts: Timeouts) -> Self {
        Self::with_transport_factory(timeouts, stdio_factory())
    }

    /// Build a manager whose upstreams connect through `factory` instead of
    /// spawning child processes.
    pub fn with_transport_factory(timeouts: Timeouts, factory: TransportFactory) -> Self {
        Self {
            upstreams: RwLock::new(HashMap::new()),
            interceptor: RwLock::new(None),
            timeouts,
            factory,
        }
    }

    /// Install the approval callback. Zero or one interceptor is active.
    pub async fn set_interceptor(&self, interceptor: Arc<dyn ApprovalInterceptor>) {
        *self.interceptor.write().await = Some(interceptor);
    }

    /// Sequentially start every configured upstream. The first failure
    /// tears down everything started so far and is returned.
    pub async fn start_all(&self, config: &GatewayConfig) -> Result<(), GatewayError> {
        for upstream_config in &config.upstreams {
            info!(upstream = %upstream_config.name, command = %upstream_config.command, "starting upstream");
            let started = async {
                let transport = (self.factory)(upstream_config).await?;
                Upstream::start_with_transport(upstream_config.clone(), transport, &self.timeouts)
                    .await
            }
            .await;

            match started {
                Ok(upstream) => {
                    self.upstreams
                        .write()
                        .await
                        .insert(upstream_config.name.clone(), upstream);
                }
                Err(e) => {
                    error!(upstream = %upstream_config.name, error = %e, "startup failed, rolling back");
                    self.stop_all().await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Close every upstream and clear the map. Idempotent.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, Arc<Upstream>)> =
            self.upstreams.write().await.drain().collect();
        for (name, upstream) in drained {
            debug!(upstream = %name, "closing upstream");
            upstream.close().await;
        }
    }

    /// Names of all running upstreams.
    pub async fn names(&self) -> Vec<String> {
        self.upstreams.read().await.keys().cloned().collect()
    }

    /// Aggregate tools across upstreams. A non-empty `filter` restricts the
    /// listing to that upstream and fails with `NotFound` when unknown.
    /// Order across upstreams is unspecified; within one upstream the
    /// child's order is preserved.
    pub async fn list_tools(&self, filter: &str) -> Result<Vec<ToolDescriptor>, GatewayError> {
        let upstreams = self.upstreams.read().await;
        if !filter.is_empty() && !upstreams.contains_key(filter) {
            return Err(GatewayError::NotFound(format!(
                "upstream {filter} not found"
            )));
        }

        let mut result = Vec::new();
        for (name, upstream) in upstreams.iter() {
            if !filter.is_empty() && name != filter {
                continue;
            }
            for tool in upstream.tools().await {
                let title = tool.title.clone().unwrap_or_else(|| tool.name.clone());
                result.push(ToolDescriptor {
                    upstream: name.clone(),
                    name: tool.name,
                    title: Some(title),
                    description: tool.description,
                    input_schema: ToolSchema::from_value(tool.input_schema),
                });
            }
        }
        Ok(result)
    }

    /// Aggregate resources across upstreams. URIs are globally unique:
    /// collisions keep the first-seen entry and drop the rest with a
    /// warning.
    pub async fn list_resources(&self, filter: &str) -> Result<Vec<ResourceDef>, GatewayError> {
        let upstreams = self.upstreams.read().await;
        if !filter.is_empty() && !upstreams.contains_key(filter) {
            return Err(GatewayError::NotFound(format!(
                "upstream {filter} not found"
            )));
        }

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for (name, upstream) in upstreams.iter() {
            if !filter.is_empty() && name != filter {
                continue;
            }
            for resource in upstream.resources().await {
                if !seen.insert(resource.uri.clone()) {
                    warn!(
                        upstream = %name,
                        uri = %resource.uri,
                        "duplicate resource uri, keeping first-seen entry"
                    );
                    continue;
                }
                result.push(resource);
            }
        }
        Ok(result)
    }

    /// Dispatch one tool call: look up the upstream, consult the approval
    /// gate, and forward under the per-call deadline.
    pub async fn call_tool(&self, request: &CallRequest) -> Result<CallToolResult, GatewayError> {
        let upstream = self
            .upstreams
            .read()
            .await
            .get(&request.upstream)
            .cloned()
            .ok_or_else(|| {
                GatewayError::NotFound(format!("upstream {} not found", request.upstream))
            })?;

        info!(upstream = %request.upstream, tool = %request.tool, "processing tool call");

        if !upstream.auto_approve() {
            let interceptor = self.interceptor.read().await.clone();
            if let Some(interceptor) = interceptor {
                let arguments = request
                    .arguments
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "{}".to_string());
                if !interceptor
                    .approve(&request.upstream, &request.tool, &arguments)
                    .await
                {
                    warn!(upstream = %request.upstream, tool = %request.tool, "tool call denied");
                    return Err(GatewayError::Denied("operation denied by user".to_string()));
                }
            }
        }

        let result = upstream
            .call_tool(&request.tool, request.arguments.clone())
            .await;
        match &result {
            Ok(_) => debug!(upstream = %request.upstream, tool = %request.tool, "tool call completed"),
            Err(e) => warn!(upstream = %request.upstream, tool = %request.tool, error = %e, "tool call failed"),
        }
        result
    }

    /// Resolve a URI to the first upstream that advertises it and forward
    /// `resources/read`.
    pub async fn read_resource(&self, uri: &str) -> Result<serde_json::Value, GatewayError> {
        let owner = {
            let upstreams = self.upstreams.read().await;
            let mut owner = None;
            for upstream in upstreams.values() {
                if upstream.resources().await.iter().any(|r| r.uri == uri) {
                    owner = Some(upstream.clone());
                    break;
                }
            }
            owner
        };

        match owner {
            Some(upstream) => upstream.read_resource(uri).await,
            None => Err(GatewayError::NotFound(format!("resource {uri} not found"))),
        }
    }
}

impl Default for UpstreamManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        handshake_script, resource_def, text_call_response, tool_def, upstream_config,
        FailingTransport, ScriptedTransport,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // ── Test interceptors ─────────────────────────────────────

    struct FixedInterceptor {
        allow: bool,
        invocations: AtomicUsize,
    }

    impl FixedInterceptor {
        fn new(allow: bool) -> Arc<Self> {
            Arc::new(Self {
                allow,
                invocations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ApprovalInterceptor for FixedInterceptor {
        async fn approve(&self, _upstream: &str, _tool: &str, _arguments: &str) -> bool {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.allow
        }
    }

    // ── Helpers ───────────────────────────────────────────────

    /// Build a manager whose factory hands each upstream the next transport
    /// from `transports`, in config order.
    fn manager_with_transports(
        transports: Vec<Arc<dyn McpTransport>>,
        timeouts: Timeouts,
    ) -> UpstreamManager {
        let queue = std::sync::Mutex::new(std::collections::VecDeque::from(transports));
        UpstreamManager::with_transport_factory(
            timeouts,
            Box::new(move |_config| {
                let next = queue.lock().unwrap().pop_front();
                Box::pin(async move {
                    next.ok_or_else(|| GatewayError::Internal("factory exhausted".into()))
                })
            }),
        )
    }

    fn config_with(upstreams: Vec<UpstreamConfig>) -> GatewayConfig {
        GatewayConfig {
            port: 8080,
            auth_token: String::new(),
            upstreams,
        }
    }

    async fn started_manager(
        entries: Vec<(&str, bool, Arc<ScriptedTransport>)>,
    ) -> UpstreamManager {
        let configs = entries
            .iter()
            .map(|(name, auto, _)| upstream_config(name, *auto))
            .collect();
        let transports = entries
            .into_iter()
            .map(|(_, _, t)| t as Arc<dyn McpTransport>)
            .collect();
        let manager = manager_with_transports(transports, Timeouts::default());
        manager.start_all(&config_with(configs)).await.unwrap();
        manager
    }

    // ── Catalog union ─────────────────────────────────────────

    #[tokio::test]
    async fn list_tools_is_union_of_all_upstreams() {
        let a = Arc::new(ScriptedTransport::new(handshake_script(
            &[tool_def("ping"), tool_def("read")],
            &[],
        )));
        let b = Arc::new(ScriptedTransport::new(handshake_script(
            &[tool_def("ping")],
            &[],
        )));
        let manager = started_manager(vec![("a", false, a), ("b", false, b)]).await;

        let tools = manager.list_tools("").await.unwrap();
        let mut qualified: Vec<String> = tools.iter().map(ToolDescriptor::qualified_name).collect();
        qualified.sort();
        assert_eq!(qualified, vec!["a/ping", "a/read", "b/ping"]);
    }

    #[tokio::test]
    async fn list_tools_filter_restricts_and_unknown_fails() {
        let a = Arc::new(ScriptedTransport::new(handshake_script(
            &[tool_def("ping")],
            &[],
        )));
        let manager = started_manager(vec![("a", false, a)]).await;

        let tools = manager.list_tools("a").await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].upstream, "a");
        // Title falls back to the tool name when the child advertises none.
        assert_eq!(tools[0].title.as_deref(), Some("ping"));

        let err = manager.list_tools("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn resource_uri_collisions_keep_first_seen() {
        let a = Arc::new(ScriptedTransport::new(handshake_script(
            &[],
            &[resource_def("file:///motd", "motd-a")],
        )));
        let b = Arc::new(ScriptedTransport::new(handshake_script(
            &[],
            &[
                resource_def("file:///motd", "motd-b"),
                resource_def("file:///other", "other"),
            ],
        )));
        let manager = started_manager(vec![("a", false, a), ("b", false, b)]).await;

        let resources = manager.list_resources("").await.unwrap();
        let uris: HashSet<&str> = resources.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(resources.len(), 2);
        assert!(uris.contains("file:///motd"));
        assert!(uris.contains("file:///other"));
    }

    // ── Dispatch ──────────────────────────────────────────────

    #[tokio::test]
    async fn call_unknown_upstream_is_not_found() {
        let manager = manager_with_transports(Vec::new(), Timeouts::default());
        let err = manager
            .call_tool(&CallRequest {
                upstream: "ghost".into(),
                tool: "t".into(),
                arguments: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn call_forwards_and_returns_raw_result() {
        let mut script = handshake_script(&[tool_def("echo")], &[]);
        script.push(text_call_response(4, "hi"));
        let transport = Arc::new(ScriptedTransport::new(script));
        let manager = started_manager(vec![("echo", false, transport)]).await;

        let result = manager
            .call_tool(&CallRequest {
                upstream: "echo".into(),
                tool: "echo".into(),
                arguments: Some(json!({"text": "hi"})),
            })
            .await
            .unwrap();
        assert_eq!(result.first_text(), Some("hi"));
    }

    // ── Approval gate ─────────────────────────────────────────

    #[tokio::test]
    async fn denied_call_never_reaches_child() {
        let transport = Arc::new(ScriptedTransport::new(handshake_script(
            &[tool_def("delete")],
            &[],
        )));
        let manager = started_manager(vec![("risky", false, transport.clone())]).await;
        let interceptor = FixedInterceptor::new(false);
        manager.set_interceptor(interceptor.clone()).await;

        let err = manager
            .call_tool(&CallRequest {
                upstream: "risky".into(),
                tool: "delete".into(),
                arguments: Some(json!({"path": "/etc"})),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Denied(_)));
        assert_eq!(interceptor.invocations.load(Ordering::SeqCst), 1);
        let methods = transport.sent_methods().await;
        assert!(
            !methods.iter().any(|m| m == "tools/call"),
            "tools/call must not be sent to the child: {methods:?}"
        );
    }

    #[tokio::test]
    async fn auto_approve_bypasses_interceptor() {
        let mut script = handshake_script(&[tool_def("echo")], &[]);
        script.push(text_call_response(4, "ok"));
        let transport = Arc::new(ScriptedTransport::new(script));
        let manager = started_manager(vec![("trusted", true, transport)]).await;

        // A denying interceptor is installed but must be skipped.
        let interceptor = FixedInterceptor::new(false);
        manager.set_interceptor(interceptor.clone()).await;

        let result = manager
            .call_tool(&CallRequest {
                upstream: "trusted".into(),
                tool: "echo".into(),
                arguments: None,
            })
            .await
            .unwrap();
        assert_eq!(result.first_text(), Some("ok"));
        assert_eq!(interceptor.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_interceptor_means_calls_pass() {
        let mut script = handshake_script(&[tool_def("echo")], &[]);
        script.push(text_call_response(4, "ok"));
        let transport = Arc::new(ScriptedTransport::new(script));
        let manager = started_manager(vec![("echo", false, transport)]).await;

        let result = manager
            .call_tool(&CallRequest {
                upstream: "echo".into(),
                tool: "echo".into(),
                arguments: None,
            })
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    // ── Deadlines ─────────────────────────────────────────────

    #[tokio::test]
    async fn unresponsive_child_times_out() {
        let transport = Arc::new(ScriptedTransport::hanging_after(handshake_script(
            &[tool_def("sleep")],
            &[],
        )));
        let timeouts = Timeouts {
            handshake: Duration::from_secs(5),
            call: Duration::from_millis(50),
        };
        let manager = manager_with_transports(vec![transport], timeouts);
        manager
            .start_all(&config_with(vec![upstream_config("slow", true)]))
            .await
            .unwrap();

        let start = std::time::Instant::now();
        let err = manager
            .call_tool(&CallRequest {
                upstream: "slow".into(),
                tool: "sleep".into(),
                arguments: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    // ── Startup rollback ──────────────────────────────────────

    #[tokio::test]
    async fn failed_handshake_rolls_back_started_upstreams() {
        let first = Arc::new(ScriptedTransport::new(handshake_script(
            &[tool_def("ping")],
            &[],
        )));
        let manager = manager_with_transports(
            vec![first.clone(), Arc::new(FailingTransport)],
            Timeouts::default(),
        );

        let err = manager
            .start_all(&config_with(vec![
                upstream_config("a", false),
                upstream_config("b", false),
                upstream_config("c", false),
            ]))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Startup(_)));
        assert!(manager.names().await.is_empty());
        // The first upstream was closed during rollback.
        assert!(!first.is_connected());
    }

    #[tokio::test]
    async fn stop_all_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::new(handshake_script(
            &[tool_def("ping")],
            &[],
        )));
        let manager = started_manager(vec![("a", false, transport.clone())]).await;

        manager.stop_all().await;
        assert!(manager.names().await.is_empty());
        assert!(!transport.is_connected());
        manager.stop_all().await;
    }

    // ── Resources ─────────────────────────────────────────────

    #[tokio::test]
    async fn read_resource_routes_to_owner() {
        let mut script = handshake_script(&[], &[resource_def("file:///motd", "motd")]);
        script.push(crate::testing::call_response(
            4,
            json!({"contents": [{"uri": "file:///motd", "text": "welcome"}]}),
        ));
        let transport = Arc::new(ScriptedTransport::new(script));
        let manager = started_manager(vec![("files", false, transport)]).await;

        let result = manager.read_resource("file:///motd").await.unwrap();
        assert_eq!(result["contents"][0]["text"], "welcome");

        let err = manager.read_resource("file:///nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    // ── Transport failure closes the runtime ──────────────────

    #[tokio::test]
    async fn transport_failure_marks_upstream_closed() {
        // Script ends after the handshake, and the transport is closed
        // under the upstream's feet before the call.
        let transport = Arc::new(ScriptedTransport::new(handshake_script(
            &[tool_def("echo")],
            &[],
        )));
        let manager = started_manager(vec![("echo", true, transport.clone())]).await;

        transport.close().await.unwrap();
        let err = manager
            .call_tool(&CallRequest {
                upstream: "echo".into(),
                tool: "echo".into(),
                arguments: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));

        // Second call is rejected in the CLOSED state without touching the
        // transport again.
        let err = manager
            .call_tool(&CallRequest {
                upstream: "echo".into(),
                tool: "echo".into(),
                arguments: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CLOSED"));
    }
}
