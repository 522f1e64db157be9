//! The HTTP control surface and the SSE mount of the bridge.
//!
//! Endpoints: `/health`, `/tools/list`, `/tools/call`, `/sse` and
//! `/mcp/message`. Every endpoint sits behind the shared bearer-token
//! middleware; an empty token disables authentication.

mod auth;
mod error;
mod routes;
mod sse;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gatehouse_bridge::Bridge;
use gatehouse_types::{GatewayConfig, GatewayError};
use gatehouse_upstream::UpstreamManager;

pub use error::HttpError;
pub use routes::router;

/// Outer deadline for `/tools/call`; the manager's own per-call deadline is
/// the inner bound.
const HTTP_CALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Shared state behind every handler.
pub struct HttpState {
    pub manager: Arc<UpstreamManager>,
    pub bridge: Arc<Bridge>,
    pub auth_token: String,
    pub port: u16,
    pub call_timeout: Duration,
    pub(crate) sessions: sse::SseSessions,
}

pub type AppState = Arc<HttpState>;

impl HttpState {
    pub fn new(
        manager: Arc<UpstreamManager>,
        bridge: Arc<Bridge>,
        config: &GatewayConfig,
    ) -> AppState {
        Arc::new(Self {
            manager,
            bridge,
            auth_token: config.auth_token.clone(),
            port: config.port,
            call_timeout: HTTP_CALL_TIMEOUT,
            sessions: sse::SseSessions::new(),
        })
    }

    /// Shrink the outer call deadline; used by tests.
    pub fn with_call_timeout(
        manager: Arc<UpstreamManager>,
        bridge: Arc<Bridge>,
        config: &GatewayConfig,
        call_timeout: Duration,
    ) -> AppState {
        Arc::new(Self {
            manager,
            bridge,
            auth_token: config.auth_token.clone(),
            port: config.port,
            call_timeout,
            sessions: sse::SseSessions::new(),
        })
    }
}

/// Bind the configured port and serve until shutdown. In-flight requests
/// drain without a grace deadline.
pub async fn serve(state: AppState, shutdown: CancellationToken) -> Result<(), GatewayError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Startup(format!("bind {addr}: {e}")))?;
    info!(%addr, "http server listening");
    serve_on(listener, state, shutdown).await
}

/// Serve on an already-bound listener. Exposed so tests can bind an
/// ephemeral port first.
pub async fn serve_on(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), GatewayError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| GatewayError::Internal(format!("http server: {e}")))
}
