//! Route definitions and handlers for the control surface.

use axum::extract::{Query, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use gatehouse_types::protocol::{CallRequest, CallToolResult, ToolDescriptor};
use gatehouse_types::GatewayError;

use crate::error::HttpError;
use crate::{auth, sse, AppState};

/// Build the full router with the bearer middleware over every endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools/list", get(tools_list))
        .route("/tools/call", post(tools_call))
        .route("/sse", get(sse::connect))
        .route("/mcp/message", post(sse::message))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    upstream: String,
}

async fn tools_list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ToolDescriptor>>, HttpError> {
    let tools = state.manager.list_tools(&query.upstream).await?;
    Ok(Json(tools))
}

#[derive(Debug, Serialize)]
struct CallResponse {
    upstream: String,
    tool: String,
    result: CallToolResult,
}

async fn tools_call(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<CallResponse>, HttpError> {
    let request: CallRequest = serde_json::from_str(&body)
        .map_err(|e| GatewayError::Serialization(format!("invalid payload: {e}")))?;
    debug!(upstream = %request.upstream, tool = %request.tool, "http tool call");

    let result = timeout(
        state.call_timeout,
        state.bridge.call_tool_audited(
            &request.upstream,
            &request.tool,
            request.arguments.clone(),
        ),
    )
    .await
    .map_err(|_| {
        GatewayError::Timeout(format!(
            "tool call timed out after {:?}",
            state.call_timeout
        ))
    })??;

    Ok(Json(CallResponse {
        upstream: request.upstream,
        tool: request.tool,
        result,
    }))
}
