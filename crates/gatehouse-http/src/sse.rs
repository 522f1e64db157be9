//! SSE mount of the MCP bridge.
//!
//! `GET /sse` opens a session and streams bridge responses; `POST
//! /mcp/message?sessionId=<id>` is the return channel. The first event on
//! every stream is an `endpoint` frame carrying the message URL.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use gatehouse_types::protocol::JsonRpcMessage;
use gatehouse_types::GatewayError;

use crate::error::HttpError;
use crate::AppState;

/// Live SSE sessions, keyed by session ID.
pub struct SseSessions {
    inner: Mutex<HashMap<String, mpsc::UnboundedSender<JsonRpcMessage>>>,
}

impl SseSessions {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    async fn insert(&self, id: String, tx: mpsc::UnboundedSender<JsonRpcMessage>) {
        self.inner.lock().await.insert(id, tx);
    }

    async fn get(&self, id: &str) -> Option<mpsc::UnboundedSender<JsonRpcMessage>> {
        self.inner.lock().await.get(id).cloned()
    }

    async fn remove(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }
}

impl Default for SseSessions {
    fn default() -> Self {
        Self::new()
    }
}

/// Open an SSE session. The endpoint frame tells the client where to post
/// its JSON-RPC messages.
pub async fn connect(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    state.sessions.insert(session_id.clone(), tx).await;
    info!(session = %session_id, "sse session opened");

    let endpoint = format!(
        "http://localhost:{}/mcp/message?sessionId={}",
        state.port, session_id
    );
    let endpoint_frame =
        stream::once(async move { Ok(Event::default().event("endpoint").data(endpoint)) });
    let responses = UnboundedReceiverStream::new(rx).map(|message| {
        Ok(Event::default()
            .event("message")
            .data(serde_json::to_string(&message).unwrap_or_default()))
    });

    Sse::new(endpoint_frame.chain(responses)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(25))
            .text("ping"),
    )
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Return channel: route one JSON-RPC message through the bridge and queue
/// the response on the session's stream.
pub async fn message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Result<StatusCode, HttpError> {
    let inbound: JsonRpcMessage = serde_json::from_str(&body)
        .map_err(|e| GatewayError::Serialization(format!("invalid message: {e}")))?;

    let Some(tx) = state.sessions.get(&query.session_id).await else {
        return Err(GatewayError::NotFound(format!(
            "session {} not found",
            query.session_id
        ))
        .into());
    };

    if let Some(response) = state.bridge.handle_message(inbound).await {
        if tx.send(response).is_err() {
            // The client hung up; drop the dead session.
            debug!(session = %query.session_id, "sse session is gone, removing");
            state.sessions.remove(&query.session_id).await;
            return Err(GatewayError::NotFound(format!(
                "session {} is gone",
                query.session_id
            ))
            .into());
        }
    }

    Ok(StatusCode::ACCEPTED)
}
