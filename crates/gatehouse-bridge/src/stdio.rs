//! Serve the bridge over the process's own stdin/stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gatehouse_types::protocol::{JsonRpcMessage, PARSE_ERROR};
use gatehouse_types::GatewayError;

use crate::server::Bridge;

/// Attach the bridge to stdin/stdout, one JSON-RPC message per line, until
/// stdin closes or shutdown is signalled.
pub async fn serve_stdio(bridge: Arc<Bridge>, shutdown: CancellationToken) -> Result<(), GatewayError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                // EOF: the client hung up.
                Ok(None) => break,
                Err(e) => {
                    return Err(GatewayError::Internal(format!("read stdin: {e}")));
                }
            },
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcMessage>(trimmed) {
            Ok(message) => bridge.handle_message(message).await,
            Err(e) => {
                warn!(error = %e, "unparseable line on stdin");
                Some(JsonRpcMessage::error_response(
                    serde_json::Value::Null,
                    PARSE_ERROR,
                    &format!("parse error: {e}"),
                ))
            }
        };

        if let Some(response) = response {
            let mut encoded = serde_json::to_string(&response)?;
            encoded.push('\n');
            stdout
                .write_all(encoded.as_bytes())
                .await
                .map_err(|e| GatewayError::Internal(format!("write stdout: {e}")))?;
            stdout
                .flush()
                .await
                .map_err(|e| GatewayError::Internal(format!("flush stdout: {e}")))?;
        }
    }

    debug!("stdio server stopped");
    Ok(())
}
