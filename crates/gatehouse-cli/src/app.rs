//! Composition root: wires the sink, queue, manager, bridge, and servers,
//! and owns the ordered teardown.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use gatehouse_approval::{approval_channel, AllowAll, ConsoleApprover};
use gatehouse_audit::SqliteAuditSink;
use gatehouse_bridge::{serve_stdio, Bridge};
use gatehouse_http::HttpState;
use gatehouse_types::traits::AuditSink;
use gatehouse_types::{GatewayConfig, GatewayError};
use gatehouse_upstream::UpstreamManager;

use crate::args::Command;

/// Default audit database location: `~/.gatehouse/audit.db`.
fn audit_db_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".gatehouse").join("audit.db"),
        None => PathBuf::from("./audit.db"),
    }
}

/// Run the gateway until a termination signal arrives.
///
/// Teardown order: the outward surface drains first, then every upstream is
/// stopped, then the audit sink closes.
pub async fn run(config: GatewayConfig, mode: Command) -> Result<(), GatewayError> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let audit: Arc<dyn AuditSink> = Arc::new(SqliteAuditSink::open(&audit_db_path()).await?);

    let manager = Arc::new(UpstreamManager::new());
    if let Err(e) = manager.start_all(&config).await {
        audit.close().await;
        return Err(e);
    }

    let bridge = match Bridge::new(manager.clone(), audit.clone()).await {
        Ok(bridge) => Arc::new(bridge),
        Err(e) => {
            manager.stop_all().await;
            audit.close().await;
            return Err(e);
        }
    };

    let result = match mode {
        Command::Run => {
            let (interceptor, approvals) = approval_channel();
            manager.set_interceptor(Arc::new(interceptor)).await;

            let state = HttpState::new(manager.clone(), bridge.clone(), &config);
            let http = tokio::spawn(gatehouse_http::serve(state, shutdown.clone()));

            // The approver owns the foreground until shutdown.
            ConsoleApprover::new(approvals).run(shutdown.clone()).await;
            shutdown.cancel();

            match http.await {
                Ok(result) => result,
                Err(e) => Err(GatewayError::Internal(format!("http task: {e}"))),
            }
        }
        Command::Headless => {
            manager.set_interceptor(Arc::new(AllowAll)).await;
            let state = HttpState::new(manager.clone(), bridge.clone(), &config);
            gatehouse_http::serve(state, shutdown.clone()).await
        }
        Command::Stdio => {
            // stdin carries protocol traffic, so no prompt is possible.
            manager.set_interceptor(Arc::new(AllowAll)).await;
            serve_stdio(bridge.clone(), shutdown.clone()).await
        }
    };

    manager.stop_all().await;
    audit.close().await;
    info!("gateway stopped");
    result
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received");
}
