//! Stdio transport: one child process, one JSON-RPC message per line.
//!
//! The child inherits the parent environment, then the upstream's own
//! `KEY=VALUE` entries are applied on top. Stderr is captured line by line
//! and forwarded to the logger, never parsed.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use gatehouse_types::protocol::JsonRpcMessage;
use gatehouse_types::traits::McpTransport;
use gatehouse_types::{GatewayError, UpstreamConfig};

/// How long a closed child gets to exit on its own before it is killed.
const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Line-framed JSON-RPC transport over a spawned child process.
pub struct StdioTransport {
    name: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Lines<BufReader<ChildStdout>>>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Spawn the configured command with piped stdio and start the stderr
    /// forwarding task.
    pub async fn spawn(config: &UpstreamConfig) -> Result<Self, GatewayError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(workdir) = &config.workdir {
            command.current_dir(workdir);
        }
        for (key, value) in config.env_pairs() {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            GatewayError::Startup(format!("spawn '{}' for {}: {e}", config.command, config.name))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::Startup(format!("no stdin pipe for {}", config.name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Startup(format!("no stdout pipe for {}", config.name)))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GatewayError::Startup(format!("no stderr pipe for {}", config.name)))?;

        let name = config.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(upstream = %name, "{line}");
            }
        });

        Ok(Self {
            name: config.name.clone(),
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout).lines()),
            connected: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), GatewayError> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| GatewayError::Upstream(format!("{}: stdin is closed", self.name)))?;
        stdin.write_all(line.as_bytes()).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            GatewayError::Upstream(format!("{}: write: {e}", self.name))
        })?;
        stdin.flush().await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            GatewayError::Upstream(format!("{}: flush: {e}", self.name))
        })
    }

    async fn recv(&self) -> Result<JsonRpcMessage, GatewayError> {
        let mut lines = self.stdout.lock().await;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return serde_json::from_str(trimmed).map_err(|e| {
                        GatewayError::Upstream(format!("{}: non-JSON line on stdout: {e}", self.name))
                    });
                }
                Ok(None) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(GatewayError::Upstream(format!(
                        "{}: child closed stdout",
                        self.name
                    )));
                }
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(GatewayError::Upstream(format!("{}: read: {e}", self.name)));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.connected.store(false, Ordering::SeqCst);

        // Dropping stdin signals EOF, which well-behaved servers treat as
        // a request to exit.
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(upstream = %self.name, %status, "child exited");
                }
                Ok(Err(e)) => {
                    warn!(upstream = %self.name, error = %e, "waiting for child failed");
                }
                Err(_) => {
                    warn!(upstream = %self.name, "child did not exit in time, killing it");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
