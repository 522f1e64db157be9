use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Local MCP gateway: multiplexes one client over many stdio tool servers,
/// with approval gating and an audit trail.
#[derive(Debug, Parser)]
#[command(name = "gatehouse", version)]
pub struct Args {
    /// Path to the configuration file
    /// (default: ~/.config/gatehouse/config.yaml).
    #[arg(short, long, global = true, env = "GATEHOUSE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the gateway with the interactive console approver (default).
    Run,
    /// Run without an approver; every call is auto-approved.
    Headless,
    /// Serve the aggregated MCP bridge over stdin/stdout; no HTTP server.
    Stdio,
}

impl Args {
    pub fn mode(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}
