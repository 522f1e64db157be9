//! Upstream MCP child processes and their manager.
//!
//! One [`Upstream`] owns a single child: the stdio transport, the MCP
//! handshake, and the tool/resource catalogs cached at handshake time. The
//! [`UpstreamManager`] owns the collection, aggregates catalogs, and
//! dispatches calls through the approval gate.

mod client;
mod manager;
mod transport;
mod upstream;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::McpClient;
pub use manager::{TransportFactory, TransportFuture, UpstreamManager};
pub use transport::StdioTransport;
pub use upstream::{Timeouts, Upstream, UpstreamState};
