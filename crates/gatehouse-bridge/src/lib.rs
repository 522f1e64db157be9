//! The aggregated MCP server view over the upstream manager.
//!
//! The bridge registers every upstream tool under `<upstream>/<tool>`,
//! forwards calls through the manager, and writes exactly one audit record
//! per call on the call path. Failures become tool-error results, never
//! broken sessions.

mod server;
mod stdio;

pub use server::{Bridge, BridgeTool};
pub use stdio::serve_stdio;
