/// Unified error type for the gatehouse gateway.
///
/// All crates in the workspace use this error type for propagation across
/// crate boundaries. Internal errors are converted into the appropriate
/// variant at the point where they cross a subsystem boundary.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration file missing/malformed or validation failed. Fatal
    /// before startup.
    #[error("config error: {0}")]
    Config(String),

    /// A child failed to spawn, handshake, or list its tools. Fatal for the
    /// gateway; partial startups are rolled back.
    #[error("startup error: {0}")]
    Startup(String),

    /// Named upstream, tool, resource, or session does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The approval callback returned false.
    #[error("denied: {0}")]
    Denied(String),

    /// A per-call deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A remote call failed: transport error, protocol error, or a non-JSON
    /// response from the child.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Missing or invalid bearer token.
    #[error("unauthorized: {0}")]
    Auth(String),

    /// Error from the audit sink. Logged, never propagated to callers.
    #[error("audit error: {0}")]
    Audit(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}
