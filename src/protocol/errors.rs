//! MCP protocol error types.

use thiserror::Error;

/// Errors that can occur while talking to (or managing) a tool server.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// Framing or I/O failure on the transport (peer closed, broken pipe, …).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No server with this id is configured in the session.
    #[error("unknown server: '{name}'")]
    UnknownServer { name: String },

    /// Tool not found in the merged catalog.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A tool call timed out.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// Server became unreachable earlier in the session.
    #[error("server '{name}' is unavailable: {reason}")]
    ServerUnavailable { name: String, reason: String },

    /// Configuration error (missing servers, bad config file).
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl McpError {
    /// Whether this error means the server relationship is over for the session.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, McpError::TransportError { .. })
    }
}
