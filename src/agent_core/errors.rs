//! Agent Core error types.
//!
//! None of these end the host: oracle failures end one request, and every
//! other kind is rendered into the conversation for the oracle to see.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::protocol::McpError;

/// The decision oracle could not be consulted at all.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("decision oracle unavailable: {reason}")]
    Unavailable { reason: String },
}

/// An oracle decision that cannot be executed as proposed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecisionError {
    /// Unparseable or empty oracle output.
    #[error("malformed decision: {reason}")]
    Malformed { reason: String },

    /// The tool name is not in the merged catalog.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// A bare tool name matches tools on several servers.
    #[error("ambiguous tool '{name}', qualify it as one of: {}", candidates.join(", "))]
    AmbiguousTool {
        name: String,
        candidates: Vec<String>,
    },

    /// Arguments do not satisfy the tool's input schema.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// Failures during one dispatch cycle, rendered as synthetic tool results.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown server: '{server}'")]
    UnknownServer { server: String },

    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    #[error("invalid arguments for '{tool}': {reason}")]
    Validation { tool: String, reason: String },

    #[error("tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// The server is gone for the rest of the session.
    #[error("server '{server}' is unreachable for the rest of this session: {reason}")]
    Transport { server: String, reason: String },

    #[error(transparent)]
    Decision(#[from] DecisionError),
}

impl DispatchError {
    /// Classify an MCP client error for a call to `server`/`tool`.
    pub fn from_mcp(server: &str, tool: &str, error: McpError) -> Self {
        let qualified = format!("{server}.{tool}");
        match error {
            McpError::UnknownServer { name } => DispatchError::UnknownServer { server: name },
            McpError::UnknownTool { name } => DispatchError::UnknownTool { name },
            McpError::InvalidArguments { tool, reason } => DispatchError::Validation { tool, reason },
            McpError::ServerUnavailable { reason, .. } | McpError::TransportError { reason, .. } => {
                DispatchError::Transport {
                    server: server.to_string(),
                    reason,
                }
            }
            other => DispatchError::ToolExecution {
                tool: qualified,
                reason: other.to_string(),
            },
        }
    }
}
