//! Tool server error types.

use thiserror::Error;

/// Errors raised by tool handlers and server construction.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments failed the tool's own validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The tool's underlying action failed (network, auth, I/O).
    #[error("{tool} failed: {reason}")]
    Execution { tool: String, reason: String },

    /// A credential required at startup is not set.
    #[error("missing credential: {name} is not set")]
    MissingCredential { name: String },

    /// Two tools with the same name were registered on one server.
    #[error("tool '{name}' is already registered")]
    DuplicateTool { name: String },
}
