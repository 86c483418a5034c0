//! Per-server tool registry: static mapping from tool name to schema + handler.
//!
//! Built once at server startup and owned by the `ToolServer`; there is no
//! global registration.

use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::types::{ContentBlock, ToolDescriptor};

use super::errors::ToolError;

// ─── ToolHandler ────────────────────────────────────────────────────────────

/// The callable behind one tool.
///
/// Handlers validate their own arguments and decide their failure policy:
/// return `Err` to fail the call, or `Ok` with a descriptive text block.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: &serde_json::Value) -> Result<Vec<ContentBlock>, ToolError>;
}

// ─── ToolRegistry ───────────────────────────────────────────────────────────

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Ordered set of tools exposed by one server.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique within a server.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: impl ToolHandler + 'static,
    ) -> Result<(), ToolError> {
        if self.tools.iter().any(|t| t.descriptor.name == descriptor.name) {
            return Err(ToolError::DuplicateTool {
                name: descriptor.name,
            });
        }
        self.tools.push(RegisteredTool {
            descriptor,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    /// Look up the handler for a tool.
    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools
            .iter()
            .find(|t| t.descriptor.name == name)
            .map(|t| Arc::clone(&t.handler))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─── Argument Helpers ───────────────────────────────────────────────────────

/// Extract a required string argument.
pub fn required_str<'a>(
    tool: &str,
    arguments: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, ToolError> {
    match arguments.get(field) {
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(other) => Err(ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("'{field}' must be a string, got {other}"),
        }),
        None => Err(ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing required field: '{field}'"),
        }),
    }
}

/// Extract an optional string argument, falling back when absent or not a string.
pub fn optional_str<'a>(arguments: &'a serde_json::Value, field: &str, fallback: &'a str) -> &'a str {
    arguments
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or(fallback)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
