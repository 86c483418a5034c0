//! Demo facade: a single `greet` tool.

use async_trait::async_trait;
use serde_json::json;

use crate::protocol::types::{ContentBlock, ToolDescriptor};

use super::errors::ToolError;
use super::registry::{optional_str, ToolHandler, ToolRegistry};
use super::server::ToolServer;

pub const SERVER_NAME: &str = "demo_mcp";

/// Build the demo server's registry.
pub fn registry() -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDescriptor {
            name: "greet".to_string(),
            description: "Responds with a greeting when receiving 'Hi'".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            }),
        },
        GreetTool,
    )?;
    Ok(registry)
}

/// Build the demo server.
pub fn server() -> Result<ToolServer, ToolError> {
    Ok(ToolServer::new(SERVER_NAME, registry()?))
}

/// Answers "Hi" (any case) with "Hello!". Lenient: a missing message is `""`.
struct GreetTool;

#[async_trait]
impl ToolHandler for GreetTool {
    async fn call(&self, arguments: &serde_json::Value) -> Result<Vec<ContentBlock>, ToolError> {
        let message = optional_str(arguments, "message", "").to_lowercase();
        if message == "hi" {
            tracing::info!("received 'Hi', responding with 'Hello'");
            return Ok(vec![ContentBlock::text("Hello!")]);
        }
        tracing::info!(message = %message, "received message");
        Ok(vec![ContentBlock::text(format!(
            "I only respond to 'Hi', but you said: {message}"
        ))])
    }
}
