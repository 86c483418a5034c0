//! ToolServer: answers `tools/list` and `tools/call` over one transport.
//!
//! The server holds no per-call state beyond its static registry. Requests
//! are handled strictly one at a time, in arrival order.

use std::time::Instant;

use serde_json::json;

use crate::protocol::transport::{stdio_transport, Transport};
use crate::protocol::types::{
    error_codes, methods, CallToolResult, ContentBlock, JsonRpcRequest, JsonRpcResponse,
    ToolDescriptor, PROTOCOL_VERSION,
};

use super::errors::ToolError;
use super::registry::ToolRegistry;

/// Text returned for calls naming a tool this server does not have.
pub const UNKNOWN_TOOL_TEXT: &str = "Unknown tool";

/// A tool server bound to one registry.
pub struct ToolServer {
    name: String,
    version: String,
    registry: ToolRegistry,
}

impl ToolServer {
    /// Create a server around a fully built registry.
    pub fn new(name: &str, registry: ToolRegistry) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ─── Operations ─────────────────────────────────────────────────────

    /// Enumerate the tools. Pure and stable for the server's lifetime.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        tracing::debug!(server = %self.name, count = self.registry.len(), "listing tools");
        self.registry.descriptors()
    }

    /// Invoke a tool by name.
    ///
    /// Unknown names are not an error: they yield a single text block and
    /// touch nothing.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<Vec<ContentBlock>, ToolError> {
        let Some(handler) = self.registry.handler(name) else {
            tracing::warn!(server = %self.name, tool = %name, "unknown tool called");
            return Ok(vec![ContentBlock::text(UNKNOWN_TOOL_TEXT)]);
        };

        tracing::info!(server = %self.name, tool = %name, arguments = %arguments, "calling tool");
        handler.call(arguments).await
    }

    // ─── JSON-RPC ───────────────────────────────────────────────────────

    /// Handle one decoded request. Returns `None` for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let outcome: Result<serde_json::Value, (i32, String)> = match request.method.as_str() {
            methods::INITIALIZE => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": self.name, "version": self.version },
            })),
            methods::PING | methods::SHUTDOWN => Ok(json!({})),
            methods::TOOLS_LIST => Ok(json!({ "tools": self.list_tools() })),
            methods::TOOLS_CALL => self.handle_call(request.params.as_ref()).await,
            other => Err((
                error_codes::METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        };

        let id = request.id?;
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        })
    }

    async fn handle_call(
        &self,
        params: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, (i32, String)> {
        let name = params
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .ok_or((error_codes::INVALID_PARAMS, "missing tool name".to_string()))?;
        let arguments = params
            .and_then(|p| p.get("arguments"))
            .filter(|a| !a.is_null())
            .cloned()
            .unwrap_or_else(|| json!({}));

        let result = match self.call_tool(name, &arguments).await {
            Ok(content) => CallToolResult {
                content,
                is_error: false,
            },
            Err(e) => {
                tracing::error!(server = %self.name, tool = %name, error = %e, "tool call failed");
                CallToolResult {
                    content: vec![ContentBlock::text(e.to_string())],
                    is_error: true,
                }
            }
        };

        serde_json::to_value(result).map_err(|e| (error_codes::INTERNAL_ERROR, e.to_string()))
    }

    /// Decode one incoming line and produce the reply line, if any.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let response = match serde_json::from_str::<serde_json::Value>(line) {
            Err(e) => Some(JsonRpcResponse::failure(
                serde_json::Value::Null,
                error_codes::PARSE_ERROR,
                format!("parse error: {e}"),
            )),
            Ok(value) => match serde_json::from_value::<JsonRpcRequest>(value) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => Some(JsonRpcResponse::failure(
                    serde_json::Value::Null,
                    error_codes::INVALID_REQUEST,
                    format!("invalid request: {e}"),
                )),
            },
        }?;

        match serde_json::to_string(&response) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(server = %self.name, error = %e, "failed to serialize response");
                None
            }
        }
    }

    // ─── Serving ────────────────────────────────────────────────────────

    /// Serve requests until the peer closes the transport or sends `shutdown`.
    pub async fn serve(&self, transport: &mut dyn Transport) -> std::io::Result<()> {
        let start = Instant::now();
        tracing::info!(server = %self.name, tools = self.registry.len(), "starting tool server");

        while let Some(line) = transport.recv().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let is_shutdown = serde_json::from_str::<JsonRpcRequest>(trimmed)
                .map(|r| r.method == methods::SHUTDOWN)
                .unwrap_or(false);

            if let Some(reply) = self.handle_line(trimmed).await {
                transport.send(&reply).await?;
            }

            if is_shutdown {
                tracing::info!(server = %self.name, "shutdown requested");
                break;
            }
        }

        tracing::info!(
            server = %self.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "tool server stopped"
        );
        Ok(())
    }

    /// Serve over this process's stdin/stdout.
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        let mut transport = stdio_transport();
        self.serve(&mut transport).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
