//! MCP Client: high-level interface for tool execution.
//!
//! Owns every `ManagedServer` and the merged `ToolCatalog`, and routes
//! `tools/call` requests to the owning server with a per-call timeout.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::protocol::transport::Transport;
use crate::protocol::types::CallToolResult;
use crate::protocol::McpError;

use super::lifecycle::{self, ManagedServer};
use super::registry::ToolCatalog;
use super::types::{McpServersConfig, ServerConfig};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for tool call execution (ms).
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Manages the session's tool servers and routes tool calls to them.
pub struct McpClient {
    servers: BTreeMap<String, ManagedServer>,
    configs: BTreeMap<String, ServerConfig>,
    /// Servers lost to a transport failure, with the reason. Never revived.
    dead: BTreeMap<String, String>,
    /// Aggregated tool definitions from all live servers.
    pub catalog: ToolCatalog,
    working_dir: Option<String>,
    call_timeout_ms: u64,
}

impl McpClient {
    pub fn new(config: McpServersConfig, working_dir: Option<String>) -> Self {
        Self {
            servers: BTreeMap::new(),
            configs: config.servers,
            dead: BTreeMap::new(),
            catalog: ToolCatalog::new(),
            working_dir,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }

    /// Set the tool call timeout in milliseconds.
    pub fn set_call_timeout(&mut self, timeout_ms: u64) {
        self.call_timeout_ms = timeout_ms;
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start all configured servers and build the catalog.
    ///
    /// Returns the servers that failed to start (partial startup is OK).
    pub async fn start_all(&mut self) -> Vec<(String, McpError)> {
        let mut rejected = Vec::new();
        let mut launchable = BTreeMap::new();
        for (name, config) in &self.configs {
            match ToolCatalog::check_server_id(name) {
                Ok(()) => {
                    launchable.insert(name.clone(), config.clone());
                }
                Err(e) => rejected.push((name.clone(), e)),
            }
        }

        let (servers, mut errors) =
            lifecycle::spawn_all_servers(&launchable, self.working_dir.as_deref()).await;
        errors.extend(rejected);

        for (name, server) in &servers {
            self.catalog.register_server_tools(name, server.tools());
        }
        for (name, error) in &errors {
            self.dead.insert(name.clone(), error.to_string());
        }

        self.servers = servers;
        errors
    }

    /// Connect a server over an existing transport (in-process servers, tests).
    pub async fn attach(
        &mut self,
        name: &str,
        transport: Box<dyn Transport>,
    ) -> Result<(), McpError> {
        ToolCatalog::check_server_id(name)?;
        let server = ManagedServer::attach(name, transport).await?;
        self.catalog.register_server_tools(name, server.tools());
        self.dead.remove(name);
        self.servers.insert(name.to_string(), server);
        Ok(())
    }

    /// Shut down all servers gracefully.
    pub async fn shutdown_all(&mut self) {
        lifecycle::shutdown_all_servers(&mut self.servers).await;
        self.catalog = ToolCatalog::new();
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Execute one tool call on a specific server.
    ///
    /// A transport failure ends that server's session: its handle is dropped,
    /// its tools leave the catalog, and later calls report it unavailable.
    pub async fn call_tool(
        &mut self,
        server_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        if let Some(reason) = self.dead.get(server_name) {
            return Err(McpError::ServerUnavailable {
                name: server_name.to_string(),
                reason: reason.clone(),
            });
        }

        let Some(server) = self.servers.get_mut(server_name) else {
            return Err(McpError::UnknownServer {
                name: server_name.to_string(),
            });
        };

        let qualified = ToolCatalog::qualify(server_name, tool_name);
        self.catalog.validate_arguments(&qualified, &arguments)?;

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(self.call_timeout_ms),
            server.call_tool(tool_name, arguments),
        )
        .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => {
                tracing::warn!(tool = %qualified, timeout_ms = self.call_timeout_ms, "tool call timed out");
                Err(McpError::Timeout {
                    tool: qualified,
                    timeout_ms: self.call_timeout_ms,
                })
            }
            Ok(Err(e)) if e.is_transport_failure() => {
                let tail = server.stderr_tail();
                let reason = if tail.is_empty() {
                    e.to_string()
                } else {
                    format!("{e} | stderr: {tail}")
                };
                tracing::error!(server = %server_name, reason = %reason, "server lost");
                self.mark_dead(server_name, reason.clone());
                Err(McpError::ServerUnavailable {
                    name: server_name.to_string(),
                    reason,
                })
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(result)) => {
                tracing::info!(
                    tool = %qualified,
                    is_error = result.is_error,
                    elapsed_ms,
                    "tool call completed"
                );
                Ok(result)
            }
        }
    }

    fn mark_dead(&mut self, name: &str, reason: String) {
        self.servers.remove(name);
        self.catalog.unregister_server(name);
        self.dead.insert(name.to_string(), reason);
    }

    // ─── Status ──────────────────────────────────────────────────────────

    pub fn running_server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn tool_count(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_server_running(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn running_servers(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Servers that failed to start or were lost, with the reason.
    pub fn unavailable_servers(&self) -> Vec<(String, String)> {
        self.dead
            .iter()
            .map(|(name, reason)| (name.clone(), reason.clone()))
            .collect()
    }

    /// Names of all configured servers (including those that failed to start).
    pub fn configured_servers(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
