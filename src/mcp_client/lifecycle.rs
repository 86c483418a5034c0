//! Server process lifecycle management.
//!
//! Handles spawning, the MCP handshake, and shutting down tool server child
//! processes. Each server runs as a separate OS process speaking JSON-RPC
//! over stdio.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::protocol::transport::{child_transport, extract_result, RpcClient, Transport};
use crate::protocol::types::{
    error_codes, methods, CallToolResult, InitializeResult, ListToolsResult, ToolDescriptor,
    PROTOCOL_VERSION,
};
use crate::protocol::McpError;

use super::types::ServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake plus tool discovery.
///
/// Covers `npx -y` resolving the GitHub server package on a cold cache.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Stderr lines kept per server for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Upper bound on `tools/list` pages, against servers that never stop paging.
const MAX_LIST_PAGES: usize = 32;

/// Grace period for stderr to drain after a failed handshake.
const STDERR_SETTLE: Duration = Duration::from_millis(200);

// ─── ManagedServer ───────────────────────────────────────────────────────────

/// A connected tool server with its RPC channel and discovered tools.
pub struct ManagedServer {
    name: String,
    /// `None` when attached over a non-process transport.
    process: Option<Child>,
    rpc: RpcClient,
    tools: Vec<ToolDescriptor>,
    stderr_tail: StderrTail,
}

impl ManagedServer {
    /// Connect over an already established transport and run the handshake.
    pub async fn attach(name: &str, transport: Box<dyn Transport>) -> Result<Self, McpError> {
        let mut rpc = RpcClient::new(name, transport);
        let tools = handshake(&mut rpc).await?;
        Ok(Self {
            name: name.to_string(),
            process: None,
            rpc,
            tools,
            stderr_tail: StderrTail::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tools listed during the handshake, cached for the session.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Most recent stderr lines from the child process.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.snapshot()
    }

    /// OS process id, when the server is a child process that has not exited.
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    /// Check if the server process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.process.as_mut() {
            None => true,
            Some(child) => matches!(child.try_wait(), Ok(None)),
        }
    }

    /// Issue one `tools/call` and decode the result.
    pub async fn call_tool(
        &mut self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        let params = json!({ "name": tool, "arguments": arguments });
        let response = self.rpc.request(methods::TOOLS_CALL, Some(params)).await?;
        let result = extract_result(response)?;
        serde_json::from_value(result).map_err(|e| McpError::ServerError {
            code: error_codes::INTERNAL_ERROR,
            message: format!("malformed tools/call result from '{}': {e}", self.name),
            data: None,
        })
    }

    /// Attempt to gracefully shut down the server.
    ///
    /// Servers that ignore the `shutdown` notification still see EOF on
    /// stdin, since the transport is closed before waiting on the child.
    pub async fn shutdown(&mut self) {
        // Best-effort: the peer may already be gone.
        let _ = self.rpc.notify(methods::SHUTDOWN, None).await;
        self.rpc.close();

        let Some(child) = self.process.as_mut() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, status = %status, "server exited");
            }
            _ => {
                tracing::warn!(server = %self.name, "server did not exit in time, killing");
                let _ = child.kill().await;
            }
        }
    }
}

// ─── Handshake ───────────────────────────────────────────────────────────────

/// `initialize` → `notifications/initialized` → paginated `tools/list`.
async fn handshake(rpc: &mut RpcClient) -> Result<Vec<ToolDescriptor>, McpError> {
    let name = rpc.server_name().to_string();
    let init_failed = |reason: String| McpError::InitFailed {
        name: name.clone(),
        reason,
    };

    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
    });
    let response = rpc.request(methods::INITIALIZE, Some(params)).await?;
    let init: InitializeResult = serde_json::from_value(extract_result(response)?)
        .map_err(|e| init_failed(format!("failed to parse initialize response: {e}")))?;

    tracing::debug!(
        server = %name,
        protocol = %init.protocol_version,
        server_name = ?init.server_info.as_ref().and_then(|i| i.name.as_deref()),
        "initialized"
    );

    rpc.notify(methods::INITIALIZED, None).await?;

    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_LIST_PAGES {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let response = rpc.request(methods::TOOLS_LIST, params).await?;
        let page: ListToolsResult = serde_json::from_value(extract_result(response)?)
            .map_err(|e| init_failed(format!("failed to parse tools/list response: {e}")))?;

        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(tools),
        }
    }

    tracing::warn!(server = %name, pages = MAX_LIST_PAGES, "tools/list kept paging, truncating");
    Ok(tools)
}

// ─── Stderr capture ──────────────────────────────────────────────────────────

/// Bounded ring of recent stderr lines, shared with the drain task.
#[derive(Clone, Default)]
struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.0.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    fn snapshot(&self) -> String {
        self.0
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

/// Forward a child's stderr into tracing for its whole lifetime.
///
/// Draining also keeps a chatty server from blocking on a full pipe.
fn drain_stderr(name: &str, stderr: ChildStderr, tail: StderrTail) {
    let name = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %name, "stderr: {line}");
            tail.push(line);
        }
    });
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a single tool server process and perform the handshake.
pub async fn spawn_server(
    name: &str,
    config: &ServerConfig,
    working_dir: Option<&str>,
) -> Result<ManagedServer, McpError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    cmd.envs(&config.env);

    // Per-server cwd overrides the global working_dir
    if let Some(dir) = config.cwd.as_deref().or(working_dir) {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    let tail = StderrTail::default();
    if let Some(stderr) = child.stderr.take() {
        drain_stderr(name, stderr, tail.clone());
    }

    let mut rpc = RpcClient::new(name, Box::new(child_transport(stdin, stdout)));

    let outcome = tokio::time::timeout(INIT_TIMEOUT, handshake(&mut rpc)).await;
    let reason = match outcome {
        Ok(Ok(tools)) => {
            tracing::info!(server = name, pid = ?child.id(), tools = tools.len(), "server ready");
            return Ok(ManagedServer {
                name: name.to_string(),
                process: Some(child),
                rpc,
                tools,
                stderr_tail: tail,
            });
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("initialization timed out after {}s", INIT_TIMEOUT.as_secs()),
    };

    let _ = child.kill().await;
    tokio::time::sleep(STDERR_SETTLE).await;
    let stderr_ctx = tail.snapshot();
    if !stderr_ctx.is_empty() {
        tracing::warn!(server = name, stderr = %stderr_ctx, "server stderr captured on failure");
    }

    Err(McpError::InitFailed {
        name: name.to_string(),
        reason: format!("{reason}{}", format_stderr_suffix(&stderr_ctx)),
    })
}

// ─── Batch Operations ────────────────────────────────────────────────────────

/// Spawn all configured servers concurrently.
///
/// Servers that fail to start are returned alongside the ones that did
/// (partial startup is acceptable).
pub async fn spawn_all_servers(
    configs: &BTreeMap<String, ServerConfig>,
    working_dir: Option<&str>,
) -> (BTreeMap<String, ManagedServer>, Vec<(String, McpError)>) {
    let mut servers = BTreeMap::new();
    let mut errors = Vec::new();

    let mut handles = Vec::new();
    for (name, config) in configs {
        let name = name.clone();
        let config = config.clone();
        let wd = working_dir.map(|s| s.to_string());
        handles.push((
            name.clone(),
            tokio::spawn(async move { spawn_server(&name, &config, wd.as_deref()).await }),
        ));
    }

    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(server)) => {
                servers.insert(name, server);
            }
            Ok(Err(e)) => errors.push((name, e)),
            Err(e) => {
                errors.push((
                    name.clone(),
                    McpError::SpawnFailed {
                        name,
                        reason: format!("join error: {e}"),
                    },
                ));
            }
        }
    }

    (servers, errors)
}

/// Shut down all managed servers concurrently.
pub async fn shutdown_all_servers(servers: &mut BTreeMap<String, ManagedServer>) {
    futures::future::join_all(servers.values_mut().map(|s| s.shutdown())).await;
    servers.clear();
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_server::demo;
    use crate::protocol::types::{JsonRpcRequest, JsonRpcResponse};
    use crate::protocol::MemoryTransport;

    #[tokio::test]
    async fn test_attach_discovers_tools() {
        let (client_end, mut server_end) = MemoryTransport::pair();
        let server = demo::server().unwrap();
        tokio::spawn(async move { server.serve(&mut server_end).await });

        let mut managed = ManagedServer::attach("demoFacade", Box::new(client_end))
            .await
            .unwrap();
        assert_eq!(managed.tools().len(), 1);
        assert_eq!(managed.tools()[0].name, "greet");

        let result = managed
            .call_tool("greet", json!({"message": "Hi"}))
            .await
            .unwrap();
        assert_eq!(result.render_text(), "Hello!");
        managed.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_transport_for_deaf_servers() {
        let (client_end, mut peer) = MemoryTransport::pair();
        let peer_task = tokio::spawn(async move {
            while let Ok(Some(line)) = peer.recv().await {
                let req: JsonRpcRequest = serde_json::from_str(&line).unwrap();
                // Answers requests, never acts on notifications.
                let Some(id) = req.id else { continue };
                let result = match req.method.as_str() {
                    "initialize" => json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {}}),
                    _ => json!({"tools": []}),
                };
                let resp = JsonRpcResponse::success(id, result);
                peer.send(&serde_json::to_string(&resp).unwrap()).await.unwrap();
            }
        });

        let mut managed = ManagedServer::attach("githubFacade", Box::new(client_end))
            .await
            .unwrap();
        managed.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), peer_task)
            .await
            .expect("peer should see end of input after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_tools_list_follows_cursor() {
        let (client_end, mut peer) = MemoryTransport::pair();
        tokio::spawn(async move {
            while let Ok(Some(line)) = peer.recv().await {
                let req: JsonRpcRequest = serde_json::from_str(&line).unwrap();
                let Some(id) = req.id else { continue };
                let result = match req.method.as_str() {
                    "initialize" => json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {}}),
                    "tools/list" if req.params.is_none() => {
                        json!({"tools": [{"name": "a"}], "nextCursor": "p2"})
                    }
                    "tools/list" => json!({"tools": [{"name": "b"}]}),
                    _ => json!({}),
                };
                let resp = JsonRpcResponse::success(id, result);
                peer.send(&serde_json::to_string(&resp).unwrap()).await.unwrap();
            }
        });

        let managed = ManagedServer::attach("paged", Box::new(client_end)).await.unwrap();
        let names: Vec<&str> = managed.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_attach_to_closed_peer_fails() {
        let (client_end, server_end) = MemoryTransport::pair();
        drop(server_end);
        let err = ManagedServer::attach("gone", Box::new(client_end)).await.err().unwrap();
        assert!(err.is_transport_failure());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let config = ServerConfig {
            command: "definitely-not-a-real-binary-3f9a".into(),
            args: vec![],
            env: BTreeMap::new(),
            cwd: None,
        };
        let err = spawn_server("ghost", &config, None).await.err().unwrap();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let tail = StderrTail::default();
        for i in 0..(STDERR_TAIL_LINES + 5) {
            tail.push(format!("line {i}"));
        }
        let snapshot = tail.snapshot();
        assert_eq!(snapshot.lines().count(), STDERR_TAIL_LINES);
        assert!(snapshot.starts_with("line 5"));
    }

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix(" boom \n"), " | stderr: boom");
    }
}
