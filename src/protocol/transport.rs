//! Message transports and JSON-RPC request pairing.
//!
//! - `Transport`: abstract bidirectional line channel (one JSON object per line)
//! - `LineTransport`: any async reader/writer pair (child stdio, own stdio)
//! - `MemoryTransport`: in-process duplex channel for tests
//! - `RpcClient`: strictly paired request → response over a transport

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;

use super::errors::McpError;
use super::types::{JsonRpcRequest, JsonRpcResponse};

// ─── Transport ───────────────────────────────────────────────────────────────

/// A bidirectional, in-order channel of framed messages.
///
/// `recv` returns `Ok(None)` once the peer has closed its side.
#[async_trait]
pub trait Transport: Send {
    /// Write one complete message.
    async fn send(&mut self, message: &str) -> std::io::Result<()>;

    /// Read the next complete message.
    async fn recv(&mut self) -> std::io::Result<Option<String>>;
}

// ─── Line-delimited stream transport ─────────────────────────────────────────

/// Newline-delimited framing over an async byte stream pair.
///
/// Partial lines are buffered in `pending`, so dropping a `recv` future (e.g.
/// on a call timeout) never loses bytes already read from the stream.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    pending: Vec<u8>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            pending: Vec::new(),
        }
    }

    fn take_pending(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes)
            .trim_end_matches(|c| c == '\n' || c == '\r')
            .to_string()
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &str) -> std::io::Result<()> {
        let mut frame = String::with_capacity(message.len() + 1);
        frame.push_str(message);
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await
    }

    async fn recv(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let bytes_read = self.reader.read_until(b'\n', &mut self.pending).await?;
            if bytes_read == 0 {
                // EOF: flush a trailing unterminated line, then report closure.
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_pending()));
            }
            if self.pending.ends_with(b"\n") {
                return Ok(Some(self.take_pending()));
            }
        }
    }
}

/// Transport over a spawned child's stdin/stdout (host side).
pub type ChildTransport = LineTransport<BufReader<ChildStdout>, ChildStdin>;

/// Transport over this process's own stdin/stdout (server side).
pub type StdioTransport = LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

/// Build a transport from a child process's stdio handles.
pub fn child_transport(stdin: ChildStdin, stdout: ChildStdout) -> ChildTransport {
    LineTransport::new(BufReader::new(stdout), stdin)
}

/// Build a transport over the current process's stdio.
pub fn stdio_transport() -> StdioTransport {
    LineTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
}

// ─── In-memory transport ─────────────────────────────────────────────────────

/// One end of an in-process duplex message channel.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Create two connected ends: whatever one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, message: &str) -> std::io::Result<()> {
        self.tx.send(message.to_string()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer closed")
        })
    }

    async fn recv(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

/// Stand-in left behind by `RpcClient::close`.
struct ClosedTransport;

#[async_trait]
impl Transport for ClosedTransport {
    async fn send(&mut self, _message: &str) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "transport closed",
        ))
    }

    async fn recv(&mut self) -> std::io::Result<Option<String>> {
        Ok(None)
    }
}

// ─── RpcClient ───────────────────────────────────────────────────────────────

/// Request/response pairing over one transport.
///
/// No pipelining: each `request` writes one line and reads until the response
/// with the same id arrives. Lines that are not JSON-RPC responses (log noise)
/// and responses to earlier, abandoned requests are skipped.
pub struct RpcClient {
    server_name: String,
    transport: Box<dyn Transport>,
    next_id: u64,
}

impl RpcClient {
    pub fn new(server_name: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            server_name: server_name.to_string(),
            transport,
            next_id: 1,
        }
    }

    /// Name of the server on the other end.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    /// Send a JSON-RPC request and wait for the matching response.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id;
        self.next_id += 1;
        let req = JsonRpcRequest::new(id, method, params);

        let json = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        if let Err(e) = self.transport.send(&json).await {
            return Err(self.transport_error(format!("failed to write request: {e}")));
        }

        let expected_id = serde_json::Value::from(id);
        loop {
            let line = match self.transport.recv().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(self.transport_error(
                        "server output closed (process may have exited)".into(),
                    ))
                }
                Err(e) => return Err(self.transport_error(format!("failed to read response: {e}"))),
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == expected_id => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        got = %resp.id,
                        "skipping response for a different request"
                    );
                }
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = %trimmed, "skipping non-response line");
                }
            }
        }
    }

    /// Drop the underlying transport. For a child process this closes its
    /// stdin, which a stdio server reads as end of session.
    pub fn close(&mut self) {
        self.transport = Box::new(ClosedTransport);
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let note = JsonRpcRequest::notification(method, params);
        let json = serde_json::to_string(&note)
            .map_err(|e| self.transport_error(format!("failed to serialize notification: {e}")))?;

        if let Err(e) = self.transport.send(&json).await {
            return Err(self.transport_error(format!("failed to write notification: {e}")));
        }
        Ok(())
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
