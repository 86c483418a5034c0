//! Protocol layer shared by the routing host and the tool servers.
//!
//! - JSON-RPC 2.0 envelopes and MCP tool payloads (`types`)
//! - Newline-delimited framing over an abstract message channel (`transport`)
//! - Request/response pairing with id matching (`RpcClient`)
//!
//! Nothing in here knows about processes: the host wraps a child's stdio, a
//! server wraps its own stdio, and tests use `MemoryTransport`.

pub mod errors;
pub mod transport;
pub mod types;

pub use errors::McpError;
pub use transport::{MemoryTransport, RpcClient, Transport};
pub use types::{CallToolResult, ContentBlock, ToolDescriptor};
