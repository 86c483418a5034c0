//! MCP Client: the routing host's side of the tool-server protocol.
//!
//! This module handles:
//! - Spawning tool server child processes and the MCP handshake
//! - Tool discovery and the merged, qualified tool catalog
//! - Argument validation and tool call routing with timeouts
//! - Marking servers dead after transport failures, graceful shutdown

pub mod client;
pub mod lifecycle;
pub mod registry;
pub mod types;

pub use client::McpClient;
pub use registry::{ToolCatalog, ToolResolution};
pub use types::{McpServersConfig, ServerConfig};
