//! Tool Servers: the facade processes the routing host talks to.
//!
//! Each server owns one `ToolRegistry` and answers `tools/list` and
//! `tools/call` over a `Transport`.

pub mod demo;
pub mod email;
pub mod errors;
pub mod github;
pub mod registry;
pub mod server;

pub use errors::ToolError;
pub use registry::{ToolHandler, ToolRegistry};
pub use server::ToolServer;
