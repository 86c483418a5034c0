//! Inference Client: OpenAI-compatible API client behind the decision oracle.
//!
//! This module handles all communication with the model endpoint:
//! - Non-streaming chat completions with retry on transient failures
//! - Native JSON tool call parsing
//! - Model endpoint configuration (Gemini's OpenAI-compatible API by default)
//!
//! Any endpoint that speaks the Chat Completions API can stand in; switching
//! models is a config change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod tool_call_parser;
pub mod types;

pub use client::InferenceClient;
pub use config::ModelConfig;
pub use errors::InferenceError;
pub use types::{ChatMessage, CompletionResponse, Role, ToolCall, ToolDefinition};
