//! Chat completion response parsing.
//!
//! Only native JSON tool calls are supported. Arguments normally arrive as a
//! JSON-encoded string; some OpenAI-compatible backends send a bare object
//! instead, and both are accepted.

use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::types::{CompletionResponse, ToolCall};

// ─── Native JSON Tool Calls ──────────────────────────────────────────────────

/// Parse one native tool call.
///
/// Empty or whitespace-only arguments mean "no arguments" (`{}`).
pub fn parse_native_json_tool_call(
    id: Option<&str>,
    name: &str,
    arguments: &serde_json::Value,
) -> Result<ToolCall, InferenceError> {
    let call_id = id
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));

    if name.trim().is_empty() {
        return Err(InferenceError::ToolCallParseError {
            raw_response: arguments.to_string(),
            reason: "empty tool name".into(),
        });
    }

    let arguments = match arguments {
        serde_json::Value::String(raw) if raw.trim().is_empty() => serde_json::json!({}),
        serde_json::Value::String(raw) => {
            serde_json::from_str(raw).map_err(|e| InferenceError::ToolCallParseError {
                raw_response: raw.clone(),
                reason: format!("invalid JSON arguments: {e}"),
            })?
        }
        serde_json::Value::Null => serde_json::json!({}),
        other => other.clone(),
    };

    Ok(ToolCall {
        id: call_id,
        name: name.trim().to_string(),
        arguments,
    })
}

// ─── Completion Body ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Deserialize)]
struct RawToolCall {
    id: Option<String>,
    function: RawFunction,
}

#[derive(Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Parse a non-streaming chat completion body. Only the first choice is used.
pub fn parse_completion_response(body: &str) -> Result<CompletionResponse, InferenceError> {
    let resp: CompletionBody =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse completion response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::MalformedResponse {
            reason: "empty choices array".into(),
        })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .iter()
        .map(|tc| parse_native_json_tool_call(tc.id.as_deref(), &tc.function.name, &tc.function.arguments))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompletionResponse {
        content: choice.message.content.filter(|c| !c.trim().is_empty()),
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
