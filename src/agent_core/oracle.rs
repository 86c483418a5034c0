//! Decision oracle and the adapter that turns its output into a `Decision`.
//!
//! The oracle is untrusted. Whatever it proposes is checked against the
//! merged catalog here, and anything unusable becomes `Decision::Rejected`
//! so the dispatch loop can feed it back instead of failing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::inference::types::{CompletionResponse, ToolCall, ToolDefinition};
use crate::inference::{InferenceClient, InferenceError};
use crate::mcp_client::{ToolCatalog, ToolResolution};
use crate::protocol::McpError;

use super::conversation::ConversationState;
use super::errors::{DecisionError, OracleError};

// ─── Proposal ───────────────────────────────────────────────────────────────

/// Raw oracle output, before any validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    Answer(String),
    ToolCalls(Vec<ToolCall>),
    Malformed { reason: String },
}

impl Proposal {
    /// Tool calls win over text; a reply with neither is malformed.
    pub fn from_completion(response: CompletionResponse) -> Self {
        if !response.tool_calls.is_empty() {
            return Proposal::ToolCalls(response.tool_calls);
        }
        match response.content {
            Some(text) => Proposal::Answer(text),
            None => Proposal::Malformed {
                reason: format!(
                    "empty response (finish_reason: {})",
                    response.finish_reason.as_deref().unwrap_or("none")
                ),
            },
        }
    }
}

// ─── DecisionOracle ─────────────────────────────────────────────────────────

/// Chooses the next action given the catalog and the conversation so far.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn propose(
        &self,
        catalog: &ToolCatalog,
        conversation: &ConversationState,
    ) -> Result<Proposal, OracleError>;
}

/// Oracle backed by an OpenAI-compatible chat completions endpoint.
pub struct LlmOracle {
    client: InferenceClient,
}

impl LlmOracle {
    pub fn new(client: InferenceClient) -> Self {
        Self { client }
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn propose(
        &self,
        catalog: &ToolCatalog,
        conversation: &ConversationState,
    ) -> Result<Proposal, OracleError> {
        let tools: Vec<ToolDefinition> = catalog
            .to_openai_tools()
            .into_iter()
            .filter_map(|tool| serde_json::from_value(tool).ok())
            .collect();
        let tools = (!tools.is_empty()).then_some(tools);

        match self
            .client
            .chat_completion(conversation.to_messages(), tools)
            .await
        {
            Ok(response) => Ok(Proposal::from_completion(response)),
            Err(InferenceError::ToolCallParseError {
                raw_response,
                reason,
            }) => Ok(Proposal::Malformed {
                reason: format!("{reason} in {raw_response}"),
            }),
            Err(InferenceError::MalformedResponse { reason }) => {
                Ok(Proposal::Malformed { reason })
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ─── Decision ───────────────────────────────────────────────────────────────

/// A validated tool call, ready to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub server_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    pub fn qualified_name(&self) -> String {
        ToolCatalog::qualify(&self.server_id, &self.tool_name)
    }
}

/// What the dispatch loop should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    FinalAnswer(String),
    ToolCall(ToolInvocation),
    /// Unusable oracle output. `call` is the offending proposal, if any.
    Rejected {
        call: Option<ToolCall>,
        error: DecisionError,
    },
}

// ─── DecisionAdapter ────────────────────────────────────────────────────────

/// Consults the oracle and validates what it proposes.
pub struct DecisionAdapter {
    oracle: Arc<dyn DecisionOracle>,
}

impl DecisionAdapter {
    pub fn new(oracle: Arc<dyn DecisionOracle>) -> Self {
        Self { oracle }
    }

    /// Ask for the next decision. Errs only when the oracle is unreachable.
    pub async fn decide(
        &self,
        catalog: &ToolCatalog,
        conversation: &ConversationState,
    ) -> Result<Decision, OracleError> {
        let proposal = self.oracle.propose(catalog, conversation).await?;
        Ok(interpret(catalog, proposal))
    }
}

/// Turn a raw proposal into a decision.
pub fn interpret(catalog: &ToolCatalog, proposal: Proposal) -> Decision {
    let calls = match proposal {
        Proposal::Answer(text) => return Decision::FinalAnswer(text),
        Proposal::Malformed { reason } => {
            return Decision::Rejected {
                call: None,
                error: DecisionError::Malformed { reason },
            }
        }
        Proposal::ToolCalls(calls) => calls,
    };

    if calls.len() > 1 {
        tracing::warn!(
            count = calls.len(),
            "oracle proposed several tool calls, executing only the first"
        );
    }
    let Some(call) = calls.into_iter().next() else {
        return Decision::Rejected {
            call: None,
            error: DecisionError::Malformed {
                reason: "empty tool call list".into(),
            },
        };
    };

    match resolve_call(catalog, &call) {
        Ok(invocation) => Decision::ToolCall(invocation),
        Err(error) => {
            tracing::warn!(tool = %call.name, error = %error, "rejected oracle decision");
            Decision::Rejected {
                call: Some(call),
                error,
            }
        }
    }
}

fn resolve_call(catalog: &ToolCatalog, call: &ToolCall) -> Result<ToolInvocation, DecisionError> {
    let name = call.name.trim();
    let arguments = if call.arguments.is_null() {
        serde_json::json!({})
    } else {
        call.arguments.clone()
    };

    // A server the catalog has never heard of is the dispatcher's to report.
    // Catalog names are tried first: they always win over a split.
    if let Some((server, tool)) = ToolCatalog::split_qualified(name) {
        if catalog.get(name).is_none() && !catalog.has_server(server) {
            return Ok(ToolInvocation {
                call_id: call.id.clone(),
                server_id: server.to_string(),
                tool_name: tool.to_string(),
                arguments,
            });
        }
    }

    let qualified = match catalog.resolve(name) {
        ToolResolution::Exact(q) => q,
        ToolResolution::Unprefixed { resolved, original } => {
            tracing::debug!(original = %original, resolved = %resolved, "resolved unprefixed tool name");
            resolved
        }
        ToolResolution::Ambiguous {
            original,
            candidates,
        } => {
            return Err(DecisionError::AmbiguousTool {
                name: original,
                candidates,
            })
        }
        ToolResolution::NotFound { original } => {
            return Err(DecisionError::UnknownTool { name: original })
        }
    };

    catalog
        .validate_arguments(&qualified, &arguments)
        .map_err(|e| match e {
            McpError::InvalidArguments { tool, reason } => {
                DecisionError::InvalidArguments { tool, reason }
            }
            _ => DecisionError::UnknownTool {
                name: qualified.clone(),
            },
        })?;

    let (server, tool) = catalog
        .owner(&qualified)
        .ok_or_else(|| DecisionError::UnknownTool {
            name: qualified.clone(),
        })?;

    Ok(ToolInvocation {
        call_id: call.id.clone(),
        server_id: server.to_string(),
        tool_name: tool.to_string(),
        arguments,
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
