//! Dispatcher: the decide / act loop for one user request.
//!
//! Each cycle asks the `DecisionAdapter` for a decision. A final answer ends
//! the request. Anything else costs one step: a tool call is executed and
//! its result appended, a rejected decision is fed back as an error. When
//! the budget runs out the request ends with a best-effort reply, so any
//! oracle gets at most `budget + 1` consultations.

use std::time::Instant;

use crate::inference::types::ToolCall;
use crate::mcp_client::McpClient;

use super::conversation::{ConversationState, Turn};
use super::errors::DispatchError;
use super::oracle::{Decision, DecisionAdapter, ToolInvocation};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default number of non-final decisions allowed per request.
pub const DEFAULT_MAX_STEPS: u32 = 10;

/// Maximum characters of a tool result kept in the conversation.
pub const MAX_TOOL_RESULT_CHARS: usize = 6_000;

const NO_RESULT_TEXT: &str = "Could not complete the request within the step budget.";

// ─── StepBudget ─────────────────────────────────────────────────────────────

/// Steps left for one request. Only ever decreases, never below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    limit: u32,
    remaining: u32,
}

impl StepBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    /// Spend one step. Returns `false` if none were left.
    pub fn consume(&mut self) -> bool {
        match self.remaining.checked_sub(1) {
            Some(left) => {
                self.remaining = left;
                true
            }
            None => false,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn used(&self) -> u32 {
        self.limit - self.remaining
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

// ─── DispatchOutcome ────────────────────────────────────────────────────────

/// How one user request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Answered { text: String, steps_used: u32 },
    /// Best-effort reply built from the last tool result, if any.
    BudgetExhausted { text: String, steps_used: u32 },
    /// The oracle could not be consulted.
    Failed { reason: String },
}

impl DispatchOutcome {
    /// Text to show the user.
    pub fn text(&self) -> String {
        match self {
            Self::Answered { text, .. } | Self::BudgetExhausted { text, .. } => text.clone(),
            Self::Failed { reason } => format!("Error: {reason}"),
        }
    }
}

// ─── Dispatcher ─────────────────────────────────────────────────────────────

pub struct Dispatcher {
    adapter: DecisionAdapter,
    max_steps: u32,
}

impl Dispatcher {
    pub fn new(adapter: DecisionAdapter, max_steps: u32) -> Self {
        Self { adapter, max_steps }
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Run one request to completion.
    pub async fn run(
        &self,
        client: &mut McpClient,
        conversation: &mut ConversationState,
        request: &str,
    ) -> DispatchOutcome {
        let start = Instant::now();
        conversation.begin_request(request);
        let mut budget = StepBudget::new(self.max_steps);
        let mut last_result: Option<String> = None;

        loop {
            if budget.is_exhausted() {
                tracing::warn!(
                    steps = budget.used(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "step budget exhausted"
                );
                let text = match last_result {
                    Some(result) => format!(
                        "Step budget exhausted before a final answer. Last tool result:\n{result}"
                    ),
                    None => NO_RESULT_TEXT.to_string(),
                };
                return DispatchOutcome::BudgetExhausted {
                    text,
                    steps_used: budget.used(),
                };
            }

            let decision = match self.adapter.decide(&client.catalog, conversation).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!(error = %e, "decision oracle failed");
                    return DispatchOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            };

            match decision {
                Decision::FinalAnswer(text) => {
                    tracing::info!(
                        steps = budget.used(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "request answered"
                    );
                    conversation.push(Turn::Answer(text.clone()));
                    return DispatchOutcome::Answered {
                        text,
                        steps_used: budget.used(),
                    };
                }
                Decision::Rejected { call, error } => {
                    budget.consume();
                    let message = format!("Error: {}", DispatchError::from(error));
                    match call {
                        Some(call) => {
                            let call_id = call.id.clone();
                            conversation.push(Turn::ToolCall(call));
                            conversation.push(Turn::ToolResult {
                                call_id,
                                content: message,
                                is_error: true,
                            });
                        }
                        None => conversation.push(Turn::Notice(message)),
                    }
                }
                Decision::ToolCall(invocation) => {
                    budget.consume();
                    tracing::info!(
                        step = budget.used(),
                        tool = %invocation.qualified_name(),
                        remaining = budget.remaining(),
                        "dispatching tool call"
                    );
                    conversation.push(Turn::ToolCall(ToolCall {
                        id: invocation.call_id.clone(),
                        name: invocation.qualified_name(),
                        arguments: invocation.arguments.clone(),
                    }));
                    let (content, is_error) = execute(client, &invocation).await;
                    last_result = Some(content.clone());
                    conversation.push(Turn::ToolResult {
                        call_id: invocation.call_id,
                        content,
                        is_error,
                    });
                }
            }
        }
    }
}

/// Execute one call; every failure comes back as error text for the oracle.
async fn execute(client: &mut McpClient, invocation: &ToolInvocation) -> (String, bool) {
    let qualified = invocation.qualified_name();
    match client
        .call_tool(
            &invocation.server_id,
            &invocation.tool_name,
            invocation.arguments.clone(),
        )
        .await
    {
        Ok(result) => {
            let text = result.render_text();
            let text = if text.is_empty() {
                "(no content)".to_string()
            } else {
                truncate_tool_result(&text, &qualified)
            };
            (text, result.is_error)
        }
        Err(e) => {
            let error =
                DispatchError::from_mcp(&invocation.server_id, &invocation.tool_name, e);
            tracing::warn!(tool = %qualified, error = %error, "tool call failed");
            (format!("Error: {error}"), true)
        }
    }
}

/// Cap a tool result at `MAX_TOOL_RESULT_CHARS`, cutting on a char boundary.
pub fn truncate_tool_result(result: &str, tool_name: &str) -> String {
    let total = result.chars().count();
    if total <= MAX_TOOL_RESULT_CHARS {
        return result.to_string();
    }

    let cut = result
        .char_indices()
        .nth(MAX_TOOL_RESULT_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(result.len());
    tracing::warn!(
        tool = %tool_name,
        original_len = total,
        truncated_to = MAX_TOOL_RESULT_CHARS,
        "tool result truncated"
    );
    format!(
        "{}\n\n[... truncated: showing first {MAX_TOOL_RESULT_CHARS} of {total} chars]",
        &result[..cut]
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::conversation::ConversationPolicy;
    use crate::agent_core::errors::OracleError;
    use crate::agent_core::oracle::{DecisionOracle, Proposal};
    use crate::mcp_client::{McpServersConfig, ToolCatalog};
    use crate::mcp_server::registry::ToolHandler;
    use crate::mcp_server::{demo, ToolError, ToolRegistry, ToolServer};
    use crate::protocol::types::{ContentBlock, ToolDescriptor};
    use crate::protocol::MemoryTransport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    // ── Oracles ──

    /// Replays proposals in order, then answers "done".
    struct ScriptedOracle {
        script: Mutex<VecDeque<Proposal>>,
        consulted: AtomicUsize,
    }

    impl ScriptedOracle {
        fn new(script: Vec<Proposal>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                consulted: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DecisionOracle for ScriptedOracle {
        async fn propose(
            &self,
            _catalog: &ToolCatalog,
            _conversation: &ConversationState,
        ) -> Result<Proposal, OracleError> {
            self.consulted.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| Proposal::Answer("done".into())))
        }
    }

    /// Never answers; always asks for the counting tool.
    struct AlwaysCallOracle {
        consulted: AtomicUsize,
    }

    #[async_trait]
    impl DecisionOracle for AlwaysCallOracle {
        async fn propose(
            &self,
            _catalog: &ToolCatalog,
            _conversation: &ConversationState,
        ) -> Result<Proposal, OracleError> {
            let n = self.consulted.fetch_add(1, Ordering::SeqCst);
            Ok(Proposal::ToolCalls(vec![ToolCall {
                id: format!("call_{n}"),
                name: "counterFacade.tick".into(),
                arguments: json!({}),
            }]))
        }
    }

    struct UnreachableOracle;

    #[async_trait]
    impl DecisionOracle for UnreachableOracle {
        async fn propose(
            &self,
            _catalog: &ToolCatalog,
            _conversation: &ConversationState,
        ) -> Result<Proposal, OracleError> {
            Err(OracleError::Unavailable {
                reason: "connection refused".into(),
            })
        }
    }

    // ── Servers ──

    struct TickTool(Arc<AtomicUsize>);

    #[async_trait]
    impl ToolHandler for TickTool {
        async fn call(&self, _arguments: &serde_json::Value) -> Result<Vec<ContentBlock>, ToolError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(vec![ContentBlock::text(format!("tick {n}"))])
        }
    }

    async fn attach(client: &mut McpClient, name: &str, server: ToolServer) {
        let (client_end, mut server_end) = MemoryTransport::pair();
        tokio::spawn(async move { server.serve(&mut server_end).await });
        client.attach(name, Box::new(client_end)).await.unwrap();
    }

    /// Client with `demoFacade` and a `counterFacade` whose calls are counted.
    async fn client() -> (McpClient, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor {
                    name: "tick".into(),
                    description: "Count one call".into(),
                    input_schema: json!({"type": "object", "properties": {}}),
                },
                TickTool(Arc::clone(&ticks)),
            )
            .unwrap();

        let mut client = McpClient::new(McpServersConfig::default(), None);
        attach(&mut client, "demoFacade", demo::server().unwrap()).await;
        attach(&mut client, "counterFacade", ToolServer::new("counter", registry)).await;
        (client, ticks)
    }

    fn greet(message: &str) -> Proposal {
        Proposal::ToolCalls(vec![ToolCall {
            id: "call_greet".into(),
            name: "demoFacade.greet".into(),
            arguments: json!({ "message": message }),
        }])
    }

    fn conversation() -> ConversationState {
        ConversationState::new("route", ConversationPolicy::Persist)
    }

    // ── StepBudget ──

    #[test]
    fn test_budget_never_negative() {
        let mut budget = StepBudget::new(2);
        assert!(budget.consume());
        assert!(budget.consume());
        assert!(budget.is_exhausted());
        assert!(!budget.consume());
        assert_eq!(budget.remaining(), 0);
        assert_eq!(budget.used(), 2);
        assert_eq!(budget.limit(), 2);
    }

    // ── Loop ──

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let (mut client, _) = client().await;
        let oracle = ScriptedOracle::new(vec![greet("Hi"), Proposal::Answer("It said Hello!".into())]);
        let dispatcher = Dispatcher::new(DecisionAdapter::new(oracle.clone()), 10);
        let mut state = conversation();

        let outcome = dispatcher.run(&mut client, &mut state, "greet the demo").await;
        assert_eq!(
            outcome,
            DispatchOutcome::Answered {
                text: "It said Hello!".into(),
                steps_used: 1
            }
        );
        assert_eq!(oracle.consulted.load(Ordering::SeqCst), 2);
        assert!(state.turns().contains(&Turn::ToolResult {
            call_id: "call_greet".into(),
            content: "Hello!".into(),
            is_error: false,
        }));
        assert_eq!(state.turns().last(), Some(&Turn::Answer("It said Hello!".into())));
    }

    #[tokio::test]
    async fn test_budget_of_one_runs_exactly_one_call() {
        let (mut client, ticks) = client().await;
        let oracle = Arc::new(AlwaysCallOracle {
            consulted: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(DecisionAdapter::new(oracle.clone()), 1);
        let mut state = conversation();

        let outcome = dispatcher.run(&mut client, &mut state, "loop forever").await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(oracle.consulted.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome,
            DispatchOutcome::BudgetExhausted {
                text: "Step budget exhausted before a final answer. Last tool result:\ntick 1".into(),
                steps_used: 1
            }
        );
    }

    #[tokio::test]
    async fn test_always_call_oracle_terminates_within_budget() {
        let (mut client, ticks) = client().await;
        let oracle = Arc::new(AlwaysCallOracle {
            consulted: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(DecisionAdapter::new(oracle.clone()), 4);

        let outcome = dispatcher.run(&mut client, &mut conversation(), "go").await;
        assert!(matches!(outcome, DispatchOutcome::BudgetExhausted { steps_used: 4, .. }));
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
        assert!(oracle.consulted.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_unknown_server_is_fed_back() {
        let (mut client, _) = client().await;
        let oracle = ScriptedOracle::new(vec![
            Proposal::ToolCalls(vec![ToolCall {
                id: "call_bad".into(),
                name: "mailFacade.send_email".into(),
                arguments: json!({}),
            }]),
            greet("Hi"),
        ]);
        let dispatcher = Dispatcher::new(DecisionAdapter::new(oracle), 10);
        let mut state = conversation();

        let outcome = dispatcher.run(&mut client, &mut state, "send mail").await;
        assert_eq!(
            outcome,
            DispatchOutcome::Answered {
                text: "done".into(),
                steps_used: 2
            }
        );
        assert!(state.turns().contains(&Turn::ToolResult {
            call_id: "call_bad".into(),
            content: "Error: unknown server: 'mailFacade'".into(),
            is_error: true,
        }));
    }

    #[tokio::test]
    async fn test_malformed_decisions_capped_by_budget() {
        let (mut client, ticks) = client().await;
        let script = (0..20)
            .map(|_| Proposal::Malformed {
                reason: "not JSON".into(),
            })
            .collect();
        let oracle = ScriptedOracle::new(script);
        let dispatcher = Dispatcher::new(DecisionAdapter::new(oracle.clone()), 3);
        let mut state = conversation();

        let outcome = dispatcher.run(&mut client, &mut state, "?").await;
        assert_eq!(
            outcome,
            DispatchOutcome::BudgetExhausted {
                text: NO_RESULT_TEXT.into(),
                steps_used: 3
            }
        );
        assert_eq!(oracle.consulted.load(Ordering::SeqCst), 3);
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert_eq!(
            state.turns().last(),
            Some(&Turn::Notice("Error: malformed decision: not JSON".into()))
        );
    }

    #[tokio::test]
    async fn test_rejected_call_is_paired_with_error_result() {
        let (mut client, _) = client().await;
        let oracle = ScriptedOracle::new(vec![Proposal::ToolCalls(vec![ToolCall {
            id: "call_x".into(),
            name: "demoFacade.greet".into(),
            arguments: json!({"message": 42}),
        }])]);
        let dispatcher = Dispatcher::new(DecisionAdapter::new(oracle), 5);
        let mut state = conversation();

        dispatcher.run(&mut client, &mut state, "hi").await;
        let turns = state.turns();
        assert!(matches!(&turns[1], Turn::ToolCall(call) if call.id == "call_x"));
        assert!(
            matches!(&turns[2], Turn::ToolResult { call_id, is_error: true, content } if call_id == "call_x" && content.contains("invalid arguments"))
        );
    }

    #[tokio::test]
    async fn test_oracle_failure_fails_request() {
        let (mut client, ticks) = client().await;
        let dispatcher = Dispatcher::new(DecisionAdapter::new(Arc::new(UnreachableOracle)), 10);

        let outcome = dispatcher.run(&mut client, &mut conversation(), "hi").await;
        assert_eq!(
            outcome.text(),
            "Error: decision oracle unavailable: connection refused"
        );
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_budget_is_per_request() {
        let (mut client, _) = client().await;
        let oracle = ScriptedOracle::new(vec![
            greet("Hi"),
            greet("yo"),
            Proposal::Answer("first".into()),
            greet("Hi"),
            greet("yo"),
            Proposal::Answer("second".into()),
        ]);
        let dispatcher = Dispatcher::new(DecisionAdapter::new(oracle), 3);
        let mut state = conversation();

        let first = dispatcher.run(&mut client, &mut state, "one").await;
        let second = dispatcher.run(&mut client, &mut state, "two").await;
        assert_eq!(
            first,
            DispatchOutcome::Answered {
                text: "first".into(),
                steps_used: 2
            }
        );
        assert_eq!(
            second,
            DispatchOutcome::Answered {
                text: "second".into(),
                steps_used: 2
            }
        );
    }

    // ── Truncation ──

    #[test]
    fn test_truncate_short_result_untouched() {
        assert_eq!(truncate_tool_result("Hello!", "demoFacade.greet"), "Hello!");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let long = "é".repeat(MAX_TOOL_RESULT_CHARS + 10);
        let out = truncate_tool_result(&long, "emailFacade.get_latest_email");
        let (kept, notice) = out.split_once("\n\n").unwrap();
        assert_eq!(kept.chars().count(), MAX_TOOL_RESULT_CHARS);
        assert_eq!(
            notice,
            format!(
                "[... truncated: showing first {MAX_TOOL_RESULT_CHARS} of {} chars]",
                MAX_TOOL_RESULT_CHARS + 10
            )
        );
    }
}
