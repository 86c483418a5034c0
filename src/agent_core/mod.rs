//! Agent Core: the routing host's decision loop.
//!
//! Submodules:
//! - `conversation`: Turn history and the cross-request policy
//! - `oracle`: Decision oracle trait, LLM-backed oracle, decision validation
//! - `dispatch`: Step budget and the decide / act loop
//! - `errors`: Oracle, decision and dispatch error types

pub mod conversation;
pub mod dispatch;
pub mod errors;
pub mod oracle;

// Re-exports for convenience
pub use conversation::{ConversationPolicy, ConversationState, Turn, DEFAULT_HISTORY_REQUESTS};
pub use dispatch::{DispatchOutcome, Dispatcher, StepBudget, DEFAULT_MAX_STEPS};
pub use errors::{DecisionError, DispatchError, OracleError};
pub use oracle::{Decision, DecisionAdapter, DecisionOracle, LlmOracle, Proposal, ToolInvocation};
