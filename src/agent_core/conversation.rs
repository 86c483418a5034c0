//! ConversationState: the turns of one host session.
//!
//! Responsibilities:
//! - Record user text, oracle decisions, tool results and host notices
//! - Apply the cross-request policy (persist or reset)
//! - Keep only the most recent requests so the oracle's context stays bounded
//! - Build `Vec<ChatMessage>` for the inference client

use serde::{Deserialize, Serialize};

use crate::inference::types::{ChatMessage, ToolCall};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Requests kept in full under `Persist`, the current one included.
///
/// Older requests are evicted whole, so a tool call never loses its result.
pub const DEFAULT_HISTORY_REQUESTS: usize = 8;

// ─── Policy ─────────────────────────────────────────────────────────────────

/// What happens to history when a new top-level request arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationPolicy {
    /// Keep earlier requests as context.
    #[default]
    Persist,
    /// Start every request from an empty history.
    Reset,
}

// ─── Turn ───────────────────────────────────────────────────────────────────

/// One entry in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User(String),
    /// A tool call the oracle proposed, as it named it.
    ToolCall(ToolCall),
    /// The result paired with a `ToolCall` turn by id.
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
    /// Host feedback not attached to any tool call (e.g. an empty decision).
    Notice(String),
    Answer(String),
}

// ─── ConversationState ──────────────────────────────────────────────────────

/// Ordered, append-only history plus the system prompt that heads it.
#[derive(Debug, Clone)]
pub struct ConversationState {
    system_prompt: String,
    policy: ConversationPolicy,
    history_requests: usize,
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new(system_prompt: impl Into<String>, policy: ConversationPolicy) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            policy,
            history_requests: DEFAULT_HISTORY_REQUESTS,
            turns: Vec::new(),
        }
    }

    /// Cap the number of requests kept in history (at least one).
    pub fn with_history_limit(mut self, requests: usize) -> Self {
        self.history_requests = requests.max(1);
        self
    }

    /// Seed a new top-level request.
    pub fn begin_request(&mut self, text: &str) {
        if self.policy == ConversationPolicy::Reset {
            self.turns.clear();
        }
        self.turns.push(Turn::User(text.to_string()));
        self.evict_old_requests();
    }

    /// Drop whole request groups (a `User` turn and everything up to the
    /// next one) beyond the history limit.
    fn evict_old_requests(&mut self) {
        let starts: Vec<usize> = self
            .turns
            .iter()
            .enumerate()
            .filter(|(_, turn)| matches!(turn, Turn::User(_)))
            .map(|(i, _)| i)
            .collect();
        if starts.len() <= self.history_requests {
            return;
        }
        let cut = starts[starts.len() - self.history_requests];
        self.turns.drain(..cut);
        tracing::debug!(
            evicted_requests = starts.len() - self.history_requests,
            evicted_turns = cut,
            "evicted old requests from history"
        );
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn policy(&self) -> ConversationPolicy {
        self.policy
    }

    pub fn history_limit(&self) -> usize {
        self.history_requests
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Messages for the oracle, system prompt first.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.as_str()));
        }
        for turn in &self.turns {
            messages.push(match turn {
                Turn::User(text) => ChatMessage::user(text.as_str()),
                Turn::ToolCall(call) => ChatMessage::assistant_tool_call(call),
                Turn::ToolResult {
                    call_id, content, ..
                } => ChatMessage::tool_result(call_id, content.as_str()),
                Turn::Notice(text) => ChatMessage::user(format!("[routing host] {text}")),
                Turn::Answer(text) => ChatMessage::assistant(text.as_str()),
            });
        }
        messages
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
