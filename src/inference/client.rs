//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests to the configured endpoint
//! and retries transient failures with exponential backoff.

use std::time::Duration;

use reqwest::Client as HttpClient;

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::tool_call_parser::parse_completion_response;
use super::types::{ChatCompletionRequest, ChatMessage, CompletionResponse, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum retry attempts for transient inference errors.
const MAX_RETRIES: u32 = 2;

/// Base delay between retries (doubles each attempt).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for one OpenAI-compatible chat completions endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: ModelConfig,
    api_key: Option<String>,
}

impl InferenceClient {
    /// Build a client. Fails if the configured API key variable is unset.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: ModelConfig) -> Result<Self, InferenceError> {
        let api_key = config.resolve_api_key()?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    // ─── Chat Completion ─────────────────────────────────────────────────

    /// Send a chat completion request, retrying transient failures.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<CompletionResponse, InferenceError> {
        let body = ChatCompletionRequest {
            model: self.config.model_name.clone(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            match self.send_once(&body).await {
                Err(e) if e.is_retriable() && attempt < MAX_RETRIES => {
                    tracing::warn!(attempt, error = %e, "inference request failed, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_once(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<CompletionResponse, InferenceError> {
        let url = self.config.completions_url();

        // Request metadata only; the body can be large.
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "LLM request"
        );

        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.timeout_secs,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::MalformedResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_completion_response(&body_text)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
