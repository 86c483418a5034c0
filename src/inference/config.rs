//! Model endpoint configuration.
//!
//! The host config embeds one `ModelConfig` under `model:`; every field has a
//! default pointing at Gemini's OpenAI-compatible endpoint.

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-lite";
pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// A single model endpoint's runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier sent in the request body.
    pub model_name: String,
    /// Base URL; `/chat/completions` is appended.
    pub base_url: String,
    /// Environment variable holding the bearer token. `None` sends no auth
    /// header (local OpenAI-compatible servers).
    pub api_key_env: Option<String>,
    pub temperature: f32,
    /// Omitted from the request when `None`.
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: Some(DEFAULT_API_KEY_ENV.to_string()),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ModelConfig {
    /// Resolve the API key from the environment.
    pub fn resolve_api_key(&self) -> Result<Option<String>, InferenceError> {
        let Some(var) = &self.api_key_env else {
            return Ok(None);
        };
        std::env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(Some)
            .ok_or_else(|| InferenceError::MissingApiKey { var: var.clone() })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
