//! HTTP client for the external match judge.
//!
//! [`ChatJudge`] talks to any OpenAI-compatible chat completions endpoint
//! (OpenRouter by default). One call is one HTTP request: retries and
//! fallback belong to the caller, which knows whether a failure is worth
//! waiting for.
//!
//! # Error classification
//!
//! - HTTP 429 and 5xx → retryable [`DetectionError::ExternalService`]
//! - Network errors and timeouts → retryable
//! - Other non-2xx → not retryable
//! - A 2xx body without `choices[0].message.content` → not retryable

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use content_guard_core::judge::Judge;
use content_guard_core::DetectionError;

use crate::config::JudgeConfig;

/// Judge backed by a chat completions API.
pub struct ChatJudge {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    referer: Option<String>,
    app_title: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl ChatJudge {
    /// Build a client, reading the API key from `config.api_key_env`.
    pub fn new(config: &JudgeConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &JudgeConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("judge.model required for provider '{}'", config.provider))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model,
            referer: config.referer.clone(),
            app_title: config.app_title.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Judge for ChatJudge {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, DetectionError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(referer) = &self.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.app_title {
            request = request.header("X-Title", title);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DetectionError::external(format!("judge request failed: {}", e), true))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err(DetectionError::external(
                format!("judge API error {}: {}", status, body_text),
                retryable,
            ));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            DetectionError::external(format!("judge response is not JSON: {}", e), false)
        })?;
        let content = parse_chat_response(&json)?;
        debug!(model = %self.model, chars = content.len(), "judge replied");
        Ok(content)
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, DetectionError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            DetectionError::external("invalid judge response: missing choices[0].message.content", false)
        })
}

/// Create the configured judge, or `None` when the provider is disabled.
pub fn create_judge(config: &JudgeConfig) -> Result<Option<Arc<dyn Judge>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openrouter" => Ok(Some(Arc::new(ChatJudge::new(config)?))),
        other => bail!("Unknown judge provider: {}", other),
    }
}
