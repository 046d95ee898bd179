use crate::config::{EnrichmentConfig, Secret};
use crate::embed::{http_client, send_error, status_error};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Single-shot text completion used to describe chunks.
///
/// One attempt per call; failures are classified the same way as embedding
/// providers so the shared retry combinator applies.
#[async_trait]
pub trait TextCompleter: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ApiMessage<'a>; 1],
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Anthropic Messages API completer
pub struct AnthropicCompleter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicCompleter {
    pub fn new(
        model: String,
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
        })
    }

    /// Build from configuration.
    ///
    /// Without an explicit key the conventional variable is tried; `None`
    /// means enrichment is unavailable. An explicit key that does not
    /// resolve is a configuration error.
    pub fn from_config(config: &EnrichmentConfig, timeout: Duration) -> Result<Option<Self>> {
        let api_key = match &config.api_key {
            Some(secret) => secret.resolve()?,
            None => match Secret::parse(&format!("env:{DEFAULT_KEY_VAR}"))?.resolve() {
                Ok(key) => key,
                Err(_) => return Ok(None),
            },
        };
        Self::new(config.model.clone(), api_key, config.base_url.clone(), timeout).map(Some)
    }
}

#[async_trait]
impl TextCompleter for AnthropicCompleter {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: [ApiMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("anthropic", e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| send_error("anthropic", e))?;
        if !status.is_success() {
            tracing::debug!("Anthropic API error {status}: {text}");
            return Err(status_error("anthropic", status, &text));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)?;
        let joined: String = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if joined.trim().is_empty() {
            return Err(Error::Provider {
                provider: "anthropic".to_string(),
                message: "empty completion".to_string(),
            });
        }
        Ok(joined)
    }
}
