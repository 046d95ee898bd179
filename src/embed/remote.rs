//! Hosted embedding APIs (OpenAI and Voyage AI).

use super::EmbeddingProvider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(Error::Http)
}

/// Map an HTTP status to the error taxonomy: 429 and 5xx are transient,
/// everything else (auth, malformed input) is not.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> Error {
    let snippet: String = body.chars().take(300).collect();
    let message = format!("request failed (status {status}): {snippet}");
    if status == StatusCode::TOO_MANY_REQUESTS {
        Error::TransientProvider {
            provider: provider.to_string(),
            message,
            rate_limited: true,
        }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Error::TransientProvider {
            provider: provider.to_string(),
            message,
            rate_limited: false,
        }
    } else {
        Error::Provider {
            provider: provider.to_string(),
            message,
        }
    }
}

/// Connection failures and timeouts are transient
pub(crate) fn send_error(provider: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        Error::TransientProvider {
            provider: provider.to_string(),
            message: err.to_string(),
            rate_limited: false,
        }
    } else {
        Error::Http(err)
    }
}

/// Shared request plumbing for `/embeddings` style endpoints
struct EmbeddingsEndpoint {
    provider: &'static str,
    name: String,
    model: String,
    dimensions: usize,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl EmbeddingsEndpoint {
    async fn post(&self, input: &[String], input_type: Option<&str>) -> Result<Vec<Vec<f32>>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input,
            input_type,
        };
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(self.provider, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| send_error(self.provider, e))?;
        if !status.is_success() {
            tracing::debug!("{} embedding API error {status}: {text}", self.provider);
            return Err(status_error(self.provider, status, &text));
        }

        let mut parsed: EmbeddingResponse = serde_json::from_str(&text)?;
        parsed.data.sort_by_key(|d| d.index);
        if parsed.data.len() != input.len() {
            return Err(Error::Provider {
                provider: self.provider.to_string(),
                message: format!(
                    "expected {} embeddings, received {}",
                    input.len(),
                    parsed.data.len()
                ),
            });
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

pub struct OpenAiEmbedder {
    endpoint: EmbeddingsEndpoint,
}

impl OpenAiEmbedder {
    pub fn new(
        model: String,
        dimensions: usize,
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: EmbeddingsEndpoint {
                provider: "openai",
                name: format!("openai:{model}"),
                model,
                dimensions,
                api_key,
                base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                client: http_client(timeout)?,
            },
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    fn dimensions(&self) -> usize {
        self.endpoint.dimensions
    }

    fn max_batch(&self) -> usize {
        2048
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.endpoint.post(texts, None).await
    }
}

pub struct VoyageEmbedder {
    endpoint: EmbeddingsEndpoint,
}

impl VoyageEmbedder {
    pub fn new(
        model: String,
        dimensions: usize,
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: EmbeddingsEndpoint {
                provider: "voyage",
                name: format!("voyage:{model}"),
                model,
                dimensions,
                api_key,
                base_url: base_url.unwrap_or_else(|| VOYAGE_BASE_URL.to_string()),
                client: http_client(timeout)?,
            },
        })
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageEmbedder {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    fn dimensions(&self) -> usize {
        self.endpoint.dimensions
    }

    fn max_batch(&self) -> usize {
        128
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.endpoint.post(texts, Some("document")).await
    }

    async fn embed_query_text(&self, text: &str) -> Result<Vec<f32>> {
        self.endpoint
            .post(&[text.to_string()], Some("query"))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider {
                provider: "voyage".to_string(),
                message: "no embedding returned for query".to_string(),
            })
    }
}
