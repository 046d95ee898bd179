use super::hash::HashEmbedder;
use super::local::{LocalEmbedder, LocalModel};
use super::remote::{OpenAiEmbedder, VoyageEmbedder};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Turns text into fixed-dimension vectors.
///
/// Implementations make one attempt per call and classify failures as
/// transient or not; batching and retries live in [`super::BatchEmbedder`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider-qualified model name, e.g. `openai:text-embedding-3-small`
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Most inputs the backend accepts in one request
    fn max_batch(&self) -> usize;

    /// Embed every input, in order. Returns exactly one vector per input.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query. Backends with asymmetric query encoding
    /// override this.
    async fn embed_query_text(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider {
                provider: self.name().to_string(),
                message: "no embedding returned for query".to_string(),
            })
    }
}

/// Supported backends, selected once from `embeddingModel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    /// On-device model run through fastembed
    Local(LocalModel),
    /// OpenAI `/embeddings`
    OpenAi { model: String, dimensions: usize },
    /// Voyage AI `/embeddings`
    Voyage { model: String, dimensions: usize },
    /// Deterministic feature hashing; no model, no network
    Hash { dimensions: usize },
}

impl ProviderKind {
    /// Parse `local:<model>`, `openai:<model>`, `voyage:<model>` or `hash:<dims>`
    pub fn parse(spec: &str) -> Result<Self> {
        let (backend, model) = spec.split_once(':').ok_or_else(|| {
            Error::config(format!(
                "embeddingModel must be provider-qualified (e.g. local:bge-small), got {spec:?}"
            ))
        })?;

        match backend {
            "local" => LocalModel::from_name(model)
                .map(Self::Local)
                .ok_or_else(|| Error::config(format!("unknown local embedding model {model:?}"))),
            "openai" => {
                let dimensions = match model {
                    "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
                    "text-embedding-3-large" => 3072,
                    _ => {
                        return Err(Error::config(format!(
                            "unknown OpenAI embedding model {model:?}"
                        )))
                    }
                };
                Ok(Self::OpenAi {
                    model: model.to_string(),
                    dimensions,
                })
            }
            "voyage" => {
                let dimensions = match model {
                    "voyage-code-3" | "voyage-3" | "voyage-3-large" => 1024,
                    "voyage-3-lite" => 512,
                    "voyage-code-2" => 1536,
                    _ => {
                        return Err(Error::config(format!(
                            "unknown Voyage embedding model {model:?}"
                        )))
                    }
                };
                Ok(Self::Voyage {
                    model: model.to_string(),
                    dimensions,
                })
            }
            "hash" => model
                .parse::<usize>()
                .ok()
                .filter(|d| *d > 0)
                .map(|dimensions| Self::Hash { dimensions })
                .ok_or_else(|| Error::config(format!("hash embedder needs a dimension, got {model:?}"))),
            other => Err(Error::config(format!(
                "unknown embedding provider {other:?} (expected local, openai or voyage)"
            ))),
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Self::Local(model) => model.dimensions(),
            Self::OpenAi { dimensions, .. }
            | Self::Voyage { dimensions, .. }
            | Self::Hash { dimensions } => *dimensions,
        }
    }

    /// Whether calls leave the machine (and cost money)
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::OpenAi { .. } | Self::Voyage { .. })
    }

    /// Published price in USD per million input tokens, for remote models
    pub fn price_per_million_tokens(&self) -> Option<f64> {
        match self {
            Self::OpenAi { model, .. } => Some(match model.as_str() {
                "text-embedding-3-large" => 0.13,
                "text-embedding-ada-002" => 0.10,
                _ => 0.02,
            }),
            Self::Voyage { model, .. } => Some(match model.as_str() {
                "voyage-3-lite" => 0.02,
                "voyage-3" => 0.06,
                _ => 0.18,
            }),
            Self::Local(_) | Self::Hash { .. } => None,
        }
    }

    /// Construct the provider. Remote credentials are resolved here.
    pub fn build(&self, config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
        let embedding = &config.embedding;
        let timeout = config.request_timeout();
        let provider: Arc<dyn EmbeddingProvider> = match self {
            Self::Local(model) => Arc::new(LocalEmbedder::new(*model)),
            Self::OpenAi { model, dimensions } => {
                let key = remote_key(embedding.api_key.as_ref(), "OPENAI_API_KEY")?;
                Arc::new(OpenAiEmbedder::new(
                    model.clone(),
                    *dimensions,
                    key,
                    embedding.base_url.clone(),
                    timeout,
                )?)
            }
            Self::Voyage { model, dimensions } => {
                let key = remote_key(embedding.api_key.as_ref(), "VOYAGE_API_KEY")?;
                Arc::new(VoyageEmbedder::new(
                    model.clone(),
                    *dimensions,
                    key,
                    embedding.base_url.clone(),
                    timeout,
                )?)
            }
            Self::Hash { dimensions } => Arc::new(HashEmbedder::new(*dimensions)),
        };
        Ok(provider)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(model) => write!(f, "local:{}", model.short_name()),
            Self::OpenAi { model, .. } => write!(f, "openai:{model}"),
            Self::Voyage { model, .. } => write!(f, "voyage:{model}"),
            Self::Hash { dimensions } => write!(f, "hash:{dimensions}"),
        }
    }
}

/// Configured secret, or the provider's conventional variable
fn remote_key(secret: Option<&crate::config::Secret>, default_var: &str) -> Result<String> {
    match secret {
        Some(secret) => secret.resolve(),
        None => crate::config::Secret::parse(&format!("env:{default_var}"))?.resolve(),
    }
}

/// Build the provider named by the configuration
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    ProviderKind::parse(&config.embedding_model)?.build(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_models() {
        assert_eq!(
            ProviderKind::parse("local:bge-small").unwrap(),
            ProviderKind::Local(LocalModel::BgeSmallEnV15)
        );
        assert_eq!(
            ProviderKind::parse("openai:text-embedding-3-small")
                .unwrap()
                .dimensions(),
            1536
        );
        assert_eq!(
            ProviderKind::parse("voyage:voyage-code-3").unwrap().dimensions(),
            1024
        );
        assert_eq!(
            ProviderKind::parse("hash:64").unwrap(),
            ProviderKind::Hash { dimensions: 64 }
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        for bad in ["bge-small", "cohere:embed", "openai:gpt-4", "local:nope", "hash:0"] {
            assert!(
                matches!(ProviderKind::parse(bad), Err(Error::Configuration(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_display_round_trips() {
        for spec in ["local:bge-small", "openai:text-embedding-3-large", "voyage:voyage-3", "hash:8"] {
            assert_eq!(ProviderKind::parse(spec).unwrap().to_string(), spec);
        }
    }

    #[test]
    fn test_remote_pricing() {
        assert!(ProviderKind::parse("local:bge-small")
            .unwrap()
            .price_per_million_tokens()
            .is_none());
        assert!(ProviderKind::parse("openai:text-embedding-3-small")
            .unwrap()
            .is_remote());
    }

    #[test]
    fn test_remote_build_requires_credentials() {
        let mut config = Config::default();
        config.embedding_model = "voyage:voyage-code-3".to_string();
        config.embedding.api_key =
            Some(crate::config::Secret::parse("env:SEMINDEX_TEST_UNSET_VOYAGE_KEY").unwrap());

        let result = provider_from_config(&config);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_hash_build() {
        let mut config = Config::default();
        config.embedding_model = "hash:32".to_string();
        let provider = provider_from_config(&config).unwrap();
        assert_eq!(provider.dimensions(), 32);
        assert_eq!(provider.name(), "hash:32");
    }
}
