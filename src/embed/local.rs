use super::EmbeddingProvider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Available on-device embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalModel {
    /// BGE Small EN v1.5 - 384 dimensions, good balance of speed/quality
    BgeSmallEnV15,
    /// All-MiniLM-L6-v2 - 384 dimensions, fast and efficient
    AllMiniLmL6V2,
    /// BGE Base EN v1.5 - 768 dimensions, higher quality
    BgeBaseEnV15,
    /// mxbai-embed-large-v1 - 1024 dimensions, best quality
    MxbaiEmbedLargeV1,
}

impl LocalModel {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bge-small" | "bge-small-en-v1.5" => Some(Self::BgeSmallEnV15),
            "minilm" | "all-minilm-l6-v2" => Some(Self::AllMiniLmL6V2),
            "bge-base" | "bge-base-en-v1.5" => Some(Self::BgeBaseEnV15),
            "mxbai-large" | "mxbai-embed-large-v1" => Some(Self::MxbaiEmbedLargeV1),
            _ => None,
        }
    }

    pub fn to_fastembed_model(&self) -> FastEmbedModel {
        match self {
            Self::BgeSmallEnV15 => FastEmbedModel::BGESmallENV15,
            Self::AllMiniLmL6V2 => FastEmbedModel::AllMiniLML6V2,
            Self::BgeBaseEnV15 => FastEmbedModel::BGEBaseENV15,
            Self::MxbaiEmbedLargeV1 => FastEmbedModel::MxbaiEmbedLargeV1,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Self::BgeSmallEnV15 => 384,
            Self::AllMiniLmL6V2 => 384,
            Self::BgeBaseEnV15 => 768,
            Self::MxbaiEmbedLargeV1 => 1024,
        }
    }

    /// Name used in `embeddingModel`
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::BgeSmallEnV15 => "bge-small",
            Self::AllMiniLmL6V2 => "minilm",
            Self::BgeBaseEnV15 => "bge-base",
            Self::MxbaiEmbedLargeV1 => "mxbai-large",
        }
    }

    pub fn repo_name(&self) -> &'static str {
        match self {
            Self::BgeSmallEnV15 => "BAAI/bge-small-en-v1.5",
            Self::AllMiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::BgeBaseEnV15 => "BAAI/bge-base-en-v1.5",
            Self::MxbaiEmbedLargeV1 => "mixedbread-ai/mxbai-embed-large-v1",
        }
    }
}

/// fastembed model, loaded on first use and run on the blocking pool
pub struct LocalEmbedder {
    model_type: LocalModel,
    name: String,
    model: Arc<Mutex<Option<TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(model_type: LocalModel) -> Self {
        Self {
            model_type,
            name: format!("local:{}", model_type.short_name()),
            model: Arc::new(Mutex::new(None)),
        }
    }

    fn cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("semindex")
            .join("models")
    }

    fn load(model_type: LocalModel) -> Result<TextEmbedding> {
        info!(
            model = model_type.repo_name(),
            dimensions = model_type.dimensions(),
            "Loading embedding model"
        );
        TextEmbedding::try_new(
            InitOptions::new(model_type.to_fastembed_model())
                .with_cache_dir(Self::cache_dir())
                .with_show_download_progress(false),
        )
        .map_err(|e| Error::Provider {
            provider: "local".to_string(),
            message: format!("failed to initialize embedding model: {e}"),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.model_type.dimensions()
    }

    fn max_batch(&self) -> usize {
        256
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.clone();
        let model_type = self.model_type;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| Error::Other("embedding model lock poisoned".to_string()))?;
            if guard.is_none() {
                *guard = Some(Self::load(model_type)?);
            }
            let embedder = guard
                .as_mut()
                .ok_or_else(|| Error::Other("embedding model not loaded".to_string()))?;

            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            embedder.embed(refs, None).map_err(|e| Error::Provider {
                provider: "local".to_string(),
                message: format!("failed to generate embeddings: {e}"),
            })
        })
        .await
        .map_err(|e| Error::Other(format!("embedding task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dimensions() {
        assert_eq!(LocalModel::BgeSmallEnV15.dimensions(), 384);
        assert_eq!(LocalModel::AllMiniLmL6V2.dimensions(), 384);
        assert_eq!(LocalModel::BgeBaseEnV15.dimensions(), 768);
        assert_eq!(LocalModel::MxbaiEmbedLargeV1.dimensions(), 1024);
    }

    #[test]
    fn test_model_names() {
        assert_eq!(LocalModel::from_name("bge-small"), Some(LocalModel::BgeSmallEnV15));
        assert_eq!(LocalModel::from_name("minilm"), Some(LocalModel::AllMiniLmL6V2));
        assert_eq!(LocalModel::BgeBaseEnV15.repo_name(), "BAAI/bge-base-en-v1.5");
        assert!(LocalModel::from_name("gpt").is_none());
    }

    #[tokio::test]
    #[ignore] // Requires model download
    async fn test_local_embedding() {
        let embedder = LocalEmbedder::new(LocalModel::BgeSmallEnV15);
        let vectors = embedder
            .embed_texts(&["fn authenticate(user: &str) -> bool".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 384);
    }
}
