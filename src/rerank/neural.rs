//! Cross-encoder reranking with fastembed's TextRerank (Jina Reranker v1
//! Turbo by default).

use super::Reranker;
use crate::error::{Error, Result};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Neural reranker, loaded on first use and run on the blocking pool
pub struct NeuralReranker {
    model: RerankerModel,
    name: String,
    reranker: Arc<Mutex<Option<TextRerank>>>,
}

impl NeuralReranker {
    pub fn new() -> Self {
        Self::with_model(RerankerModel::JINARerankerV1TurboEn)
    }

    pub fn with_model(model: RerankerModel) -> Self {
        Self {
            name: model.to_string(),
            model,
            reranker: Arc::new(Mutex::new(None)),
        }
    }

    fn load(model: RerankerModel) -> Result<TextRerank> {
        info!(model = %model, "Loading reranker model");
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("semindex")
            .join("models");
        let mut options = RerankInitOptions::default();
        options.model_name = model;
        options.cache_dir = cache_dir;
        options.show_download_progress = false;

        TextRerank::try_new(options).map_err(|e| Error::Provider {
            provider: "reranker".to_string(),
            message: format!("failed to initialize reranker: {e}"),
        })
    }
}

impl Default for NeuralReranker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reranker for NeuralReranker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let reranker = self.reranker.clone();
        let model = self.model.clone();
        let query = query.to_string();
        let documents = documents.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = reranker
                .lock()
                .map_err(|_| Error::Other("reranker lock poisoned".to_string()))?;
            if guard.is_none() {
                *guard = Some(Self::load(model)?);
            }
            let reranker = guard
                .as_mut()
                .ok_or_else(|| Error::Other("reranker not loaded".to_string()))?;

            let refs: Vec<&str> = documents.iter().map(String::as_str).collect();
            let results = reranker
                .rerank(query.as_str(), refs, false, None)
                .map_err(|e| Error::Provider {
                    provider: "reranker".to_string(),
                    message: format!("reranking failed: {e}"),
                })?;

            // Results come back sorted by score; restore input order
            let mut scores = vec![f32::NEG_INFINITY; documents.len()];
            for result in results {
                if let Some(slot) = scores.get_mut(result.index) {
                    *slot = result.score;
                }
            }
            Ok(scores)
        })
        .await
        .map_err(|e| Error::Other(format!("reranker task failed: {e}")))?
    }
}
