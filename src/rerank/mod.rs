//! Optional second-pass reranking of fused candidates.

mod neural;

pub use neural::NeuralReranker;

use crate::error::Result;
use async_trait::async_trait;

/// Fused candidates considered for reranking
pub const DEFAULT_RERANK_TOP: usize = 150;

/// Share of the final score taken from the reranker
pub const RERANK_WEIGHT: f32 = 0.575;
/// Share kept from the fused hybrid score
pub const FUSED_WEIGHT: f32 = 0.425;

/// Scores query/document pairs; higher is more relevant.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// One raw score per document, in input order
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// Blend raw reranker scores with fused scores.
///
/// Reranker scores go through a sigmoid (cross-encoder logits can be
/// negative); fused scores are min-max normalized over the candidate set.
pub fn blend(rerank_scores: &[f32], fused_scores: &[f32]) -> Vec<f32> {
    let min = fused_scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = fused_scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = (max - min).max(0.0001);

    rerank_scores
        .iter()
        .zip(fused_scores)
        .map(|(rerank, fused)| {
            RERANK_WEIGHT * sigmoid(*rerank) + FUSED_WEIGHT * ((fused - min) / range)
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
