//! Hybrid retrieval: vector similarity fused with normalized BM25.

mod query;

pub use query::{run_query, QueryFilters, QueryRequest, QueryResponse, QueryResult};

use crate::chunker::Chunk;
use crate::embed::BatchEmbedder;
use crate::error::Result;
use crate::fts::{FtsResult, KeywordIndex};
use crate::rerank::{blend, Reranker, DEFAULT_RERANK_TOP};
use crate::vectordb::{CollectionName, Filters, Scope, VectorHit, VectorStore};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

/// Upper bound on candidates fetched from each side
pub const MAX_CANDIDATES: usize = 100;

/// Default weight of the vector signal
pub const DEFAULT_HYBRID_WEIGHT: f32 = 0.7;

/// Candidates fetched per side for a result count
pub fn candidate_count(top_k: usize) -> usize {
    top_k.saturating_mul(3).min(MAX_CANDIDATES)
}

/// Combined score for one chunk id
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    pub chunk_id: String,
    pub score: f32,
    /// `1 / (1 + distance)`, 0 when absent from vector results
    pub vector_score: f32,
    /// BM25 divided by this query's maximum, 0 when absent
    pub keyword_score: f32,
}

/// Fuse vector similarities and raw BM25 scores.
///
/// `combined = weight × vector + (1 − weight) × bm25 / max(bm25)`. A chunk
/// seen by only one side scores 0 for the other. The sort is stable over
/// first appearance (vector candidates, then keyword-only ones).
pub fn fuse(vector: &[(String, f32)], keyword: &[FtsResult], weight: f32) -> Vec<FusedScore> {
    let weight = weight.clamp(0.0, 1.0);
    let max_keyword = keyword.iter().map(|r| r.score).fold(0.0f32, f32::max);

    let mut order: Vec<String> = Vec::with_capacity(vector.len() + keyword.len());
    let mut signals: HashMap<String, (f32, f32)> = HashMap::new();

    for (id, similarity) in vector {
        let entry = signals.entry(id.clone()).or_insert_with(|| {
            order.push(id.clone());
            (0.0, 0.0)
        });
        entry.0 = entry.0.max(*similarity);
    }
    for result in keyword {
        let normalized = if max_keyword > 0.0 {
            result.score / max_keyword
        } else {
            0.0
        };
        let entry = signals.entry(result.chunk_id.clone()).or_insert_with(|| {
            order.push(result.chunk_id.clone());
            (0.0, 0.0)
        });
        entry.1 = entry.1.max(normalized);
    }

    let mut fused: Vec<FusedScore> = order
        .into_iter()
        .map(|chunk_id| {
            let (vector_score, keyword_score) = signals[&chunk_id];
            FusedScore {
                score: weight * vector_score + (1.0 - weight) * keyword_score,
                chunk_id,
                vector_score,
                keyword_score,
            }
        })
        .collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

/// A ranked search result
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub vector_score: f32,
    pub keyword_score: f32,
    pub collection: CollectionName,
}

/// Options for one hybrid query
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub weight: f32,
    pub scope: Scope,
    pub filters: Filters,
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            weight: DEFAULT_HYBRID_WEIGHT,
            scope: Scope::All,
            filters: Filters::default(),
            rerank: false,
        }
    }
}

/// Runs hybrid queries against one index generation
pub struct HybridSearcher<'a> {
    store: &'a VectorStore,
    keyword: &'a KeywordIndex,
    embedder: &'a BatchEmbedder,
    reranker: Option<&'a dyn Reranker>,
}

impl<'a> HybridSearcher<'a> {
    pub fn new(store: &'a VectorStore, keyword: &'a KeywordIndex, embedder: &'a BatchEmbedder) -> Self {
        Self {
            store,
            keyword,
            embedder,
            reranker: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Option<&'a dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<ScoredChunk>> {
        if options.top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let candidates = candidate_count(options.top_k);

        let query_vector = self.embedder.embed_query(query).await?;
        let vector_hits =
            self.store
                .search(options.scope, &query_vector, candidates, &options.filters)?;

        let mut chunks: HashMap<String, (Chunk, CollectionName)> = HashMap::new();
        let vector: Vec<(String, f32)> = vector_hits
            .into_iter()
            .map(|VectorHit { chunk, similarity, collection, .. }| {
                let id = chunk.id.clone();
                chunks.insert(id.clone(), (chunk, collection));
                (id, similarity)
            })
            .collect();

        let keyword = self.keyword_candidates(query, candidates, options, &mut chunks)?;
        debug!(
            vector = vector.len(),
            keyword = keyword.len(),
            "Hybrid candidates"
        );

        let fused = fuse(&vector, &keyword, options.weight);
        let mut results: Vec<ScoredChunk> = fused
            .into_iter()
            .filter_map(|f| {
                let (chunk, collection) = chunks.remove(&f.chunk_id)?;
                Some(ScoredChunk {
                    chunk,
                    score: f.score,
                    vector_score: f.vector_score,
                    keyword_score: f.keyword_score,
                    collection,
                })
            })
            .collect();

        if options.rerank {
            if let Some(reranker) = self.reranker {
                results = self.rerank(reranker, query, results).await;
            }
        }

        results.truncate(options.top_k);
        debug!(
            results = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Hybrid search complete"
        );
        Ok(results)
    }

    /// BM25 hits that pass scope and filters, looked up in the store
    fn keyword_candidates(
        &self,
        query: &str,
        candidates: usize,
        options: &SearchOptions,
        chunks: &mut HashMap<String, (Chunk, CollectionName)>,
    ) -> Result<Vec<FtsResult>> {
        let restricted = !options.filters.is_empty() || options.scope != Scope::All;
        let fetch = if restricted {
            self.keyword.len()
        } else {
            candidates
        };

        let mut kept = Vec::new();
        for result in self.keyword.search(query, fetch) {
            if kept.len() == candidates {
                break;
            }
            if chunks.contains_key(&result.chunk_id) {
                kept.push(result);
                continue;
            }
            let Some((chunk, collection)) = self.store.get(&result.chunk_id)? else {
                continue;
            };
            if options.scope.includes(collection) && options.filters.matches(&chunk) {
                chunks.insert(result.chunk_id.clone(), (chunk, collection));
                kept.push(result);
            }
        }
        Ok(kept)
    }

    /// Rerank the head of the fused list. A failing reranker leaves the
    /// fused order untouched.
    async fn rerank(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        mut results: Vec<ScoredChunk>,
    ) -> Vec<ScoredChunk> {
        let head_len = results.len().min(DEFAULT_RERANK_TOP);
        if head_len == 0 {
            return results;
        }
        let tail = results.split_off(head_len);
        let documents: Vec<String> = results.iter().map(|r| r.chunk.embedding_text()).collect();
        let fused: Vec<f32> = results.iter().map(|r| r.score).collect();

        match reranker.score(query, &documents).await {
            Ok(scores) if scores.len() == results.len() => {
                for (result, score) in results.iter_mut().zip(blend(&scores, &fused)) {
                    result.score = score;
                }
                results.sort_by(|a, b| b.score.total_cmp(&a.score));
            }
            Ok(scores) => warn!(
                expected = results.len(),
                received = scores.len(),
                "Reranker returned wrong score count, keeping fused order"
            ),
            Err(err) => warn!(error = %err, "Reranking failed, keeping fused order"),
        }

        results.extend(tail);
        results
    }
}
