//! The query tool contract consumed by agents.

use super::{HybridSearcher, ScoredChunk, SearchOptions};
use crate::chunker::ContentType;
use crate::config::{build_glob_set, SearchConfig};
use crate::error::Result;
use crate::index::IndexStatus;
use crate::vectordb::{Filters, Scope};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Extra results requested when file patterns trim the list afterwards
const PATTERN_OVERFETCH: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryFilters {
    /// Globs matched against project-relative paths, e.g. `src/**/*.ts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_patterns: Option<Vec<String>>,
    /// Language tags such as `rust`, `typescript`, `markdown`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryRequest {
    /// Natural-language or keyword query
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<QueryFilters>,
    /// Number of results; defaults to `search.topK`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub content: String,
    pub file_path: String,
    pub line_range: (usize, usize),
    pub language: String,
    pub score: f32,
    #[serde(rename = "type")]
    pub kind: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl From<ScoredChunk> for QueryResult {
    fn from(scored: ScoredChunk) -> Self {
        let chunk = scored.chunk;
        Self {
            content: chunk.content,
            file_path: chunk.file_path,
            line_range: chunk.line_range,
            language: chunk.language,
            score: scored.score,
            kind: chunk.kind,
            context: chunk.context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    pub index_status: IndexStatus,
    pub query_time_ms: u64,
}

impl QueryResponse {
    /// Answer for a project that has never been indexed
    pub fn missing(started: Instant) -> Self {
        Self {
            results: Vec::new(),
            index_status: IndexStatus::Missing,
            query_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Run one query-tool request against a searcher
pub async fn run_query(
    searcher: &HybridSearcher<'_>,
    request: &QueryRequest,
    defaults: &SearchConfig,
    index_status: IndexStatus,
) -> Result<QueryResponse> {
    let started = Instant::now();
    let top_k = request.top_k.unwrap_or(defaults.top_k);
    let filters = request.filters.clone().unwrap_or_default();

    let patterns = filters.file_patterns.unwrap_or_default();
    let path_filter = if patterns.is_empty() {
        None
    } else {
        Some(build_glob_set(&patterns)?)
    };

    let options = SearchOptions {
        top_k: if path_filter.is_some() {
            top_k.saturating_mul(PATTERN_OVERFETCH)
        } else {
            top_k
        },
        weight: defaults.hybrid_weight,
        scope: Scope::All,
        filters: Filters {
            kind: filters.content_type,
            languages: filters.languages.unwrap_or_default(),
        },
        rerank: defaults.reranking,
    };

    let mut scored = searcher.search(&request.query, &options).await?;
    if let Some(set) = &path_filter {
        scored.retain(|s| set.is_match(&s.chunk.file_path));
    }
    scored.truncate(top_k);

    let results: Vec<QueryResult> = scored.into_iter().map(QueryResult::from).collect();
    let query_time_ms = started.elapsed().as_millis() as u64;
    debug!(
        query = %request.query,
        results = results.len(),
        status = ?index_status,
        query_time_ms,
        "Answered query"
    );

    Ok(QueryResponse {
        results,
        index_status,
        query_time_ms,
    })
}
