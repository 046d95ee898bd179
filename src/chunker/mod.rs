use crate::config::ChunkStrategy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

mod extractor;
mod grammar;
mod markdown;
mod parser;
mod semantic;
mod window;

pub use semantic::SemanticChunker;

/// Chunks shorter than this after trimming are never indexed
pub const MIN_CHUNK_CHARS: usize = 20;

/// Characters per token used for size estimates
pub const CHARS_PER_TOKEN: usize = 4;

/// A unit of retrievable text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable key derived from `(file_path, start_line, end_line)`
    pub id: String,

    pub content: String,

    /// Project-relative path, or `database:<table>` for schema chunks
    pub file_path: String,

    /// 1-indexed inclusive line range (column count for schema chunks)
    pub line_range: (usize, usize),

    /// Language tag such as `typescript`, `sql`, `markdown`, `unknown`
    pub language: String,

    #[serde(rename = "type")]
    pub kind: ContentType,

    /// Situating description added by the contextual enricher
    pub context: Option<String>,

    /// Name of the definition or heading the chunk was cut from
    pub symbol: Option<String>,
}

impl Chunk {
    pub fn new(
        file_path: impl Into<String>,
        line_range: (usize, usize),
        content: String,
        language: impl Into<String>,
        kind: ContentType,
    ) -> Self {
        let file_path = file_path.into();
        Self {
            id: chunk_id(&file_path, line_range.0, line_range.1),
            content,
            file_path,
            line_range,
            language: language.into(),
            kind,
            context: None,
            symbol: None,
        }
    }

    pub fn with_symbol(mut self, symbol: Option<String>) -> Self {
        self.symbol = symbol;
        self
    }

    /// Estimated token count of the content
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }

    /// Text submitted to the embedding model
    pub fn embedding_text(&self) -> String {
        match &self.context {
            Some(context) => format!("{context}\n\n{}", self.content),
            None => self.content.clone(),
        }
    }
}

/// Deterministic id for a chunk location
pub fn chunk_id(file_path: &str, start_line: usize, end_line: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{file_path}:{start_line}:{end_line}").as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Rough token estimate (~4 characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Kind of content a chunk carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Code,
    Schema,
    Config,
    Docs,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Schema => "schema",
            Self::Config => "config",
            Self::Docs => "docs",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code" => Ok(Self::Code),
            "schema" => Ok(Self::Schema),
            "config" => Ok(Self::Config),
            "docs" => Ok(Self::Docs),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Size limits for chunking
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Ceiling for a syntax-node chunk before it is split
    pub max_tokens: usize,
    /// Content overlap carried into each split part
    pub split_overlap_tokens: usize,
    /// Sliding-window size for the fallback path
    pub window_tokens: usize,
    pub window_overlap_tokens: usize,
    pub min_chars: usize,
    pub strategy: ChunkStrategy,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            split_overlap_tokens: 50,
            window_tokens: 256,
            window_overlap_tokens: 50,
            min_chars: MIN_CHUNK_CHARS,
            strategy: ChunkStrategy::Semantic,
        }
    }
}

impl ChunkerConfig {
    pub fn with_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Drop chunks whose trimmed content is below the minimum length
pub fn retain_valid(chunks: Vec<Chunk>, min_chars: usize) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter(|c| c.content.trim().chars().count() >= min_chars)
        .collect()
}
