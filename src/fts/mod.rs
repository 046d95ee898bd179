//! BM25 keyword search over chunk text
//!
//! Persisted next to the vector collections as `bm25/index.json` (collection
//! statistics) and `bm25/term-chunks.json` (postings).

mod bm25;
mod tokenizer;

pub use bm25::{KeywordIndex, DEFAULT_B, DEFAULT_K1};
pub use tokenizer::{is_stop_word, tokenize};

/// Directory name of the keyword index inside a generation
pub const BM25_DIR: &str = "bm25";

/// Result from keyword search
#[derive(Debug, Clone, PartialEq)]
pub struct FtsResult {
    pub chunk_id: String,
    /// Raw BM25 score (unbounded)
    pub score: f32,
}
