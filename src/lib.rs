pub mod chunker;
pub mod cli;
pub mod config;
pub mod database;
pub mod embed;
pub mod enrich;
pub mod error;
pub mod file;
pub mod fts;
pub mod index;
pub mod output;
pub mod rerank;
pub mod search;
pub mod vectordb;

// Re-export commonly used types
pub use chunker::{Chunk, ContentType, SemanticChunker};
pub use config::Config;
pub use embed::{BatchEmbedder, EmbeddedChunk, EmbeddingProvider, HashEmbedder};
pub use error::{Error, Result};
pub use file::{FileInfo, FileWalker, Language, WalkStats};
pub use fts::KeywordIndex;
pub use index::{IndexHandle, IndexState, IndexStatus, RefreshMode, StatusReport};
pub use search::{HybridSearcher, QueryRequest, QueryResponse, SearchOptions};
pub use vectordb::{CollectionName, Scope, VectorStore};
