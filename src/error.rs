//! Error types for the retrieval engine.
//!
//! Missing and stale indices are deliberately absent from this enum: they are
//! reported as [`crate::index::IndexStatus`] values so callers can degrade
//! gracefully instead of handling an error path.

use std::time::Duration;

/// Errors produced by indexing, embedding and search operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing credentials, mismatched embedding dimensions, invalid
    /// globs. Fatal and never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rate limiting, 5xx responses, connection resets. Retried with backoff.
    #[error("transient provider error from {provider}: {message}")]
    TransientProvider {
        provider: String,
        message: String,
        rate_limited: bool,
    },

    /// Non-transient provider failure, or a transient one after retries ran out.
    #[error("provider error from {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Syntax tree construction failed. The chunker recovers from this locally.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Another process holds the index write lock.
    #[error("a refresh is already running for {0}")]
    RefreshInProgress(String),

    /// An operation exceeded its wall-clock budget.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("vector index error: {0}")]
    Arroy(#[from] arroy::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the retry combinator should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientProvider { .. })
    }

    /// Whether the provider explicitly signalled rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::TransientProvider {
                rate_limited: true,
                ..
            }
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::Configuration(format!(
            "embedding dimension mismatch: expected {expected}, got {actual}"
        ))
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
