//! Embedding providers and the batching layer that drives them.

mod batch;
mod cache;
mod hash;
mod local;
mod provider;
pub(crate) mod remote;
pub(crate) mod retry;

pub use batch::{cosine_similarity, truncate_chars, BatchEmbedder, EmbeddedChunk, EmbeddingStats};
pub use cache::{CacheStats, QueryCache};
pub use hash::HashEmbedder;
pub use local::{LocalEmbedder, LocalModel};
pub use provider::{provider_from_config, EmbeddingProvider, ProviderKind};
pub use remote::{OpenAiEmbedder, VoyageEmbedder};
pub use retry::{with_retry, RetryPolicy, Sleeper, TokioSleeper};

pub(crate) use remote::{http_client, send_error, status_error};
