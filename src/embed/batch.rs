use super::cache::{CacheStats, QueryCache};
use super::retry::{with_retry, RetryPolicy, Sleeper, TokioSleeper};
use super::EmbeddingProvider;
use crate::chunker::Chunk;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Chunk with its embedding
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self { chunk, vector }
    }
}

/// Statistics for one embedding pass
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStats {
    pub total_chunks: usize,
    pub batches: usize,
    pub truncated_inputs: usize,
    pub total_time_ms: u128,
}

impl EmbeddingStats {
    pub fn chunks_per_second(&self) -> f32 {
        if self.total_time_ms == 0 {
            return 0.0;
        }
        (self.total_chunks as f32 / self.total_time_ms as f32) * 1000.0
    }
}

/// Batches chunk texts through a provider with bounded concurrency,
/// per-batch timeouts and retries.
///
/// A call either embeds every chunk or fails; partial results are never
/// returned.
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_input_chars: usize,
    max_concurrency: usize,
    batch_timeout: Duration,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    query_cache: QueryCache,
}

impl BatchEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            batch_size: config.batch_size.max(1),
            max_input_chars: config.max_input_chars.max(1),
            max_concurrency: config.max_concurrency.max(1),
            batch_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            query_cache: QueryCache::default(),
        }
    }

    /// Replace the retry schedule and the sleeper it waits on
    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Inputs per request: the configured size, capped by the backend
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.min(self.provider.max_batch()).max(1)
    }

    /// Embed all chunks, in order
    pub async fn embed_batch(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>> {
        Ok(self.embed_batch_with_stats(chunks).await?.0)
    }

    pub async fn embed_batch_with_stats(
        &self,
        chunks: Vec<Chunk>,
    ) -> Result<(Vec<EmbeddedChunk>, EmbeddingStats)> {
        let mut stats = EmbeddingStats {
            total_chunks: chunks.len(),
            ..Default::default()
        };
        if chunks.is_empty() {
            return Ok((Vec::new(), stats));
        }

        let start = Instant::now();
        let texts: Vec<String> = chunks
            .iter()
            .map(|chunk| {
                let (text, truncated) = self.prepare_text(chunk);
                if truncated {
                    stats.truncated_inputs += 1;
                }
                text
            })
            .collect();

        let batch_size = self.effective_batch_size();
        let batches: Vec<Vec<String>> = texts.chunks(batch_size).map(<[String]>::to_vec).collect();
        stats.batches = batches.len();
        info!(
            chunks = chunks.len(),
            batches = batches.len(),
            batch_size,
            provider = self.provider.name(),
            "Embedding chunks"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set = JoinSet::new();
        for (idx, batch) in batches.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let provider = self.provider.clone();
            let retry = self.retry.clone();
            let sleeper = self.sleeper.clone();
            let timeout = self.batch_timeout;

            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Other("embedding semaphore closed".to_string()))?;
                let vectors = with_retry(&retry, sleeper.as_ref(), "embed batch", || {
                    let provider = provider.clone();
                    let batch = batch.clone();
                    async move { embed_with_timeout(provider.as_ref(), &batch, timeout).await }
                })
                .await?;
                Ok::<_, Error>((idx, vectors))
            });
        }

        let mut slots: Vec<Option<Vec<Vec<f32>>>> = vec![None; batches.len()];
        while let Some(joined) = set.join_next().await {
            let (idx, vectors) =
                joined.map_err(|e| Error::Other(format!("embedding task failed: {e}")))??;
            if vectors.len() != batches[idx].len() {
                return Err(Error::Provider {
                    provider: self.provider.name().to_string(),
                    message: format!(
                        "expected {} vectors, received {}",
                        batches[idx].len(),
                        vectors.len()
                    ),
                });
            }
            for vector in &vectors {
                self.check_dimensions(vector)?;
            }
            debug!(batch = idx + 1, total = batches.len(), "Batch embedded");
            slots[idx] = Some(vectors);
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for slot in slots {
            let batch = slot.ok_or_else(|| Error::Other("embedding batch missing".to_string()))?;
            vectors.extend(batch);
        }

        let embedded = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk::new(chunk, vector))
            .collect();

        stats.total_time_ms = start.elapsed().as_millis();
        info!(
            chunks = stats.total_chunks,
            truncated = stats.truncated_inputs,
            "Embedded in {:.2}s ({:.1} chunks/sec)",
            start.elapsed().as_secs_f32(),
            stats.chunks_per_second()
        );
        Ok((embedded, stats))
    }

    /// Embed a search query, reusing recent results
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let key = format!("{}\u{0}{}", self.provider.name(), text);
        if let Some(hit) = self.query_cache.get(&key) {
            return Ok(hit.as_ref().clone());
        }

        let input = truncate_chars(text, self.max_input_chars).0;
        let provider = self.provider.clone();
        let timeout = self.batch_timeout;
        let vector = with_retry(&self.retry, self.sleeper.as_ref(), "embed query", || {
            let provider = provider.clone();
            let input = input.clone();
            async move {
                match tokio::time::timeout(timeout, provider.embed_query_text(&input)).await {
                    Ok(result) => result,
                    Err(_) => Err(timed_out(provider.as_ref(), timeout)),
                }
            }
        })
        .await?;
        self.check_dimensions(&vector)?;

        Ok(self.query_cache.insert(key, vector).as_ref().clone())
    }

    pub fn query_cache_stats(&self) -> CacheStats {
        self.query_cache.stats()
    }

    /// Embedding input for a chunk: context first when present, capped at
    /// the configured length. The stored chunk content is never touched.
    fn prepare_text(&self, chunk: &Chunk) -> (String, bool) {
        let (text, truncated) = truncate_chars(&chunk.embedding_text(), self.max_input_chars);
        if truncated {
            warn!(
                file = %chunk.file_path,
                lines = ?chunk.line_range,
                max_chars = self.max_input_chars,
                "Embedding input truncated"
            );
        }
        (text, truncated)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        let expected = self.provider.dimensions();
        if vector.len() != expected {
            return Err(Error::dimension_mismatch(expected, vector.len()));
        }
        Ok(())
    }
}

async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    batch: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    match tokio::time::timeout(timeout, provider.embed_texts(batch)).await {
        Ok(result) => result,
        Err(_) => Err(timed_out(provider, timeout)),
    }
}

fn timed_out(provider: &dyn EmbeddingProvider, timeout: Duration) -> Error {
    Error::TransientProvider {
        provider: provider.name().to_string(),
        message: format!("request timed out after {timeout:?}"),
        rate_limited: false,
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ContentType;
    use crate::embed::retry::tests::RecordingSleeper;
    use crate::embed::HashEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn chunk(i: usize, content: &str) -> Chunk {
        Chunk::new(
            format!("src/f{i}.rs"),
            (1, 3),
            content.to_string(),
            "rust",
            ContentType::Code,
        )
    }

    /// Records every input and fails the configured batch numbers
    struct ScriptedProvider {
        dims: usize,
        max_batch: usize,
        calls: AtomicUsize,
        fail_calls: Vec<usize>,
        inputs: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedProvider {
        fn new(dims: usize, max_batch: usize, fail_calls: Vec<usize>) -> Self {
            Self {
                dims,
                max_batch,
                calls: AtomicUsize::new(0),
                fail_calls,
                inputs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        fn max_batch(&self) -> usize {
            self.max_batch
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(texts.to_vec());
            if self.fail_calls.contains(&call) {
                return Err(Error::Provider {
                    provider: "scripted".into(),
                    message: "401 unauthorized".into(),
                });
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dims]).collect())
        }
    }

    fn config(batch_size: usize, max_input_chars: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size,
            max_input_chars,
            max_concurrency: 1,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_batches_respect_provider_ceiling() {
        let provider = Arc::new(ScriptedProvider::new(4, 3, vec![]));
        let embedder = BatchEmbedder::new(provider.clone(), &config(100, 8000));
        let chunks: Vec<_> = (0..7).map(|i| chunk(i, "fn body() { work(); }")).collect();

        let embedded = embedder.embed_batch(chunks).await.unwrap();

        assert_eq!(embedded.len(), 7);
        let sizes: Vec<_> = provider.inputs.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(embedded[6].chunk.file_path, "src/f6.rs");
    }

    #[tokio::test]
    async fn test_context_is_prepended() {
        let provider = Arc::new(ScriptedProvider::new(2, 100, vec![]));
        let embedder = BatchEmbedder::new(provider.clone(), &config(100, 8000));
        let mut c = chunk(0, "fn body() { work(); }");
        c.context = Some("Worker loop of the scheduler.".to_string());

        embedder.embed_batch(vec![c]).await.unwrap();

        let inputs = provider.inputs.lock().unwrap();
        assert_eq!(
            inputs[0][0],
            "Worker loop of the scheduler.\n\nfn body() { work(); }"
        );
    }

    #[tokio::test]
    async fn test_long_inputs_truncated_but_content_kept() {
        let provider = Arc::new(ScriptedProvider::new(2, 100, vec![]));
        let embedder = BatchEmbedder::new(provider.clone(), &config(100, 10));
        let long = "é".repeat(50);

        let embedded = embedder.embed_batch(vec![chunk(0, &long)]).await.unwrap();

        assert_eq!(provider.inputs.lock().unwrap()[0][0].chars().count(), 10);
        assert_eq!(embedded[0].chunk.content, long);
    }

    #[tokio::test]
    async fn test_any_failed_batch_fails_the_call() {
        let provider = Arc::new(ScriptedProvider::new(2, 2, vec![1]));
        let embedder = BatchEmbedder::new(provider.clone(), &config(100, 8000))
            .with_retry(RetryPolicy::immediate(3), Arc::new(RecordingSleeper::default()));
        let chunks: Vec<_> = (0..6).map(|i| chunk(i, "fn body() { work(); }")).collect();

        let result = embedder.embed_batch(chunks).await;
        assert!(matches!(result, Err(Error::Provider { .. })));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_configuration_error() {
        struct Liar;

        #[async_trait]
        impl EmbeddingProvider for Liar {
            fn name(&self) -> &str {
                "liar"
            }
            fn dimensions(&self) -> usize {
                8
            }
            fn max_batch(&self) -> usize {
                10
            }
            async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
            }
        }

        let embedder = BatchEmbedder::new(Arc::new(Liar), &config(100, 8000));
        let result = embedder.embed_batch(vec![chunk(0, "fn body() { work(); }")]).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_query_embedding_is_cached() {
        let embedder = BatchEmbedder::new(Arc::new(HashEmbedder::new(16)), &config(100, 8000));

        let first = embedder.embed_query("load config").await.unwrap();
        let second = embedder.embed_query("load config").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(embedder.query_cache_stats().hits, 1);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), ("hé".to_string(), true));
        assert_eq!(truncate_chars("hi", 5), ("hi".to_string(), false));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
