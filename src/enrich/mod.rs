//! Contextual enrichment: a short model-written description that situates
//! each chunk within its file, prepended to the chunk's embedding input.

mod completer;

pub use completer::{AnthropicCompleter, TextCompleter};

use crate::chunker::{Chunk, CHARS_PER_TOKEN};
use crate::config::ContextualMode;
use crate::embed::{truncate_chars, with_retry, RetryPolicy, Sleeper, TokioSleeper};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Whole-file text passed with every chunk of that file
pub const MAX_DOCUMENT_CHARS: usize = 50_000;

/// Ceiling on a generated description
pub const MAX_CONTEXT_TOKENS: u32 = 150;

/// Codebase size below which `auto` skips enrichment
pub const DEFAULT_AUTO_THRESHOLD_TOKENS: usize = 50_000;

/// Decide whether a pass should enrich.
pub fn should_enrich(
    mode: ContextualMode,
    total_tokens: usize,
    threshold: usize,
    completer_available: bool,
) -> bool {
    match mode {
        ContextualMode::Never => false,
        ContextualMode::Always => completer_available,
        ContextualMode::Auto => completer_available && total_tokens >= threshold,
    }
}

fn situate_prompt(document: &str, chunk: &str) -> String {
    format!(
        "<document>\n{document}\n</document>\n\
         Here is the chunk we want to situate within the whole document\n\
         <chunk>\n{chunk}\n</chunk>\n\
         Please give a short succinct context to situate this chunk within the overall \
         document for the purposes of improving search retrieval of the chunk. \
         Answer only with the succinct context and nothing else."
    )
}

/// Fills `Chunk::context` via a [`TextCompleter`].
pub struct ContextualEnricher {
    completer: Arc<dyn TextCompleter>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    max_concurrency: usize,
}

impl ContextualEnricher {
    pub fn new(completer: Arc<dyn TextCompleter>) -> Self {
        Self {
            completer,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            max_concurrency: 4,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Describe every chunk. `sources` maps a file path to its full text;
    /// chunks without a source (e.g. database tables) use their own content
    /// as the document.
    ///
    /// Never fails: a chunk whose description cannot be produced keeps
    /// `context = None`. Output order matches input order.
    pub async fn enrich(&self, chunks: Vec<Chunk>, sources: &HashMap<String, String>) -> Vec<Chunk> {
        if chunks.is_empty() {
            return chunks;
        }

        // Truncate each file once and share it across that file's chunks
        let mut documents: HashMap<&str, Arc<str>> = HashMap::new();
        for chunk in &chunks {
            if documents.contains_key(chunk.file_path.as_str()) {
                continue;
            }
            if let Some(source) = sources.get(&chunk.file_path) {
                let (document, truncated) = truncate_chars(source, MAX_DOCUMENT_CHARS);
                if truncated {
                    debug!(file = %chunk.file_path, "Document truncated for enrichment");
                }
                documents.insert(chunk.file_path.as_str(), Arc::from(document));
            }
        }
        info!(
            chunks = chunks.len(),
            files = documents.len(),
            completer = self.completer.name(),
            "Enriching chunks with context"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set = JoinSet::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let document = documents
                .get(chunk.file_path.as_str())
                .cloned()
                .unwrap_or_else(|| Arc::from(chunk.content.as_str()));
            let prompt = situate_prompt(&document, &chunk.content);
            let completer = self.completer.clone();
            let retry = self.retry.clone();
            let sleeper = self.sleeper.clone();
            let semaphore = semaphore.clone();

            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (idx, None);
                };
                let result = with_retry(&retry, sleeper.as_ref(), "enrich chunk", || {
                    let completer = completer.clone();
                    let prompt = prompt.clone();
                    async move { completer.complete(&prompt, MAX_CONTEXT_TOKENS).await }
                })
                .await;
                (idx, Some(result))
            });
        }

        let mut contexts: Vec<Option<String>> = vec![None; chunks.len()];
        let mut failed = 0usize;
        while let Some(joined) = set.join_next().await {
            let Ok((idx, result)) = joined else {
                failed += 1;
                continue;
            };
            match result {
                Some(Ok(text)) => contexts[idx] = clean_context(&text),
                Some(Err(err)) => {
                    failed += 1;
                    warn!(
                        file = %chunks[idx].file_path,
                        lines = ?chunks[idx].line_range,
                        error = %err,
                        "Enrichment failed, indexing chunk without context"
                    );
                }
                None => failed += 1,
            }
        }
        if failed > 0 {
            warn!(failed, "Some chunks were indexed without context");
        }

        chunks
            .into_iter()
            .zip(contexts)
            .map(|(mut chunk, context)| {
                chunk.context = context;
                chunk
            })
            .collect()
    }
}

/// Trim a response and hold it to the description ceiling
fn clean_context(text: &str) -> Option<String> {
    let max_chars = MAX_CONTEXT_TOKENS as usize * CHARS_PER_TOKEN;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (capped, _) = truncate_chars(trimmed, max_chars);
    Some(capped.trim_end().to_string())
}
