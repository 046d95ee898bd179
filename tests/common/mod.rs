#![allow(dead_code)]

use async_trait::async_trait;
use semindex::config::ContextualMode;
use semindex::search::ScoredChunk;
use semindex::{
    BatchEmbedder, Config, EmbeddingProvider, Error, HashEmbedder, IndexHandle, Result, Scope,
    SearchOptions,
};
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const DIMS: usize = 64;

pub fn hash_config() -> Config {
    let mut config = Config::default();
    config.embedding_model = format!("hash:{DIMS}");
    config.contextual_retrieval = ContextualMode::Never;
    config.refresh.on_git_change = false;
    config
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn handle_with(root: &Path, config: Config, provider: Arc<dyn EmbeddingProvider>) -> IndexHandle {
    let embedder = BatchEmbedder::new(provider, &config.embedding);
    IndexHandle::with_embedder(root, config, embedder).unwrap()
}

pub fn hash_handle(root: &Path) -> IndexHandle {
    handle_with(root, hash_config(), Arc::new(HashEmbedder::new(DIMS)))
}

/// Whether a `git` binary can be run
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir` with a throwaway identity, panicking on failure
pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=semindex",
            "-c",
            "user.email=semindex@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Commit everything under `src/`, leaving the index directory untracked
pub fn commit_sources(dir: &Path, message: &str) {
    git(dir, &["add", "src"]);
    git(dir, &["commit", "-q", "-m", message]);
}

/// Every chunk in the live index, via a vector-only search wide enough to
/// return the whole (small) store
pub async fn all_chunks(handle: &IndexHandle, scope: Scope) -> Vec<ScoredChunk> {
    let options = SearchOptions {
        top_k: 30,
        weight: 1.0,
        scope,
        ..Default::default()
    };
    handle.search("everything", &options).await.unwrap()
}

/// Counts the texts it embeds
pub struct CountingProvider {
    inner: HashEmbedder,
    pub embedded: AtomicUsize,
}

impl CountingProvider {
    pub fn new() -> Self {
        Self {
            inner: HashEmbedder::new(DIMS),
            embedded: AtomicUsize::new(0),
        }
    }

    pub fn take(&self) -> usize {
        self.embedded.swap(0, Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn max_batch(&self) -> usize {
        usize::MAX
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_texts(texts).await
    }

    async fn embed_query_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.inner.embed_one(text))
    }
}

/// Once armed, parks every batch until released, then fails it
pub struct GatedProvider {
    inner: HashEmbedder,
    armed: std::sync::atomic::AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedProvider {
    pub fn new() -> Self {
        Self {
            inner: HashEmbedder::new(DIMS),
            armed: std::sync::atomic::AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for GatedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn max_batch(&self) -> usize {
        usize::MAX
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.armed.load(Ordering::SeqCst) {
            return self.inner.embed_texts(texts).await;
        }
        self.entered.notify_one();
        self.release.notified().await;
        Err(Error::Provider {
            provider: self.inner.name().to_string(),
            message: "invalid request".to_string(),
        })
    }

    async fn embed_query_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.inner.embed_one(text))
    }
}

/// Takes far longer than any test budget once armed
pub struct SlowProvider {
    inner: HashEmbedder,
    armed: std::sync::atomic::AtomicBool,
}

impl SlowProvider {
    pub fn new() -> Self {
        Self {
            inner: HashEmbedder::new(DIMS),
            armed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn max_batch(&self) -> usize {
        usize::MAX
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.armed.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.embed_texts(texts).await
    }

    async fn embed_query_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.inner.embed_one(text))
    }
}
