//! Index lifecycle for one project: full builds, incremental refreshes,
//! status and queries.
//!
//! Every refresh writes a new generation directory and publishes it only
//! once it is complete, so a failed or timed-out refresh leaves the live
//! index untouched and concurrent queries never see a partial state.

mod estimate;
mod git;
mod layout;
mod lock;
mod metadata;
mod pipeline;

pub use estimate::{embedding_cost, EstimateReport};
pub use git::{changed_files, head_revision, uncommitted_files, ChangeSet};
pub use layout::{IndexLayout, StagedGeneration};
pub use lock::RefreshLock;
pub use metadata::{ConfigSnapshot, IndexMetadata, SourceStats, Sources, METADATA_FILE};
pub use pipeline::{ChunkedFile, ChunkedSources};

use crate::chunker::{Chunk, ChunkerConfig};
use crate::config::Config;
use crate::database::SchemaSource;
use crate::embed::{provider_from_config, BatchEmbedder, ProviderKind};
use crate::enrich::{should_enrich, AnthropicCompleter, ContextualEnricher, TextCompleter};
use crate::error::{Error, Result};
use crate::file::{normalize_rel_path, FileInfo};
use crate::fts::{KeywordIndex, BM25_DIR};
use crate::rerank::{NeuralReranker, Reranker};
use crate::search::{run_query, HybridSearcher, QueryRequest, QueryResponse, ScoredChunk, SearchOptions};
use crate::vectordb::{CollectionName, VectorStore};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Lifecycle state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Uninitialized,
    Initializing,
    Ready,
    Refreshing,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Refreshing => "refreshing",
        })
    }
}

/// Freshness reported alongside query results. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Fresh,
    Stale,
    Missing,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Missing => "missing",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshMode {
    /// Rebuild everything from scratch
    Full,
    /// Files changed since the recorded git revision, plus uncommitted work
    Incremental,
    /// An explicit list of changed paths
    Files(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshKind {
    Full,
    Incremental,
    /// Nothing changed; only the refresh time was updated
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub kind: RefreshKind,
    pub files_indexed: usize,
    pub files_removed: usize,
    pub chunks_embedded: usize,
    pub sources: Sources,
    pub contextual: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: IndexState,
    pub index_status: IndexStatus,
    pub sources: Sources,
    pub total_chunks: usize,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub git_revision: Option<String>,
    pub embedding_model: Option<String>,
    pub storage_bytes: u64,
    pub index_dir: PathBuf,
}

/// The published generation
struct LiveIndex {
    path: PathBuf,
    store: VectorStore,
    keyword: KeywordIndex,
    metadata: IndexMetadata,
}

impl LiveIndex {
    fn open(path: PathBuf) -> Result<Option<Self>> {
        let Some(metadata) = IndexMetadata::load(&path)? else {
            warn!(generation = %path.display(), "Generation has no metadata, ignoring it");
            return Ok(None);
        };
        let store = VectorStore::open(&path, metadata.config.dimensions)?;
        let keyword = KeywordIndex::load(&path.join(BM25_DIR))?;
        debug!(
            generation = %path.display(),
            chunks = metadata.total_chunks(),
            "Opened live index"
        );
        Ok(Some(Self {
            path,
            store,
            keyword,
            metadata,
        }))
    }
}

/// A fully written generation waiting to be published
struct Generation {
    staged: StagedGeneration,
    store: VectorStore,
    keyword: KeywordIndex,
    metadata: IndexMetadata,
}

enum Prepared {
    Generation(Generation, RefreshOutcome),
    Unchanged(IndexMetadata, RefreshOutcome),
}

/// Counters gathered while building a generation
struct BuildSummary {
    kind: RefreshKind,
    files_indexed: usize,
    files_removed: usize,
    chunks_embedded: usize,
    contextual: bool,
}

/// Explicit handle on one project's index.
///
/// Queries take a shared read of the live generation; a refresh builds its
/// replacement off to the side and swaps it in at the end.
pub struct IndexHandle {
    root: PathBuf,
    config: Config,
    layout: IndexLayout,
    provider_kind: Option<ProviderKind>,
    embedder: BatchEmbedder,
    completer: Option<Arc<dyn TextCompleter>>,
    reranker: Option<Arc<dyn Reranker>>,
    schema_source: Option<Arc<dyn SchemaSource>>,
    show_progress: bool,
    state: Mutex<IndexState>,
    live: RwLock<Option<LiveIndex>>,
}

impl IndexHandle {
    /// Open the index for `root`, building every collaborator from `config`
    pub fn open(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        config.validate()?;
        let provider = provider_from_config(&config)?;
        let embedder = BatchEmbedder::new(provider, &config.embedding);
        let mut handle = Self::with_embedder(root, config, embedder)?;

        if !matches!(
            handle.config.contextual_retrieval,
            crate::config::ContextualMode::Never
        ) {
            handle.completer = AnthropicCompleter::from_config(
                &handle.config.enrichment,
                handle.config.request_timeout(),
            )?
            .map(|c| Arc::new(c) as Arc<dyn TextCompleter>);
            if handle.completer.is_none() {
                debug!("No completion credentials found, contextual enrichment unavailable");
            }
        }
        if handle.config.search.reranking {
            handle.reranker = Some(Arc::new(NeuralReranker::new()));
        }
        Ok(handle)
    }

    /// Open the index with an already constructed embedder
    pub fn with_embedder(
        root: impl Into<PathBuf>,
        config: Config,
        embedder: BatchEmbedder,
    ) -> Result<Self> {
        config.validate()?;
        let root = root.into();
        let layout = IndexLayout::new(config.index_path(&root));
        let live = match layout.current()? {
            Some(path) => LiveIndex::open(path)?,
            None => None,
        };
        let state = if live.is_some() {
            IndexState::Ready
        } else {
            IndexState::Uninitialized
        };

        Ok(Self {
            provider_kind: ProviderKind::parse(embedder.provider().name()).ok(),
            root,
            config,
            layout,
            embedder,
            completer: None,
            reranker: None,
            schema_source: None,
            show_progress: false,
            state: Mutex::new(state),
            live: RwLock::new(live),
        })
    }

    pub fn with_completer(mut self, completer: Option<Arc<dyn TextCompleter>>) -> Self {
        self.completer = completer;
        self
    }

    pub fn with_reranker(mut self, reranker: Option<Arc<dyn Reranker>>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Use a live schema source instead of the configured SQL file
    pub fn with_schema_source(mut self, source: Arc<dyn SchemaSource>) -> Self {
        self.schema_source = Some(source);
        self
    }

    /// Draw progress bars on stderr during chunking
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn embedder(&self) -> &BatchEmbedder {
        &self.embedder
    }

    pub fn state(&self) -> IndexState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: IndexState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub async fn is_initialized(&self) -> bool {
        self.live.read().await.is_some()
    }

    /// Build or update the index.
    ///
    /// Runs under the configured wall-clock budget. On any failure the
    /// staged generation is discarded and the previous index stays live.
    pub async fn refresh(&self, mode: RefreshMode) -> Result<RefreshOutcome> {
        if !self.config.enabled {
            return Err(Error::config("indexing is disabled (\"enabled\": false)"));
        }
        std::fs::create_dir_all(self.layout.dir())?;
        let _lock = RefreshLock::acquire(&self.layout.lock_path())?;
        self.follow_current().await;

        let had_live = self.is_initialized().await;
        self.set_state(if had_live {
            IndexState::Refreshing
        } else {
            IndexState::Initializing
        });

        let started = Instant::now();
        let budget = self.config.refresh_budget();
        let prepared = match tokio::time::timeout(budget, self.prepare(mode)).await {
            Ok(prepared) => prepared,
            Err(_) => Err(Error::Timeout {
                operation: "refresh",
                elapsed: started.elapsed(),
            }),
        };
        let result = match prepared {
            Ok(prepared) => self.publish(prepared, started).await,
            Err(err) => Err(err),
        };

        let has_live = self.is_initialized().await;
        self.set_state(if has_live {
            IndexState::Ready
        } else {
            IndexState::Uninitialized
        });

        match &result {
            Ok(outcome) => info!(
                kind = ?outcome.kind,
                files = outcome.files_indexed,
                embedded = outcome.chunks_embedded,
                duration_ms = outcome.duration_ms,
                "Refresh complete"
            ),
            Err(err) => warn!(error = %err, "Refresh aborted, previous index left in place"),
        }
        result
    }

    /// Refresh at session start when configured and the index is missing,
    /// stale or behind `HEAD`. A refresh already running elsewhere is not
    /// an error here.
    pub async fn refresh_on_session_start(&self) -> Result<Option<RefreshOutcome>> {
        if !self.config.refresh.on_session_start || !self.needs_refresh().await {
            return Ok(None);
        }
        match self.refresh(RefreshMode::Incremental).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(Error::RefreshInProgress(dir)) => {
                info!(index = %dir, "Another refresh is running, using the current index");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Whether the index is missing, past `maxAge`, or (with `onGitChange`)
    /// built from a different revision than `HEAD`
    pub async fn needs_refresh(&self) -> bool {
        self.follow_current().await;
        let live = self.live.read().await;
        let Some(live) = live.as_ref() else {
            return true;
        };
        if self.index_status(&live.metadata) == IndexStatus::Stale {
            return true;
        }
        if self.config.refresh.on_git_change {
            if let Some(head) = head_revision(&self.root).await {
                return live.metadata.git_revision.as_deref() != Some(head.as_str());
            }
        }
        false
    }

    /// Switch to the generation `CURRENT` names when another process has
    /// published one since this handle last looked. On failure the handle
    /// keeps serving what it has.
    async fn follow_current(&self) {
        if let Err(err) = self.reopen_if_moved().await {
            warn!(error = %err, "Failed to open the published generation, keeping the loaded one");
        }
    }

    async fn reopen_if_moved(&self) -> Result<()> {
        let current = self.layout.current()?;
        let loaded = |live: &Option<LiveIndex>| live.as_ref().map(|l| l.path.clone());
        if loaded(&*self.live.read().await) == current {
            return Ok(());
        }

        let mut live = self.live.write().await;
        if loaded(&*live) == current {
            return Ok(());
        }
        let reopened = match current {
            Some(path) => LiveIndex::open(path)?,
            None => None,
        };
        info!(
            generation = ?reopened.as_ref().map(|l| l.path.display().to_string()),
            "Index was republished, reloading"
        );
        *live = reopened;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, IndexState::Ready | IndexState::Uninitialized) {
            *state = if live.is_some() {
                IndexState::Ready
            } else {
                IndexState::Uninitialized
            };
        }
        Ok(())
    }

    /// Build the next generation, or decide nothing needs rebuilding
    async fn prepare(&self, mode: RefreshMode) -> Result<Prepared> {
        let live = self.live.read().await;
        let Some(current) = live.as_ref() else {
            info!("No index yet, running full build");
            return self.build_full(None).await;
        };

        match self.plan(&mode, current).await {
            Some(changes) => self.build_incremental(current, changes).await,
            None => self.build_full(Some(&current.metadata)).await,
        }
    }

    /// Changed paths for an incremental pass; `None` means rebuild
    async fn plan(&self, mode: &RefreshMode, live: &LiveIndex) -> Option<ChangeSet> {
        if live.metadata.config != self.snapshot(live.metadata.config.contextual) {
            info!("Embedding model or chunking strategy changed, rebuilding");
            return None;
        }
        match mode {
            RefreshMode::Full => None,
            RefreshMode::Files(paths) => {
                let relative: Vec<String> = paths.iter().map(|p| self.relative(p)).collect();
                let mut changes = ChangeSet::classify(&self.root, relative);
                changes.retain(|path| !self.is_index_path(path));
                Some(changes)
            }
            RefreshMode::Incremental => {
                let Some(revision) = live.metadata.git_revision.as_deref() else {
                    info!("Index has no recorded revision, rebuilding");
                    return None;
                };
                match changed_files(&self.root, revision).await {
                    Ok(changes) => {
                        // Edits indexed last time may have been reverted since
                        let previously_dirty =
                            ChangeSet::classify(&self.root, &live.metadata.dirty_paths);
                        let mut changes = changes.union(previously_dirty);
                        changes.retain(|path| !self.is_index_path(path));
                        Some(changes)
                    }
                    Err(err) => {
                        warn!(error = %err, "Change detection failed, rebuilding");
                        None
                    }
                }
            }
        }
    }

    /// Uncommitted paths right now, empty outside a git repository
    async fn dirty_paths(&self) -> BTreeSet<String> {
        match uncommitted_files(&self.root).await {
            Ok(paths) => paths
                .into_iter()
                .filter(|path| !self.is_index_path(path))
                .collect(),
            Err(err) => {
                debug!(error = %err, "No uncommitted paths recorded");
                BTreeSet::new()
            }
        }
    }

    /// Whether a root-relative path lies inside the index directory
    fn is_index_path(&self, rel_path: &str) -> bool {
        let Ok(index_dir) = self.layout.dir().strip_prefix(&self.root) else {
            return false;
        };
        let index_dir = normalize_rel_path(&index_dir.to_string_lossy());
        !index_dir.is_empty()
            && (rel_path == index_dir || rel_path.starts_with(&format!("{index_dir}/")))
    }

    async fn build_full(&self, previous: Option<&IndexMetadata>) -> Result<Prepared> {
        let (files, stats) = pipeline::discover(&self.root, &self.config)?;
        info!(
            files = files.len(),
            size_mb = %format!("{:.2}", stats.total_size_mb()),
            "Discovered files"
        );

        let chunked = self.chunk(files).await?;
        let database = pipeline::database_chunks(self.schema_source().as_ref(), &self.config)?;
        let total_tokens =
            chunked.estimated_tokens() + database.iter().map(Chunk::estimated_tokens).sum::<usize>();
        let contextual = should_enrich(
            self.config.contextual_retrieval,
            total_tokens,
            self.config.enrichment.auto_threshold_tokens,
            self.completer.is_some(),
        );

        let sources = chunked.sources();
        let files_indexed = chunked.files.len();
        let mut code = chunked.into_chunks();
        let mut database = database;
        if contextual {
            code = self.enrich(code, &sources).await;
            database = self.enrich(database, &HashMap::new()).await;
        }

        let code = self.embedder.embed_batch(code).await?;
        let database = self.embedder.embed_batch(database).await?;
        let chunks_embedded = code.len() + database.len();

        let staged = self.layout.stage()?;
        let mut store = VectorStore::open(staged.path(), self.embedder.dimensions())?;
        store.collection_mut(CollectionName::Codebase).replace_all(code)?;
        store.collection_mut(CollectionName::Database).replace_all(database)?;

        let summary = BuildSummary {
            kind: RefreshKind::Full,
            files_indexed,
            files_removed: 0,
            chunks_embedded,
            contextual,
        };
        self.finish(staged, store, previous, summary).await
    }

    async fn build_incremental(&self, live: &LiveIndex, changes: ChangeSet) -> Result<Prepared> {
        let walker = pipeline::walker(&self.root, &self.config)?;
        let to_index: Vec<FileInfo> = changes
            .modified
            .iter()
            .filter_map(|path| walker.file_info(path))
            .collect();
        let touched: HashSet<String> = changes.paths().cloned().collect();

        // Schema chunks are recollected each pass; only changed tables are re-embedded
        let live_database = live.store.collection(CollectionName::Database);
        let mut database_changed = Vec::new();
        let mut database_kept: HashSet<String> = HashSet::new();
        for chunk in pipeline::database_chunks(self.schema_source().as_ref(), &self.config)? {
            match live_database.get(&chunk.id)? {
                Some(existing) if existing.content == chunk.content => {
                    database_kept.insert(chunk.file_path);
                }
                _ => database_changed.push(chunk),
            }
        }
        let database_dropped: HashSet<String> = live_database
            .all_chunks()?
            .into_iter()
            .map(|c| c.file_path)
            .filter(|path| !database_kept.contains(path))
            .collect();

        if changes.is_empty() && database_changed.is_empty() && database_dropped.is_empty() {
            info!("No changes since the last refresh");
            let metadata = IndexMetadata::refreshed(
                &live.metadata,
                live.metadata.config.clone(),
                head_revision(&self.root).await,
                live.metadata.sources,
            )
            .with_dirty_paths(self.dirty_paths().await);
            let outcome = RefreshOutcome {
                kind: RefreshKind::Unchanged,
                files_indexed: 0,
                files_removed: 0,
                chunks_embedded: 0,
                sources: metadata.sources,
                contextual: metadata.config.contextual,
                duration_ms: 0,
            };
            return Ok(Prepared::Unchanged(metadata, outcome));
        }
        info!(
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            tables = database_changed.len(),
            "Refreshing changed sources"
        );

        let chunked = self.chunk(to_index).await?;
        let contextual = live.metadata.config.contextual;
        let enrich = contextual && self.completer.is_some();
        if contextual && !enrich {
            warn!("Index uses contextual descriptions but no completer is configured");
        }

        let sources = chunked.sources();
        let files_indexed = chunked.files.len();
        let mut code = chunked.into_chunks();
        if enrich {
            code = self.enrich(code, &sources).await;
            database_changed = self.enrich(database_changed, &HashMap::new()).await;
        }

        let code = self.embedder.embed_batch(code).await?;
        let database = self.embedder.embed_batch(database_changed).await?;
        let chunks_embedded = code.len() + database.len();

        // Removal happens in the copy, before any new chunk is written
        let staged = self.layout.stage()?;
        let mut store = VectorStore::open(staged.path(), live.store.dimensions())?;
        let codebase = store.collection_mut(CollectionName::Codebase);
        codebase.copy_without(live.store.collection(CollectionName::Codebase), &touched)?;
        codebase.upsert(code)?;
        let database_collection = store.collection_mut(CollectionName::Database);
        database_collection.copy_without(live_database, &database_dropped)?;
        database_collection.upsert(database)?;

        let summary = BuildSummary {
            kind: RefreshKind::Incremental,
            files_indexed,
            files_removed: changes.deleted.len(),
            chunks_embedded,
            contextual,
        };
        self.finish(staged, store, Some(&live.metadata), summary).await
    }

    /// Keyword index and metadata for a staged store
    async fn finish(
        &self,
        staged: StagedGeneration,
        store: VectorStore,
        previous: Option<&IndexMetadata>,
        summary: BuildSummary,
    ) -> Result<Prepared> {
        let all = store.all_chunks()?;
        let keyword = KeywordIndex::build(all.iter());
        keyword.save(&staged.path().join(BM25_DIR))?;

        let sources = Sources {
            codebase: source_stats(&store, CollectionName::Codebase)?,
            database: source_stats(&store, CollectionName::Database)?,
        };
        let snapshot = self.snapshot(summary.contextual);
        let revision = head_revision(&self.root).await;
        let metadata = match previous {
            Some(previous) => IndexMetadata::refreshed(previous, snapshot, revision, sources),
            None => IndexMetadata::new(snapshot, revision, sources),
        }
        .with_dirty_paths(self.dirty_paths().await);
        metadata.save(staged.path())?;

        let outcome = RefreshOutcome {
            kind: summary.kind,
            files_indexed: summary.files_indexed,
            files_removed: summary.files_removed,
            chunks_embedded: summary.chunks_embedded,
            sources,
            contextual: summary.contextual,
            duration_ms: 0,
        };
        Ok(Prepared::Generation(
            Generation {
                staged,
                store,
                keyword,
                metadata,
            },
            outcome,
        ))
    }

    /// Make a prepared refresh visible
    async fn publish(&self, prepared: Prepared, started: Instant) -> Result<RefreshOutcome> {
        let elapsed = started.elapsed().as_millis() as u64;
        match prepared {
            Prepared::Generation(generation, mut outcome) => {
                let Generation {
                    staged,
                    store,
                    keyword,
                    metadata,
                } = generation;
                let path = self.layout.commit(staged)?;
                let previous = self.live.write().await.replace(LiveIndex {
                    path: path.clone(),
                    store,
                    keyword,
                    metadata,
                });
                drop(previous);
                self.layout.prune(&path);

                outcome.duration_ms = elapsed;
                Ok(outcome)
            }
            Prepared::Unchanged(metadata, mut outcome) => {
                let mut live = self.live.write().await;
                if let Some(live) = live.as_mut() {
                    metadata.save(&live.path)?;
                    live.metadata = metadata;
                }
                outcome.duration_ms = elapsed;
                Ok(outcome)
            }
        }
    }

    /// Counts and freshness of the live index
    pub async fn status(&self) -> StatusReport {
        self.follow_current().await;
        let state = self.state();
        let live = self.live.read().await;
        match live.as_ref() {
            None => StatusReport {
                state,
                index_status: IndexStatus::Missing,
                sources: Sources::default(),
                total_chunks: 0,
                last_refreshed: None,
                git_revision: None,
                embedding_model: None,
                storage_bytes: 0,
                index_dir: self.layout.dir().to_path_buf(),
            },
            Some(live) => StatusReport {
                state,
                index_status: self.index_status(&live.metadata),
                sources: live.metadata.sources,
                total_chunks: live.metadata.total_chunks(),
                last_refreshed: Some(live.metadata.last_refreshed),
                git_revision: live.metadata.git_revision.clone(),
                embedding_model: Some(live.metadata.config.embedding_model.clone()),
                storage_bytes: directory_size(&live.path),
                index_dir: self.layout.dir().to_path_buf(),
            },
        }
    }

    /// Answer a query-tool request. A missing index yields an empty
    /// response with status `missing`.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        self.follow_current().await;
        let live = self.live.read().await;
        let Some(live) = live.as_ref() else {
            return Ok(QueryResponse::missing(started));
        };
        let searcher = HybridSearcher::new(&live.store, &live.keyword, &self.embedder)
            .with_reranker(self.reranker.as_deref());
        run_query(
            &searcher,
            request,
            &self.config.search,
            self.index_status(&live.metadata),
        )
        .await
    }

    /// Hybrid search with explicit options; empty when no index exists
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<ScoredChunk>> {
        self.follow_current().await;
        let live = self.live.read().await;
        let Some(live) = live.as_ref() else {
            return Ok(Vec::new());
        };
        HybridSearcher::new(&live.store, &live.keyword, &self.embedder)
            .with_reranker(self.reranker.as_deref())
            .search(query, options)
            .await
    }

    /// Dry run: what a full build would process and roughly cost
    pub async fn estimate(&self) -> Result<EstimateReport> {
        let (files, _) = pipeline::discover(&self.root, &self.config)?;
        let chunked = self.chunk(files).await?;
        let database = pipeline::database_chunks(self.schema_source().as_ref(), &self.config)?;
        let estimated_tokens =
            chunked.estimated_tokens() + database.iter().map(Chunk::estimated_tokens).sum::<usize>();

        Ok(EstimateReport {
            files: chunked.files.len(),
            code_chunks: chunked.chunk_count(),
            database_chunks: database.len(),
            estimated_tokens,
            embedding_model: self.embedder.provider().name().to_string(),
            estimated_cost_usd: embedding_cost(self.provider_kind.as_ref(), estimated_tokens),
            would_enrich: should_enrich(
                self.config.contextual_retrieval,
                estimated_tokens,
                self.config.enrichment.auto_threshold_tokens,
                self.completer.is_some(),
            ),
        })
    }

    fn index_status(&self, metadata: &IndexMetadata) -> IndexStatus {
        let stale = self
            .config
            .max_age()
            .map(|max_age| metadata.is_stale(max_age, Utc::now()))
            .unwrap_or(false);
        if stale {
            IndexStatus::Stale
        } else {
            IndexStatus::Fresh
        }
    }

    fn snapshot(&self, contextual: bool) -> ConfigSnapshot {
        ConfigSnapshot {
            embedding_model: self.embedder.provider().name().to_string(),
            dimensions: self.embedder.dimensions(),
            chunk_strategy: self.config.codebase.chunk_strategy,
            contextual,
        }
    }

    fn schema_source(&self) -> Option<Arc<dyn SchemaSource>> {
        pipeline::schema_source(&self.root, &self.config, self.schema_source.as_ref())
    }

    /// Root-relative form of a path given on the command line or by a caller
    fn relative(&self, path: &str) -> String {
        let candidate = Path::new(path);
        match candidate.strip_prefix(&self.root) {
            Ok(rel) if candidate.is_absolute() => normalize_rel_path(&rel.to_string_lossy()),
            _ => normalize_rel_path(path),
        }
    }

    async fn chunk(&self, files: Vec<FileInfo>) -> Result<ChunkedSources> {
        let chunker_config =
            ChunkerConfig::default().with_strategy(self.config.codebase.chunk_strategy);
        let progress = self.progress_bar(files.len() as u64);
        let bar = progress.clone();
        let chunked = tokio::task::spawn_blocking(move || {
            pipeline::chunk_files(&files, chunker_config, &bar)
        })
        .await
        .map_err(|e| Error::Other(format!("chunking task failed: {e}")))?;
        progress.finish_and_clear();
        Ok(chunked)
    }

    async fn enrich(&self, chunks: Vec<Chunk>, sources: &HashMap<String, String>) -> Vec<Chunk> {
        match &self.completer {
            Some(completer) => {
                ContextualEnricher::new(completer.clone())
                    .with_concurrency(self.config.embedding.max_concurrency)
                    .enrich(chunks, sources)
                    .await
            }
            None => chunks,
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress || crate::output::is_quiet() {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("█▓▒░ "));
        }
        bar.set_message("chunking");
        bar
    }
}

fn source_stats(store: &VectorStore, name: CollectionName) -> Result<SourceStats> {
    let collection = store.collection(name);
    Ok(SourceStats {
        files: collection.file_count()?,
        chunks: collection.len()?,
    })
}

/// Total size of the files under `path`
pub fn directory_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
