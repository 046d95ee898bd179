//! Discovery and chunking stages shared by full and incremental refreshes.

use crate::chunker::{retain_valid, Chunk, ChunkerConfig, SemanticChunker};
use crate::config::Config;
use crate::database::{schema_chunks, SchemaSource, SqlFileSchemaSource};
use crate::error::Result;
use crate::file::{read_source, FileInfo, FileWalker, WalkStats};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Chunks of one source file together with its text
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    pub rel_path: String,
    pub content: String,
    pub chunks: Vec<Chunk>,
}

/// Result of chunking a set of files
#[derive(Debug, Default)]
pub struct ChunkedSources {
    pub files: Vec<ChunkedFile>,
    /// Files that could not be read as text
    pub unreadable: usize,
}

impl ChunkedSources {
    pub fn chunk_count(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| &f.chunks)
            .map(Chunk::estimated_tokens)
            .sum()
    }

    /// Full text per path, for enrichment
    pub fn sources(&self) -> HashMap<String, String> {
        self.files
            .iter()
            .map(|f| (f.rel_path.clone(), f.content.clone()))
            .collect()
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.files.into_iter().flat_map(|f| f.chunks).collect()
    }
}

pub fn walker(root: &Path, config: &Config) -> Result<FileWalker> {
    Ok(FileWalker::new(root)
        .include(config.include_set()?)
        .exclude(config.exclude_set()?))
}

/// Every indexable file under `root`
pub fn discover(root: &Path, config: &Config) -> Result<(Vec<FileInfo>, WalkStats)> {
    walker(root, config)?.walk()
}

/// Chunk files in parallel; each worker owns its own parser
pub fn chunk_files(
    files: &[FileInfo],
    chunker_config: ChunkerConfig,
    progress: &ProgressBar,
) -> ChunkedSources {
    let start = Instant::now();

    let results: Vec<Option<ChunkedFile>> = files
        .par_iter()
        .map_init(
            || SemanticChunker::new(chunker_config),
            |chunker, file| {
                progress.inc(1);
                let content = read_source(&file.path)?;
                let chunks = chunker.chunk(&file.rel_path, file.language, &content);
                let chunks = retain_valid(chunks, chunker_config.min_chars);
                Some(ChunkedFile {
                    rel_path: file.rel_path.clone(),
                    content,
                    chunks,
                })
            },
        )
        .collect();

    let unreadable = results.iter().filter(|r| r.is_none()).count();
    let chunked = ChunkedSources {
        files: results.into_iter().flatten().collect(),
        unreadable,
    };

    info!(
        files = chunked.files.len(),
        chunks = chunked.chunk_count(),
        unreadable,
        "Chunked files in {:?}",
        start.elapsed()
    );
    chunked
}

/// The configured schema source, if database indexing is enabled
pub fn schema_source(
    root: &Path,
    config: &Config,
    injected: Option<&Arc<dyn SchemaSource>>,
) -> Option<Arc<dyn SchemaSource>> {
    if !config.database.enabled {
        return None;
    }
    if let Some(source) = injected {
        return Some(source.clone());
    }
    let schema = config.database.schema.as_ref()?;
    let path = if schema.is_absolute() {
        schema.clone()
    } else {
        root.join(schema)
    };
    Some(Arc::new(SqlFileSchemaSource::new(path)))
}

/// Schema chunks from the source, or none
pub fn database_chunks(source: Option<&Arc<dyn SchemaSource>>, config: &Config) -> Result<Vec<Chunk>> {
    let Some(source) = source else {
        return Ok(Vec::new());
    };
    let chunks = schema_chunks(source.as_ref(), &config.database.config_tables)?;
    debug!(source = source.name(), tables = chunks.len(), "Collected schema chunks");
    Ok(retain_valid(chunks, crate::chunker::MIN_CHUNK_CHARS))
}
