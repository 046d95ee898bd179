use crate::config::ChunkStrategy;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

pub const METADATA_FILE: &str = "metadata.json";

/// Bumped when the on-disk layout changes incompatibly
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub files: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sources {
    pub codebase: SourceStats,
    pub database: SourceStats,
}

/// Settings an index was built with; a mismatch forces a full rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub embedding_model: String,
    pub dimensions: usize,
    pub chunk_strategy: ChunkStrategy,
    /// Whether chunks were enriched with context
    pub contextual: bool,
}

/// Persisted description of one index generation (`metadata.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub last_refreshed: DateTime<Utc>,
    pub git_revision: Option<String>,
    /// Paths with uncommitted changes when this generation was built.
    /// Reindexed on the next incremental pass even if they are clean by then.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dirty_paths: BTreeSet<String>,
    pub sources: Sources,
    pub config: ConfigSnapshot,
}

impl IndexMetadata {
    pub fn new(config: ConfigSnapshot, git_revision: Option<String>, sources: Sources) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: now,
            last_refreshed: now,
            git_revision,
            dirty_paths: BTreeSet::new(),
            sources,
            config,
        }
    }

    pub fn with_dirty_paths(mut self, dirty_paths: BTreeSet<String>) -> Self {
        self.dirty_paths = dirty_paths;
        self
    }

    /// Metadata for a refreshed generation, keeping the creation time
    pub fn refreshed(
        previous: &IndexMetadata,
        config: ConfigSnapshot,
        git_revision: Option<String>,
        sources: Sources,
    ) -> Self {
        Self {
            created_at: previous.created_at,
            ..Self::new(config, git_revision, sources)
        }
    }

    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Write `metadata.json` through a temp file and rename
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(METADATA_FILE)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Time since the last successful refresh
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_refreshed).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > max_age
    }

    pub fn total_chunks(&self) -> usize {
        self.sources.codebase.chunks + self.sources.database.chunks
    }
}
