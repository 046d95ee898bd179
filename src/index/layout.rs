//! On-disk generations.
//!
//! ```text
//! <indexDir>/
//!   CURRENT          name of the live generation
//!   .lock            refresh lock
//!   gen-<uuid>/      codebase.lmdb/ database.lmdb/ bm25/ metadata.json
//! ```
//!
//! A refresh writes a fresh generation and publishes it by replacing
//! `CURRENT` with a rename, so readers see either the old or the new index.

use crate::error::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CURRENT_FILE: &str = "CURRENT";
pub const LOCK_FILE: &str = ".lock";
const GENERATION_PREFIX: &str = "gen-";

#[derive(Debug, Clone)]
pub struct IndexLayout {
    dir: PathBuf,
}

impl IndexLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Live generation directory, if one has been published
    pub fn current(&self) -> Result<Option<PathBuf>> {
        let pointer = self.dir.join(CURRENT_FILE);
        if !pointer.exists() {
            return Ok(None);
        }
        let name = std::fs::read_to_string(&pointer)?;
        let name = name.trim();
        if name.is_empty() || !name.starts_with(GENERATION_PREFIX) {
            warn!(pointer = %pointer.display(), "Ignoring malformed CURRENT file");
            return Ok(None);
        }
        let generation = self.dir.join(name);
        Ok(generation.is_dir().then_some(generation))
    }

    /// Create an empty generation directory for a refresh
    pub fn stage(&self) -> Result<StagedGeneration> {
        let path = self
            .dir
            .join(format!("{GENERATION_PREFIX}{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&path)?;
        debug!(generation = %path.display(), "Staging generation");
        Ok(StagedGeneration {
            path,
            committed: false,
        })
    }

    /// Publish `staged` as the live generation
    pub fn commit(&self, mut staged: StagedGeneration) -> Result<PathBuf> {
        let name = staged
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(name.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(CURRENT_FILE))
            .map_err(|e| e.error)?;

        staged.committed = true;
        Ok(staged.path.clone())
    }

    /// Remove every generation except `keep`
    pub fn prune(&self, keep: &Path) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_generation = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(GENERATION_PREFIX));
            if is_generation && path != keep && path.is_dir() {
                if let Err(err) = std::fs::remove_dir_all(&path) {
                    warn!(generation = %path.display(), error = %err, "Failed to remove old generation");
                }
            }
        }
    }
}

/// A generation being written. Dropped without commit, it is deleted.
#[derive(Debug)]
pub struct StagedGeneration {
    path: PathBuf,
    committed: bool,
}

impl StagedGeneration {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedGeneration {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(generation = %self.path.display(), error = %err, "Failed to discard staged generation");
            }
        } else {
            debug!(generation = %self.path.display(), "Discarded staged generation");
        }
    }
}
