//! Vector storage on arroy + heed (LMDB).
//!
//! Two logical collections share one embedding dimension so merged results
//! live in a single distance space.

mod store;

pub use store::Collection;

use crate::chunker::{Chunk, ContentType};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionName {
    Codebase,
    Database,
}

impl CollectionName {
    pub const ALL: [CollectionName; 2] = [CollectionName::Codebase, CollectionName::Database];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Codebase => "codebase",
            Self::Database => "database",
        }
    }

    /// Directory name inside an index generation
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Codebase => "codebase.lmdb",
            Self::Database => "database.lmdb",
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which collections a query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    One(CollectionName),
    #[default]
    All,
}

impl Scope {
    pub fn includes(&self, name: CollectionName) -> bool {
        match self {
            Self::One(one) => *one == name,
            Self::All => true,
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "codebase" => Ok(Self::One(CollectionName::Codebase)),
            "database" => Ok(Self::One(CollectionName::Database)),
            other => Err(format!("unknown collection: {other}")),
        }
    }
}

/// Equality filters evaluated inside the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    pub kind: Option<ContentType>,
    /// Accepted language tags; empty accepts all
    pub languages: Vec<String>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.languages.is_empty()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(kind) = self.kind {
            if chunk.kind != kind {
                return false;
            }
        }
        self.languages.is_empty()
            || self
                .languages
                .iter()
                .any(|lang| lang.eq_ignore_ascii_case(&chunk.language))
    }
}

/// A chunk returned by vector search
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    /// Raw L2 distance; unbounded
    pub distance: f32,
    /// `1 / (1 + distance)`, in (0, 1]
    pub similarity: f32,
    pub collection: CollectionName,
}

impl VectorHit {
    pub fn new(chunk: Chunk, distance: f32, collection: CollectionName) -> Self {
        Self {
            chunk,
            distance,
            similarity: similarity(distance),
            collection,
        }
    }
}

/// Similarity used for fusion
pub fn similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Both collections of one index generation
pub struct VectorStore {
    codebase: Collection,
    database: Collection,
}

impl VectorStore {
    /// Open (or create) both collections under `dir`
    pub fn open(dir: &Path, dimensions: usize) -> Result<Self> {
        Ok(Self {
            codebase: Collection::open(
                &dir.join(CollectionName::Codebase.dir_name()),
                CollectionName::Codebase,
                dimensions,
            )?,
            database: Collection::open(
                &dir.join(CollectionName::Database.dir_name()),
                CollectionName::Database,
                dimensions,
            )?,
        })
    }

    pub fn collection(&self, name: CollectionName) -> &Collection {
        match name {
            CollectionName::Codebase => &self.codebase,
            CollectionName::Database => &self.database,
        }
    }

    pub fn collection_mut(&mut self, name: CollectionName) -> &mut Collection {
        match name {
            CollectionName::Codebase => &mut self.codebase,
            CollectionName::Database => &mut self.database,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.codebase.dimensions()
    }

    /// Search one or both collections. Merged results are ordered by raw
    /// distance; ties keep collection order.
    pub fn search(
        &self,
        scope: Scope,
        query: &[f32],
        top_k: usize,
        filters: &Filters,
    ) -> Result<Vec<VectorHit>> {
        let mut hits = Vec::new();
        for name in CollectionName::ALL {
            if scope.includes(name) {
                hits.extend(self.collection(name).search(query, top_k, filters)?);
            }
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Look a chunk up by id in either collection
    pub fn get(&self, chunk_id: &str) -> Result<Option<(Chunk, CollectionName)>> {
        for name in CollectionName::ALL {
            if let Some(chunk) = self.collection(name).get(chunk_id)? {
                return Ok(Some((chunk, name)));
            }
        }
        Ok(None)
    }

    /// Every chunk in both collections
    pub fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let mut chunks = self.codebase.all_chunks()?;
        chunks.extend(self.database.all_chunks()?);
        Ok(chunks)
    }
}
