use super::{CollectionName, Filters, VectorHit};
use crate::chunker::Chunk;
use crate::embed::EmbeddedChunk;
use crate::error::{Error, Result};
use arroy::distances::Euclidean;
use arroy::{Database as ArroyDatabase, ItemId, Reader, Writer};
use heed::byteorder::BigEndian;
use heed::types::{SerdeJson, Str, U32};
use heed::{Database, EnvOpenOptions, RoTxn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Collections at or below this many candidates are scanned exactly
const EXACT_SCAN_LIMIT: usize = 10_000;

/// Over-fetch factor for filtered approximate queries
const FILTER_OVERFETCH: usize = 8;

/// Fixed seed so rebuilt trees are reproducible
const BUILD_SEED: u64 = 0x5e31_d3c5;

const META_KEY: &str = "collection";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CollectionMeta {
    dimensions: usize,
}

/// One logical collection: an LMDB environment holding an arroy vector
/// database (Euclidean), chunk records keyed by item id, and a chunk-id
/// lookup table.
pub struct Collection {
    name: CollectionName,
    path: PathBuf,
    env: heed::Env,
    vectors: ArroyDatabase<Euclidean>,
    records: Database<U32<BigEndian>, SerdeJson<Chunk>>,
    ids: Database<Str, U32<BigEndian>>,
    next_id: ItemId,
    dimensions: usize,
}

impl Collection {
    /// Open or create the collection stored at `path`.
    ///
    /// A collection created with a different dimension is a configuration
    /// error; vectors from different models are never mixed.
    pub fn open(path: &Path, name: CollectionName, dimensions: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        // SAFETY: each collection directory is opened by a single handle per
        // process and never modified outside LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(10 * 1024 * 1024 * 1024)
                .max_dbs(4)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let vectors: ArroyDatabase<Euclidean> = env.create_database(&mut wtxn, Some("vectors"))?;
        let records: Database<U32<BigEndian>, SerdeJson<Chunk>> =
            env.create_database(&mut wtxn, Some("records"))?;
        let ids: Database<Str, U32<BigEndian>> = env.create_database(&mut wtxn, Some("ids"))?;
        let meta: Database<Str, SerdeJson<CollectionMeta>> =
            env.create_database(&mut wtxn, Some("meta"))?;

        match meta.get(&wtxn, META_KEY)? {
            Some(stored) if stored.dimensions != dimensions => {
                return Err(Error::dimension_mismatch(stored.dimensions, dimensions));
            }
            Some(_) => {}
            None => meta.put(&mut wtxn, META_KEY, &CollectionMeta { dimensions })?,
        }

        let next_id = records.last(&wtxn)?.map_or(0, |(id, _)| id + 1);
        wtxn.commit()?;

        debug!(collection = %name, path = %path.display(), next_id, "Collection opened");

        Ok(Self {
            name,
            path: path.to_path_buf(),
            env,
            vectors,
            records,
            ids,
            next_id,
            dimensions,
        })
    }

    pub fn name(&self) -> CollectionName {
        self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> Result<usize> {
        let rtxn = self.env.read_txn()?;
        Ok(self.records.len(&rtxn)? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Distinct file paths with at least one chunk
    pub fn file_count(&self) -> Result<usize> {
        let rtxn = self.env.read_txn()?;
        let mut files = HashSet::new();
        for entry in self.records.iter(&rtxn)? {
            let (_, chunk) = entry?;
            files.insert(chunk.file_path);
        }
        Ok(files.len())
    }

    /// Every stored chunk, in insertion order
    pub fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let rtxn = self.env.read_txn()?;
        let mut chunks = Vec::new();
        for entry in self.records.iter(&rtxn)? {
            let (_, chunk) = entry?;
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    pub fn get(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let rtxn = self.env.read_txn()?;
        match self.ids.get(&rtxn, chunk_id)? {
            Some(item) => Ok(self.records.get(&rtxn, &item)?),
            None => Ok(None),
        }
    }

    /// Replace the whole collection with `chunks`
    pub fn replace_all(&mut self, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        self.check_dimensions(&chunks)?;

        let env = self.env.clone();
        let mut wtxn = env.write_txn()?;
        let writer = Writer::new(self.vectors, 0, self.dimensions);
        writer.clear(&mut wtxn)?;
        self.records.clear(&mut wtxn)?;
        self.ids.clear(&mut wtxn)?;
        self.next_id = 0;

        let inserted = self.insert(&mut wtxn, &writer, chunks)?;
        self.build(&mut wtxn, &writer)?;
        wtxn.commit()?;

        debug!(collection = %self.name, inserted, "Collection replaced");
        Ok(inserted)
    }

    /// Insert or replace chunks by id
    pub fn upsert(&mut self, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.check_dimensions(&chunks)?;

        let env = self.env.clone();
        let mut wtxn = env.write_txn()?;
        let writer = Writer::new(self.vectors, 0, self.dimensions);
        for embedded in &chunks {
            if let Some(old) = self.ids.get(&wtxn, &embedded.chunk.id)? {
                writer.del_item(&mut wtxn, old)?;
                self.records.delete(&mut wtxn, &old)?;
            }
        }
        let inserted = self.insert(&mut wtxn, &writer, chunks)?;
        self.build(&mut wtxn, &writer)?;
        wtxn.commit()?;

        Ok(inserted)
    }

    /// Remove every chunk whose file path is in `paths`
    pub fn delete_by_path(&mut self, paths: &HashSet<String>) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn()?;
        let mut doomed = Vec::new();
        for entry in self.records.iter(&wtxn)? {
            let (item, chunk) = entry?;
            if paths.contains(&chunk.file_path) {
                doomed.push((item, chunk.id));
            }
        }
        if doomed.is_empty() {
            return Ok(0);
        }

        let writer = Writer::new(self.vectors, 0, self.dimensions);
        for (item, chunk_id) in &doomed {
            writer.del_item(&mut wtxn, *item)?;
            self.records.delete(&mut wtxn, item)?;
            self.ids.delete(&mut wtxn, chunk_id)?;
        }
        self.build(&mut wtxn, &writer)?;
        wtxn.commit()?;

        Ok(doomed.len())
    }

    /// Fill this (fresh) collection with `source`'s chunks and vectors,
    /// skipping any chunk whose file path is in `excluded`.
    pub fn copy_without(&mut self, source: &Collection, excluded: &HashSet<String>) -> Result<usize> {
        if source.dimensions != self.dimensions {
            return Err(Error::dimension_mismatch(self.dimensions, source.dimensions));
        }

        let rtxn = source.env.read_txn()?;
        let mut kept = Vec::new();
        if let Some(reader) = source.reader(&rtxn)? {
            for entry in source.records.iter(&rtxn)? {
                let (item, chunk) = entry?;
                if excluded.contains(&chunk.file_path) {
                    continue;
                }
                if let Some(vector) = reader.item_vector(&rtxn, item)? {
                    kept.push(EmbeddedChunk::new(chunk, vector));
                }
            }
        }
        drop(rtxn);

        debug!(
            collection = %self.name,
            kept = kept.len(),
            excluded = excluded.len(),
            "Copying collection"
        );
        self.replace_all(kept)
    }

    /// Nearest chunks to `query` that pass `filters`, closest first
    pub fn search(&self, query: &[f32], top_k: usize, filters: &Filters) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimensions {
            return Err(Error::dimension_mismatch(self.dimensions, query.len()));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let rtxn = self.env.read_txn()?;
        let Some(reader) = self.reader(&rtxn)? else {
            return Ok(Vec::new());
        };
        let total = self.records.len(&rtxn)? as usize;

        let scored = if filters.is_empty() {
            if total <= EXACT_SCAN_LIMIT {
                let all: Vec<ItemId> = self.record_ids(&rtxn)?;
                exact_scan(&reader, &rtxn, query, &all)?
            } else {
                self.approximate(&reader, &rtxn, query, top_k)?
            }
        } else {
            let mut matching = Vec::new();
            for entry in self.records.iter(&rtxn)? {
                let (item, chunk) = entry?;
                if filters.matches(&chunk) {
                    matching.push(item);
                }
            }
            if matching.len() <= EXACT_SCAN_LIMIT {
                exact_scan(&reader, &rtxn, query, &matching)?
            } else {
                let allowed: HashSet<ItemId> = matching.into_iter().collect();
                let fetch = top_k.saturating_mul(FILTER_OVERFETCH).min(total);
                self.approximate(&reader, &rtxn, query, fetch)?
                    .into_iter()
                    .filter(|(item, _)| allowed.contains(item))
                    .collect()
            }
        };

        let mut hits = Vec::with_capacity(top_k.min(scored.len()));
        for (item, distance) in scored.into_iter().take(top_k) {
            if let Some(chunk) = self.records.get(&rtxn, &item)? {
                hits.push(VectorHit::new(chunk, distance, self.name));
            }
        }
        Ok(hits)
    }

    fn reader<'t>(&self, rtxn: &'t RoTxn) -> Result<Option<Reader<'t, Euclidean>>> {
        if self.records.is_empty(rtxn)? {
            return Ok(None);
        }
        Ok(Some(Reader::open(rtxn, 0, self.vectors)?))
    }

    fn record_ids(&self, rtxn: &RoTxn) -> Result<Vec<ItemId>> {
        let mut ids = Vec::new();
        for entry in self.records.iter(rtxn)? {
            let (item, _) = entry?;
            ids.push(item);
        }
        Ok(ids)
    }

    fn approximate(
        &self,
        reader: &Reader<'_, Euclidean>,
        rtxn: &RoTxn,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(ItemId, f32)>> {
        let mut nns = reader.nns(limit.max(1));
        if let Some(n_trees) = NonZeroUsize::new(reader.n_trees()) {
            if let Some(search_k) = NonZeroUsize::new(limit * n_trees.get() * 15) {
                nns.search_k(search_k);
            }
        }
        Ok(nns.by_vector(rtxn, query)?)
    }

    fn insert(
        &mut self,
        wtxn: &mut heed::RwTxn,
        writer: &Writer<Euclidean>,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<usize> {
        // Later duplicates of an id win
        let mut latest: HashMap<String, usize> = HashMap::new();
        for (idx, embedded) in chunks.iter().enumerate() {
            latest.insert(embedded.chunk.id.clone(), idx);
        }

        let mut inserted = 0;
        for (idx, embedded) in chunks.into_iter().enumerate() {
            if latest.get(&embedded.chunk.id) != Some(&idx) {
                continue;
            }
            let item = self.next_id;
            writer.add_item(wtxn, item, &embedded.vector)?;
            self.records.put(wtxn, &item, &embedded.chunk)?;
            self.ids.put(wtxn, &embedded.chunk.id, &item)?;
            self.next_id += 1;
            inserted += 1;
        }
        Ok(inserted)
    }

    fn build(&self, wtxn: &mut heed::RwTxn, writer: &Writer<Euclidean>) -> Result<()> {
        if self.records.is_empty(wtxn)? {
            return Ok(());
        }
        let mut rng = StdRng::seed_from_u64(BUILD_SEED);
        writer.builder(&mut rng).build(wtxn)?;
        Ok(())
    }

    fn check_dimensions(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        match chunks.iter().find(|c| c.vector.len() != self.dimensions) {
            Some(bad) => Err(Error::dimension_mismatch(self.dimensions, bad.vector.len())),
            None => Ok(()),
        }
    }
}

/// Exact L2 distances for `items`, closest first, ties by item id
fn exact_scan(
    reader: &Reader<'_, Euclidean>,
    rtxn: &RoTxn,
    query: &[f32],
    items: &[ItemId],
) -> Result<Vec<(ItemId, f32)>> {
    let mut scored = Vec::with_capacity(items.len());
    for &item in items {
        if let Some(vector) = reader.item_vector(rtxn, item)? {
            scored.push((item, euclidean(query, &vector)));
        }
    }
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    Ok(scored)
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ContentType;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn embedded(path: &str, start: usize, lang: &str, vector: Vec<f32>) -> EmbeddedChunk {
        let kind = if lang == "markdown" {
            ContentType::Docs
        } else {
            ContentType::Code
        };
        EmbeddedChunk::new(
            Chunk::new(
                path.to_string(),
                (start, start + 4),
                format!("content of {path} starting at line {start}"),
                lang,
                kind,
            ),
            vector,
        )
    }

    fn open(dir: &Path) -> Collection {
        Collection::open(&dir.join("codebase.lmdb"), CollectionName::Codebase, 3).unwrap()
    }

    fn sample() -> Vec<EmbeddedChunk> {
        vec![
            embedded("src/auth.rs", 1, "rust", vec![1.0, 0.0, 0.0]),
            embedded("src/math.rs", 1, "rust", vec![0.0, 1.0, 0.0]),
            embedded("README.md", 1, "markdown", vec![0.9, 0.1, 0.0]),
        ]
    }

    #[test]
    fn test_replace_and_search() {
        let dir = tempdir().unwrap();
        let mut collection = open(dir.path());
        assert_eq!(collection.replace_all(sample()).unwrap(), 3);

        let hits = collection.search(&[1.0, 0.0, 0.0], 2, &Filters::default()).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.file_path, "src/auth.rs");
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].chunk.file_path, "README.md");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn test_filters_are_applied_in_store() {
        let dir = tempdir().unwrap();
        let mut collection = open(dir.path());
        collection.replace_all(sample()).unwrap();

        let filters = Filters {
            kind: Some(ContentType::Docs),
            ..Filters::default()
        };
        let hits = collection.search(&[1.0, 0.0, 0.0], 5, &filters).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.language, "markdown");

        let filters = Filters {
            languages: vec!["rust".to_string()],
            ..Filters::default()
        };
        let hits = collection.search(&[0.0, 1.0, 0.0], 5, &filters).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.file_path, "src/math.rs");
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempdir().unwrap();
        let mut collection = open(dir.path());
        let result = collection.replace_all(vec![embedded("a.rs", 1, "rust", vec![1.0, 0.0])]);
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(matches!(
            collection.search(&[1.0], 1, &Filters::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_reopen_with_other_dimensions_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("codebase.lmdb");
        {
            let mut collection = Collection::open(&path, CollectionName::Codebase, 3).unwrap();
            collection.replace_all(sample()).unwrap();
        }
        assert!(matches!(
            Collection::open(&path, CollectionName::Codebase, 8),
            Err(Error::Configuration(_))
        ));
        let reopened = Collection::open(&path, CollectionName::Codebase, 3).unwrap();
        assert_eq!(reopened.len().unwrap(), 3);
    }

    #[test]
    fn test_delete_by_path_and_upsert() {
        let dir = tempdir().unwrap();
        let mut collection = open(dir.path());
        collection.replace_all(sample()).unwrap();

        let removed: HashSet<String> = ["src/math.rs".to_string()].into();
        assert_eq!(collection.delete_by_path(&removed).unwrap(), 1);
        assert_eq!(collection.file_count().unwrap(), 2);

        // Same location replaces, new location adds
        collection
            .upsert(vec![
                embedded("src/auth.rs", 1, "rust", vec![0.0, 0.0, 1.0]),
                embedded("src/new.rs", 1, "rust", vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();
        assert_eq!(collection.len().unwrap(), 3);

        let hits = collection.search(&[0.0, 0.0, 1.0], 1, &Filters::default()).unwrap();
        assert_eq!(hits[0].chunk.file_path, "src/auth.rs");
    }

    #[test]
    fn test_copy_without_changed_paths() {
        let dir = tempdir().unwrap();
        let mut live = open(dir.path());
        live.replace_all(sample()).unwrap();

        let mut staged =
            Collection::open(&dir.path().join("staged.lmdb"), CollectionName::Codebase, 3).unwrap();
        let excluded: HashSet<String> = ["README.md".to_string()].into();
        assert_eq!(staged.copy_without(&live, &excluded).unwrap(), 2);

        let mut paths: Vec<_> = staged
            .all_chunks()
            .unwrap()
            .into_iter()
            .map(|c| c.file_path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["src/auth.rs".to_string(), "src/math.rs".to_string()]);

        let hits = staged.search(&[0.0, 1.0, 0.0], 1, &Filters::default()).unwrap();
        assert_eq!(hits[0].chunk.file_path, "src/math.rs");
    }

    #[test]
    fn test_empty_collection_search() {
        let dir = tempdir().unwrap();
        let mut collection = open(dir.path());
        assert!(collection
            .search(&[1.0, 0.0, 0.0], 3, &Filters::default())
            .unwrap()
            .is_empty());

        collection.replace_all(Vec::new()).unwrap();
        assert!(collection.is_empty().unwrap());
    }
}
