use super::tokenizer::tokenize;
use super::FtsResult;
use crate::chunker::Chunk;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_K1: f32 = 1.5;
pub const DEFAULT_B: f32 = 0.75;

const INDEX_FILE: &str = "index.json";
const POSTINGS_FILE: &str = "term-chunks.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DocEntry {
    id: String,
    length: u32,
}

/// Collection-level statistics persisted as `bm25/index.json`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexFile {
    k1: f32,
    b: f32,
    total_docs: usize,
    avg_doc_length: f32,
    /// Documents in insertion order
    docs: Vec<DocEntry>,
    doc_freq: BTreeMap<String, usize>,
}

/// In-memory BM25 keyword index over chunk text.
///
/// Document length statistics are recomputed on every add and remove.
#[derive(Debug, Clone)]
pub struct KeywordIndex {
    k1: f32,
    b: f32,
    docs: Vec<DocEntry>,
    slots: HashMap<String, usize>,
    postings: HashMap<String, HashMap<String, u32>>,
    avg_doc_length: f32,
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_K1, DEFAULT_B)
    }

    pub fn with_params(k1: f32, b: f32) -> Self {
        Self {
            k1,
            b,
            docs: Vec::new(),
            slots: HashMap::new(),
            postings: HashMap::new(),
            avg_doc_length: 0.0,
        }
    }

    /// Build a fresh index over the given chunks
    pub fn build<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> Self {
        let mut index = Self::new();
        for chunk in chunks {
            index.insert(&chunk.id, &chunk.content);
        }
        index.recompute_stats();
        debug!(
            docs = index.len(),
            terms = index.postings.len(),
            "Built keyword index"
        );
        index
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn avg_doc_length(&self) -> f32 {
        self.avg_doc_length
    }

    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, HashMap::len)
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.slots.contains_key(chunk_id)
    }

    /// Add (or replace) a document
    pub fn add(&mut self, chunk_id: &str, text: &str) {
        if self.contains(chunk_id) {
            self.remove_postings(chunk_id);
            self.docs.retain(|d| d.id != chunk_id);
            self.reindex_slots();
        }
        self.insert(chunk_id, text);
        self.recompute_stats();
    }

    /// Remove a document; returns whether it was present
    pub fn remove(&mut self, chunk_id: &str) -> bool {
        if !self.contains(chunk_id) {
            return false;
        }
        self.remove_postings(chunk_id);
        self.docs.retain(|d| d.id != chunk_id);
        self.reindex_slots();
        self.recompute_stats();
        true
    }

    /// Score documents sharing at least one term with the query.
    ///
    /// Ties keep insertion order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<FtsResult> {
        if self.docs.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut terms = tokenize(query);
        let mut seen = std::collections::HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));

        let n = self.docs.len() as f32;
        let mut scores: HashMap<usize, f32> = HashMap::new();
        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let df = posting.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (chunk_id, &tf) in posting {
                let Some(&slot) = self.slots.get(chunk_id) else {
                    continue;
                };
                let tf = tf as f32;
                let len = self.docs[slot].length as f32;
                let norm = if self.avg_doc_length > 0.0 {
                    1.0 - self.b + self.b * len / self.avg_doc_length
                } else {
                    1.0
                };
                let score = idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm);
                *scores.entry(slot).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .map(|(slot, score)| FtsResult {
                chunk_id: self.docs[slot].id.clone(),
                score,
            })
            .collect()
    }

    /// Write `index.json` and `term-chunks.json` into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let doc_freq = self
            .postings
            .iter()
            .map(|(term, posting)| (term.clone(), posting.len()))
            .collect();
        let index = IndexFile {
            k1: self.k1,
            b: self.b,
            total_docs: self.docs.len(),
            avg_doc_length: self.avg_doc_length,
            docs: self.docs.clone(),
            doc_freq,
        };
        let postings: BTreeMap<&String, BTreeMap<&String, &u32>> = self
            .postings
            .iter()
            .map(|(term, posting)| (term, posting.iter().collect()))
            .collect();

        std::fs::write(dir.join(INDEX_FILE), serde_json::to_vec(&index)?)?;
        std::fs::write(dir.join(POSTINGS_FILE), serde_json::to_vec(&postings)?)?;
        Ok(())
    }

    /// Load an index written by [`KeywordIndex::save`]
    pub fn load(dir: &Path) -> Result<Self> {
        let index: IndexFile = serde_json::from_slice(&std::fs::read(dir.join(INDEX_FILE))?)?;
        let postings: HashMap<String, HashMap<String, u32>> =
            serde_json::from_slice(&std::fs::read(dir.join(POSTINGS_FILE))?)?;

        let mut loaded = Self {
            k1: index.k1,
            b: index.b,
            docs: index.docs,
            slots: HashMap::new(),
            postings,
            avg_doc_length: 0.0,
        };
        loaded.reindex_slots();
        loaded.recompute_stats();
        Ok(loaded)
    }

    fn insert(&mut self, chunk_id: &str, text: &str) {
        let tokens = tokenize(text);
        let slot = self.docs.len();
        self.docs.push(DocEntry {
            id: chunk_id.to_string(),
            length: tokens.len() as u32,
        });
        self.slots.insert(chunk_id.to_string(), slot);

        for token in tokens {
            *self
                .postings
                .entry(token)
                .or_default()
                .entry(chunk_id.to_string())
                .or_insert(0) += 1;
        }
    }

    fn remove_postings(&mut self, chunk_id: &str) {
        self.postings.retain(|_, posting| {
            posting.remove(chunk_id);
            !posting.is_empty()
        });
    }

    fn reindex_slots(&mut self) {
        self.slots = self
            .docs
            .iter()
            .enumerate()
            .map(|(slot, doc)| (doc.id.clone(), slot))
            .collect();
    }

    fn recompute_stats(&mut self) {
        self.avg_doc_length = if self.docs.is_empty() {
            0.0
        } else {
            let total: u64 = self.docs.iter().map(|d| d.length as u64).sum();
            total as f32 / self.docs.len() as f32
        };
    }
}
