//! In-memory semantic index with brute-force cosine similarity search.
//!
//! The index is created once with a fixed dimension and metric, then filled
//! by bulk upserts from the ingestion collaborator. Queries take only a read
//! lock, so concurrent turns never block each other on retrieval.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::info;

use sapa_core::error::SapaError;
use sapa_core::types::{ChunkMetadata, DocumentChunk, Language, RetrievedPassage};

/// Similarity metric used to rank passages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
}

impl FromStr for DistanceMetric {
    type Err = SapaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(SapaError::Config(format!("unsupported metric '{}'", other))),
        }
    }
}

/// Restricts a query to passages whose metadata matches every given field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub language: Option<Language>,
    pub category: Option<String>,
    pub source: Option<String>,
}

impl MetadataFilter {
    pub fn language(language: Language) -> Self {
        Self {
            language: Some(language),
            ..Self::default()
        }
    }

    fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(language) = self.language {
            if meta.language != language {
                return false;
            }
        }
        if let Some(ref category) = self.category {
            if &meta.category != category {
                return false;
            }
        }
        if let Some(ref source) = self.source {
            if &meta.source != source {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexSpec {
    dimension: usize,
    metric: DistanceMetric,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    /// Insertion order, used to break score ties.
    seq: u64,
    embedding: Vec<f32>,
    text: String,
    metadata: ChunkMetadata,
}

#[derive(Debug, Default)]
struct IndexState {
    spec: Option<IndexSpec>,
    entries: HashMap<String, IndexEntry>,
    next_seq: u64,
}

/// Shared semantic index over pre-embedded document chunks.
#[derive(Debug, Clone, Default)]
pub struct SemanticIndex {
    state: Arc<RwLock<IndexState>>,
}

impl SemanticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexState>, SapaError> {
        self.state
            .read()
            .map_err(|e| SapaError::Index(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexState>, SapaError> {
        self.state
            .write()
            .map_err(|e| SapaError::Index(format!("Lock poisoned: {}", e)))
    }

    /// Create the index with a fixed dimension and metric.
    ///
    /// Repeating the call with the same parameters is a no-op. A call with a
    /// different dimension or metric fails with a configuration error and
    /// leaves the index untouched.
    pub fn ensure_created(&self, dimension: usize, metric: DistanceMetric) -> Result<(), SapaError> {
        if dimension == 0 {
            return Err(SapaError::Config(
                "index dimension must be greater than zero".into(),
            ));
        }

        let requested = IndexSpec { dimension, metric };
        let mut state = self.write()?;
        let current = state.spec;
        match current {
            Some(existing) if existing == requested => Ok(()),
            Some(existing) => Err(SapaError::Config(format!(
                "index already created with dimension {} ({:?}), requested {} ({:?})",
                existing.dimension, existing.metric, dimension, metric
            ))),
            None => {
                state.spec = Some(requested);
                info!(dimension, ?metric, "Semantic index created");
                Ok(())
            }
        }
    }

    /// Insert or replace chunks. The whole batch is checked before anything
    /// is written, so a single bad vector rejects the batch.
    ///
    /// Replacing an existing id keeps its original position for tie-breaking.
    pub fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<usize, SapaError> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let spec = state
            .spec
            .ok_or_else(|| SapaError::Index("index has not been created".into()))?;

        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != spec.dimension) {
            return Err(SapaError::Index(format!(
                "chunk '{}' has dimension {}, index expects {}",
                bad.id,
                bad.embedding.len(),
                spec.dimension
            )));
        }

        let count = chunks.len();
        for chunk in chunks {
            let metadata = chunk.metadata();
            let seq = match state.entries.get(&chunk.id) {
                Some(existing) => existing.seq,
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    seq
                }
            };
            state.entries.insert(
                chunk.id,
                IndexEntry {
                    seq,
                    embedding: chunk.embedding,
                    text: chunk.text,
                    metadata,
                },
            );
        }
        Ok(count)
    }

    /// Return at most `k` passages ordered by descending similarity, ties
    /// broken by insertion order.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedPassage>, SapaError> {
        let state = self.read()?;
        let spec = state
            .spec
            .ok_or_else(|| SapaError::Index("index has not been created".into()))?;

        if vector.len() != spec.dimension {
            return Err(SapaError::Index(format!(
                "query vector has dimension {}, index expects {}",
                vector.len(),
                spec.dimension
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, &String, &IndexEntry)> = state
            .entries
            .iter()
            .filter(|(_, entry)| filter.map_or(true, |f| f.matches(&entry.metadata)))
            .map(|(id, entry)| (cosine_similarity(vector, &entry.embedding), id, entry))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.seq.cmp(&b.2.seq))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, id, entry)| RetrievedPassage {
                chunk_id: id.clone(),
                text: entry.text.clone(),
                score: score as f32,
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    /// Dimension fixed by [`ensure_created`](Self::ensure_created), if any.
    pub fn dimension(&self) -> Option<usize> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.spec.map(|spec| spec.dimension))
    }

    /// Return the number of chunks currently stored in the index.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
