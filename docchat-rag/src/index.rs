//! Per-session similarity index over chunk embeddings.
//!
//! [`VectorIndex`] is the seam between the registry and the search structure.
//! [`FlatIndex`] is the exact implementation: a brute-force cosine scan with a
//! `document_id → chunk_ids` secondary map so removal does not scan.
//!
//! Similarity is always cosine. Embedding magnitudes carry no meaning for the
//! providers this crate targets, so the metric is not configurable.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// A single query hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    /// The matching chunk.
    pub chunk_id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// An index entry as exported for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Chunk identifier.
    pub chunk_id: String,
    /// Owning document identifier.
    pub document_id: String,
    /// The vector as inserted.
    pub vector: Vec<f32>,
}

/// A similarity index over chunk vectors of one fixed dimension.
///
/// Implementations are not internally synchronized; the registry guards each
/// session's index with its own lock.
pub trait VectorIndex: Send + Sync + Debug {
    /// The fixed vector dimension `D`.
    fn dimensions(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// Whether the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `chunk_id` is stored.
    fn contains(&self, chunk_id: &str) -> bool;

    /// Chunk ids currently stored for `document_id`.
    fn chunk_ids_for_document(&self, document_id: &str) -> Vec<String>;

    /// Add the vector for `chunk_id`, or replace it if already present.
    ///
    /// # Errors
    ///
    /// [`RagError::DimensionMismatch`] if `vector.len() != dimensions()`,
    /// [`RagError::InvalidVector`] if it has NaN or infinite components.
    fn insert(&mut self, chunk_id: &str, document_id: &str, vector: Vec<f32>) -> Result<()>;

    /// Remove every vector belonging to `document_id`, returning their chunk ids.
    /// No-op when the document has none.
    fn remove_by_document(&mut self, document_id: &str) -> Vec<String>;

    /// The `k` most similar chunks to `vector`, best first.
    ///
    /// Ties are broken by insertion order, earliest first. `k` is clamped to
    /// [`len`](VectorIndex::len).
    ///
    /// # Errors
    ///
    /// [`RagError::EmptyIndex`] if the index is empty and `k > 0`;
    /// [`RagError::DimensionMismatch`] or [`RagError::InvalidVector`] for a bad query.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>>;

    /// All entries in insertion order.
    fn entries(&self) -> Vec<IndexEntry>;

    /// Check a vector against this index's contract.
    fn validate(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions() {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions(),
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(RagError::InvalidVector(
                "contains NaN or infinite values".to_string(),
            ));
        }
        Ok(())
    }

    /// Swap all of a document's vectors for `entries` as one unit.
    ///
    /// Every vector is validated before anything is removed, so on error the
    /// index is unchanged. Returns the chunk ids that were removed.
    fn replace_document(
        &mut self,
        document_id: &str,
        entries: Vec<(String, Vec<f32>)>,
    ) -> Result<Vec<String>> {
        for (_, vector) in &entries {
            self.validate(vector)?;
        }
        let removed = self.remove_by_document(document_id);
        for (chunk_id, vector) in entries {
            self.insert(&chunk_id, document_id, vector)?;
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    document_id: String,
    vector: Vec<f32>,
    norm_sq: f64,
    seq: u64,
}

fn norm_sq(vector: &[f32]) -> f64 {
    vector.iter().map(|&x| f64::from(x) * f64::from(x)).sum()
}

/// Cosine similarity from a dot product and squared norms.
///
/// Computed as `dot / sqrt(|a|² |b|²)` in `f64`, which makes a vector's
/// similarity with itself exactly `1.0`. Zero vectors score `0.0`.
fn cosine(a: &[f32], a_norm_sq: f64, b: &[f32], b_norm_sq: f64) -> f32 {
    if a_norm_sq == 0.0 || b_norm_sq == 0.0 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum();
    ((dot / (a_norm_sq * b_norm_sq).sqrt()) as f32).clamp(-1.0, 1.0)
}

/// An exact vector index using a linear cosine scan.
///
/// Insert and removal are O(1) per chunk; query is O(n·D + k log k). At the
/// hundreds-to-thousands of chunks a chat session holds this is fast enough,
/// and an approximate structure can replace it behind [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimensions: usize,
    slots: HashMap<String, Slot>,
    by_document: HashMap<String, HashSet<String>>,
    next_seq: u64,
}

impl FlatIndex {
    /// Create an empty index for `dimensions`-long vectors.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            slots: HashMap::new(),
            by_document: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Rebuild an index from a snapshot, preserving insertion order.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self> {
        let mut index = Self::new(snapshot.dimensions);
        snapshot.restore_into(&mut index)?;
        Ok(index)
    }

    fn detach(&mut self, chunk_id: &str, document_id: &str) {
        if let Some(ids) = self.by_document.get_mut(document_id) {
            ids.remove(chunk_id);
            if ids.is_empty() {
                self.by_document.remove(document_id);
            }
        }
    }
}

impl VectorIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn contains(&self, chunk_id: &str) -> bool {
        self.slots.contains_key(chunk_id)
    }

    fn chunk_ids_for_document(&self, document_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .by_document
            .get(document_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort_by_key(|id| self.slots.get(id).map(|s| s.seq));
        ids
    }

    fn insert(&mut self, chunk_id: &str, document_id: &str, vector: Vec<f32>) -> Result<()> {
        self.validate(&vector)?;
        let norm_sq = norm_sq(&vector);

        // Replacing keeps the original insertion rank.
        let seq = match self.slots.get(chunk_id) {
            Some(existing) => {
                let (seq, previous_doc) = (existing.seq, existing.document_id.clone());
                if previous_doc != document_id {
                    self.detach(chunk_id, &previous_doc);
                }
                seq
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };

        self.by_document
            .entry(document_id.to_string())
            .or_default()
            .insert(chunk_id.to_string());
        self.slots.insert(
            chunk_id.to_string(),
            Slot { document_id: document_id.to_string(), vector, norm_sq, seq },
        );
        Ok(())
    }

    fn remove_by_document(&mut self, document_id: &str) -> Vec<String> {
        let Some(ids) = self.by_document.remove(document_id) else {
            return Vec::new();
        };
        let mut removed: Vec<(u64, String)> = ids
            .into_iter()
            .filter_map(|id| self.slots.remove(&id).map(|slot| (slot.seq, id)))
            .collect();
        removed.sort_unstable();
        removed.into_iter().map(|(_, id)| id).collect()
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if self.slots.is_empty() {
            return Err(RagError::EmptyIndex);
        }
        self.validate(vector)?;

        let query_norm_sq = norm_sq(vector);
        let mut scored: Vec<(f32, u64, &str)> = self
            .slots
            .iter()
            .map(|(id, slot)| {
                (cosine(vector, query_norm_sq, &slot.vector, slot.norm_sq), slot.seq, id.as_str())
            })
            .collect();

        let rank = |a: &(f32, u64, &str), b: &(f32, u64, &str)| -> Ordering {
            b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
        };
        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank);

        Ok(scored
            .into_iter()
            .map(|(score, _, id)| IndexHit { chunk_id: id.to_string(), score })
            .collect())
    }

    fn entries(&self) -> Vec<IndexEntry> {
        let mut slots: Vec<(&String, &Slot)> = self.slots.iter().collect();
        slots.sort_unstable_by_key(|(_, slot)| slot.seq);
        slots
            .into_iter()
            .map(|(id, slot)| IndexEntry {
                chunk_id: id.clone(),
                document_id: slot.document_id.clone(),
                vector: slot.vector.clone(),
            })
            .collect()
    }
}

/// Serializable form of a [`VectorIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// The index dimension.
    pub dimensions: usize,
    /// Entries in insertion order.
    pub entries: Vec<IndexEntry>,
}

impl IndexSnapshot {
    /// Capture `index`.
    pub fn capture(index: &dyn VectorIndex) -> Self {
        Self { dimensions: index.dimensions(), entries: index.entries() }
    }

    /// Insert every entry into `index` in order.
    ///
    /// # Errors
    ///
    /// [`RagError::DimensionMismatch`] if `index` has a different dimension.
    pub fn restore_into(self, index: &mut dyn VectorIndex) -> Result<()> {
        if index.dimensions() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: index.dimensions(),
                actual: self.dimensions,
            });
        }
        for entry in self.entries {
            index.insert(&entry.chunk_id, &entry.document_id, entry.vector)?;
        }
        Ok(())
    }

    /// Encode with `bincode`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from `bincode`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
