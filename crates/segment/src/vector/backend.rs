//! Vector index backend trait.
//!
//! Defines the seam between the vector segment and the index structure that
//! answers nearest-neighbor queries. The segment owns the id↔label mapping
//! and the durability protocol; backends only see integer labels.
//!
//! The shipped backend is [`ExactIndex`](crate::vector::ExactIndex), an O(n)
//! exact scan whose results define the correctness contract. An ANN backend
//! (e.g. HNSW) plugs in behind the same trait without changing segment code.

use std::collections::HashSet;

use crate::vector::distance::DistanceMetric;

/// Internal integer label a vector is stored under.
///
/// Labels are allocated by the segment, monotonically increasing per
/// collection, and never reused.
pub type Label = u64;

/// Trait for swappable vector index implementations.
///
/// # Search contract
///
/// - Results are sorted by distance ascending, ties by label ascending.
/// - Results MUST include every candidate whose distance equals the k-th
///   smallest ("boundary ties"), so the caller can re-break ties by external
///   item id without losing candidates.
/// - When `allowed` is given, only those labels are candidates; an empty set
///   means no candidates at all.
/// - Removed labels never appear.
pub trait VectorIndexBackend: Send + Sync {
    /// Insert or replace the vector stored under `label`.
    fn upsert(&mut self, label: Label, vector: &[f32]);

    /// Remove a label. Returns true if it was present.
    ///
    /// Implementations may tombstone internally; removed labels must never be
    /// returned from [`search`](Self::search).
    fn remove(&mut self, label: Label) -> bool;

    /// Nearest neighbors of `query`, per the search contract above.
    fn search(&self, query: &[f32], k: usize, allowed: Option<&HashSet<Label>>)
        -> Vec<(Label, f32)>;

    /// Number of live (non-removed) vectors.
    fn len(&self) -> usize;

    /// Check if the index holds no live vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a label is live.
    fn contains(&self, label: Label) -> bool;

    /// Get the vector stored under a label.
    fn get(&self, label: Label) -> Option<&[f32]>;

    /// Live labels in ascending order (for snapshot serialization).
    fn labels(&self) -> Vec<Label>;

    /// The configured distance metric.
    fn metric(&self) -> DistanceMetric;
}

/// Which index implementation a collection uses.
///
/// Chosen at collection-creation time and recorded in the segment config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum IndexBackendKind {
    /// Exact O(n) scan
    #[default]
    Exact,
    // Hnsw(HnswParams) — seam reserved for an ANN backend
}

impl IndexBackendKind {
    /// Create a fresh backend instance for the given metric.
    pub fn create(&self, metric: DistanceMetric) -> Box<dyn VectorIndexBackend> {
        match self {
            IndexBackendKind::Exact => Box::new(crate::vector::ExactIndex::new(metric)),
        }
    }
}
