//! Exact nearest-neighbor backend.
//!
//! O(n) scan over a BTreeMap of vectors. Iteration is in label order, scoring
//! is single-threaded, and the final sort breaks ties by label, so identical
//! inputs always produce identical outputs. Sufficient for collections up to
//! the tens of thousands of vectors; beyond that an ANN backend belongs
//! behind the same trait.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::vector::backend::{Label, VectorIndexBackend};
use crate::vector::distance::{distance, DistanceMetric};

/// Exact O(n) vector index.
pub struct ExactIndex {
    vectors: BTreeMap<Label, Vec<f32>>,
    metric: DistanceMetric,
}

impl ExactIndex {
    /// Create an empty index with the given metric.
    pub fn new(metric: DistanceMetric) -> Self {
        ExactIndex {
            vectors: BTreeMap::new(),
            metric,
        }
    }
}

impl VectorIndexBackend for ExactIndex {
    fn upsert(&mut self, label: Label, vector: &[f32]) {
        self.vectors.insert(label, vector.to_vec());
    }

    fn remove(&mut self, label: Label) -> bool {
        // Eager removal: nothing to tombstone in a flat map
        self.vectors.remove(&label).is_some()
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        allowed: Option<&HashSet<Label>>,
    ) -> Vec<(Label, f32)> {
        if k == 0 || self.vectors.is_empty() {
            return Vec::new();
        }

        // BTreeMap iteration is in label order: deterministic before scoring
        let mut results: Vec<(Label, f32)> = self
            .vectors
            .iter()
            .filter(|(label, _)| allowed.map_or(true, |set| set.contains(label)))
            .map(|(label, vector)| (*label, distance(query, vector, self.metric)))
            .collect();

        results.sort_by(|(label_a, dist_a), (label_b, dist_b)| {
            dist_a
                .partial_cmp(dist_b)
                .unwrap_or(Ordering::Equal)
                .then_with(|| label_a.cmp(label_b))
        });

        if results.len() <= k {
            return results;
        }

        // Keep boundary ties: everything whose distance equals the k-th
        // smallest stays in, so the caller can re-break ties deterministically.
        let boundary = results[k - 1].1;
        let mut cut = k;
        while cut < results.len() && results[cut].1 == boundary {
            cut += 1;
        }
        results.truncate(cut);
        results
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn contains(&self, label: Label) -> bool {
        self.vectors.contains_key(&label)
    }

    fn get(&self, label: Label) -> Option<&[f32]> {
        self.vectors.get(&label).map(|v| v.as_slice())
    }

    fn labels(&self) -> Vec<Label> {
        self.vectors.keys().copied().collect()
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }
}
