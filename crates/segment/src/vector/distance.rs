//! Distance functions for vector similarity.
//!
//! All results are *distances*: non-negative, lower = closer, 0.0 for an
//! exact match (under L2 and Cosine). Functions are single-threaded and
//! iteration-order free, so equal inputs always produce equal outputs.
//! Vectors are used as-is; there is no implicit normalization.

use serde::{Deserialize, Serialize};

/// Distance metric configured per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Euclidean (L2) distance. The default.
    #[default]
    L2,
    /// Cosine distance: `1 − cosine_similarity`, clamped at 0.
    Cosine,
    /// Inner-product distance: `1 − dot(a, b)`, clamped at 0. Meaningful for
    /// normalized embeddings, where dot ∈ [-1, 1] and higher dot = closer.
    InnerProduct,
}

/// Compute the distance between two vectors under the given metric.
pub fn distance(a: &[f32], b: &[f32], metric: DistanceMetric) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "dimension mismatch in distance computation");

    match metric {
        DistanceMetric::L2 => l2_distance(a, b),
        DistanceMetric::Cosine => cosine_distance(a, b),
        DistanceMetric::InnerProduct => inner_product_distance(a, b),
    }
}

/// Euclidean distance: `sqrt(Σ (aᵢ − bᵢ)²)`. Range `[0, ∞)`.
fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Cosine distance: `1 − dot(a,b) / (||a|| · ||b||)`. Range `[0, 2]`,
/// clamped at 0 against rounding.
///
/// A zero-norm vector has undefined cosine similarity; it is treated as
/// maximally dissimilar (distance 1.0).
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        1.0
    } else {
        (1.0 - dot / (norm_a * norm_b)).max(0.0)
    }
}

/// Inner-product distance: `1 − dot(a,b)`, clamped at 0.
fn inner_product_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - dot_product(a, b)).max(0.0)
}

/// Dot product (inner product).
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm (Euclidean length).
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
