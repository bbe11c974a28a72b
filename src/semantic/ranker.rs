//! Cosine similarity ranking over an in-memory collection.
//!
//! A flat scan: every entry is scored against the query, so a query costs
//! O(N·D). Collections are expected to stay in the hundreds to low thousands.

use rayon::prelude::*;
use serde::Serialize;

use crate::semantic::vector::{magnitude, StoredEmbedding};

/// One document's score against a query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredResult {
    /// Position of the document in the dataset
    pub index: usize,
    /// Cosine similarity in [-1.0, 1.0]
    pub similarity: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("Dimension mismatch at entry {index}: expected {expected}, got {got}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },
}

/// Score every entry and sort by similarity descending, then index ascending.
///
/// Zero-magnitude vectors on either side score 0.
pub fn rank(query: &[f32], collection: &[StoredEmbedding]) -> Result<Vec<ScoredResult>, RankError> {
    if let Some((index, entry)) = collection
        .iter()
        .enumerate()
        .find(|(_, e)| !e.is_placeholder() && e.dimensions() != query.len())
    {
        return Err(RankError::DimensionMismatch {
            index,
            expected: query.len(),
            got: entry.dimensions(),
        });
    }

    let query_norm = magnitude(query);

    let mut results: Vec<ScoredResult> = collection
        .par_iter()
        .enumerate()
        .map(|(index, entry)| ScoredResult {
            index,
            similarity: cosine_similarity(query, query_norm, entry),
        })
        .collect();

    results.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.index.cmp(&b.index))
    });

    Ok(results)
}

/// Cosine similarity using the query norm and the entry's stored magnitude.
pub fn cosine_similarity(query: &[f32], query_norm: f32, entry: &StoredEmbedding) -> f32 {
    if query_norm == 0.0 || entry.magnitude() == 0.0 {
        return 0.0;
    }

    let dot_product: f32 = query
        .iter()
        .zip(entry.embedding())
        .map(|(a, b)| a * b)
        .sum();

    let similarity = dot_product / (query_norm * entry.magnitude());
    // -0.0 would sort below 0.0 under total_cmp
    if similarity.is_nan() || similarity == 0.0 {
        return 0.0;
    }
    similarity.clamp(-1.0, 1.0)
}
