//! Embedding vectors with a precomputed norm.

use serde::Serialize;

pub type EmbeddingVector = Vec<f32>;

/// Ordered, index-aligned with the document sequence.
pub type EmbeddingCollection = Vec<StoredEmbedding>;

/// Euclidean norm. Empty vectors have magnitude 0.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// An embedding and its magnitude, computed once at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEmbedding {
    embedding: EmbeddingVector,
    magnitude: f32,
}

impl StoredEmbedding {
    pub fn new(embedding: EmbeddingVector) -> Self {
        let magnitude = magnitude(&embedding);
        Self {
            embedding,
            magnitude,
        }
    }

    /// Zero vector standing in for a document with no embeddable text.
    pub fn placeholder(dimensions: usize) -> Self {
        Self {
            embedding: vec![0.0; dimensions],
            magnitude: 0.0,
        }
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn magnitude(&self) -> f32 {
        self.magnitude
    }

    pub fn dimensions(&self) -> usize {
        self.embedding.len()
    }

    pub fn is_placeholder(&self) -> bool {
        self.magnitude == 0.0
    }
}
