//! Semantic search over a static document collection.
//!
//! # Architecture
//!
//! - `vector`: embeddings with a precomputed magnitude
//! - `storage`: binary persistence of the embedding collection
//! - `embeddings`: embedding model wrapper and batched encoding
//! - `preprocess`: document text preparation
//! - `ranker`: cosine similarity ranking
//! - `pipeline`: session lifecycle tying the above together

pub mod embeddings;
mod pipeline;
mod preprocess;
mod ranker;
mod storage;
mod vector;

pub use embeddings::FastEmbedLoader;
pub use pipeline::{InitError, PipelineState, QueryError, SearchPipeline};
pub use ranker::ScoredResult;
pub use storage::{VectorStorage, CACHE_KEY};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "bge-small-en-v1.5";
