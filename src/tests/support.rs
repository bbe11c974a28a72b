//! Shared fixtures: a deterministic stand-in for the embedding model and
//! helpers for building isolated pipelines.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::dataset::DatasetSource;
use crate::semantic::embeddings::{EmbeddingError, EmbeddingOracle, OracleLoader};
use crate::semantic::{SearchPipeline, VectorStorage};
use crate::storage::BackendLocal;

pub const TEST_DIMENSIONS: usize = 64;

/// Bag-of-words oracle: each lowercase word adds 1.0 to the bucket picked by
/// its FNV-1a hash. Identical across instances, so cached vectors stay
/// comparable with fresh query vectors.
pub struct VocabularyOracle {
    dimensions: usize,
    texts_embedded: Arc<AtomicUsize>,
}

impl VocabularyOracle {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            texts_embedded: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn bucket(&self, word: &str) -> usize {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

impl EmbeddingOracle for VocabularyOracle {
    fn name(&self) -> &str {
        "vocabulary"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; self.dimensions];
                for word in text.to_lowercase().split_whitespace() {
                    vector[self.bucket(word)] += 1.0;
                }
                vector
            })
            .collect())
    }
}

/// Loader for `VocabularyOracle` that counts how many texts were embedded.
#[derive(Clone, Default)]
pub struct VocabularyLoader {
    pub texts_embedded: Arc<AtomicUsize>,
    pub fail: bool,
}

impl VocabularyLoader {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }
}

impl OracleLoader for VocabularyLoader {
    fn model_name(&self) -> &str {
        "vocabulary"
    }

    fn load(&self) -> Result<Box<dyn EmbeddingOracle>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::Unavailable("model files missing".to_string()));
        }
        Ok(Box::new(VocabularyOracle {
            dimensions: TEST_DIMENSIONS,
            texts_embedded: self.texts_embedded.clone(),
        }))
    }
}

pub fn write_dataset(dir: &Path, json: &str) -> DatasetSource {
    let path = dir.join("dataset.json");
    std::fs::write(&path, json).unwrap();
    DatasetSource::File(path)
}

pub fn vector_storage(dir: &Path) -> VectorStorage {
    let backend = BackendLocal::new(dir.join("cache")).unwrap();
    VectorStorage::new(Arc::new(backend))
}

/// Pipeline over `json`, caching under `dir/cache`.
pub fn pipeline(dir: &Path, json: &str, loader: VocabularyLoader) -> SearchPipeline {
    SearchPipeline::new(
        Box::new(loader),
        write_dataset(dir, json),
        vector_storage(dir),
    )
}

pub const CAT_DOG: &str = r#"[
    {"title": "A", "content": "cat"},
    {"title": "B", "content": "dog"}
]"#;
