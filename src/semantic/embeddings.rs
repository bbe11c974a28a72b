//! Embedding model wrapper and batched encoding.
//!
//! - `EmbeddingOracle`: anything that turns texts into fixed-length vectors
//! - `FastEmbedModel`: fastembed-backed oracle, downloaded on first use
//! - `Embedder`: batches calls to an oracle and checks its output

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{InitOptions, TextEmbedding};
use indicatif::{ProgressBar, ProgressStyle};

use crate::semantic::vector::EmbeddingVector;

/// Texts per oracle call. Bounds peak memory regardless of dataset size.
pub const BATCH_SIZE: usize = 100;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),
}

/// Load-once, call-many text embedding model.
pub trait EmbeddingOracle: Send {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// One vector per text, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError>;
}

/// Produces an oracle when the pipeline enters its model-loading phase.
pub trait OracleLoader: Send {
    fn model_name(&self) -> &str;

    fn load(&self) -> Result<Box<dyn EmbeddingOracle>, EmbeddingError>;
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct FastEmbedModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastEmbedModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded on first use if not cached.
    /// Model files are stored directly in `models_dir`.
    pub fn new(model_name: &str, models_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = parse_model_name(model_name)?;

        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::Unavailable(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Embed a probe string to learn the output dimensionality.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::Unavailable(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::Unavailable("Model returned no embedding".to_string()))
    }
}

impl EmbeddingOracle for FastEmbedModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EncodingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed(texts.to_vec(), Some(BATCH_SIZE))
            .map_err(|e| EmbeddingError::EncodingFailed(e.to_string()))
    }
}

/// Loads `FastEmbedModel` from a name and a cache directory.
pub struct FastEmbedLoader {
    pub model_name: String,
    pub cache_dir: PathBuf,
}

impl FastEmbedLoader {
    /// Model files live in the `models/` subdirectory of `cache_dir`.
    pub fn models_dir(&self) -> PathBuf {
        self.cache_dir.join("models")
    }
}

impl OracleLoader for FastEmbedLoader {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn load(&self) -> Result<Box<dyn EmbeddingOracle>, EmbeddingError> {
        let model = FastEmbedModel::new(&self.model_name, self.models_dir())?;
        log::info!(
            "Loaded embedding model '{}' ({} dimensions)",
            model.name(),
            model.dimensions()
        );
        Ok(Box::new(model))
    }
}

/// Parse model name string to fastembed enum.
pub fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
        "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-small-en-v1.5-q" | "bgesmallenv15q" => Ok(fastembed::EmbeddingModel::BGESmallENV15Q),
        "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-base-en-v1.5-q" | "bgebaseenv15q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
        "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "bge-large-en-v1.5-q" | "bgelargeenv15q" => Ok(fastembed::EmbeddingModel::BGELargeENV15Q),
        _ => Err(EmbeddingError::Unavailable(format!(
            "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 (add -q suffix for quantized)",
            name
        ))),
    }
}

/// SHA256 of a model name, used to tag cached collections.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Batched, validated access to an oracle.
pub struct Embedder {
    oracle: Box<dyn EmbeddingOracle>,
    show_progress: bool,
}

impl Embedder {
    pub fn new(oracle: Box<dyn EmbeddingOracle>) -> Self {
        Self {
            oracle,
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while encoding more than one batch.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn name(&self) -> &str {
        self.oracle.name()
    }

    pub fn dimensions(&self) -> usize {
        self.oracle.dimensions()
    }

    /// Embed `texts` in chunks of `BATCH_SIZE`.
    ///
    /// The whole call fails if any chunk fails; nothing partial is returned.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let total_batches = texts.len().div_ceil(BATCH_SIZE);
        let progress = (self.show_progress && total_batches > 1).then(|| {
            let bar = ProgressBar::new(texts.len() as u64);
            if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}") {
                bar.set_style(style);
            }
            bar.set_message("Encoding dataset");
            bar
        });

        let dimensions = self.oracle.dimensions();
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_idx, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            let embedded = self.oracle.embed(batch)?;

            if embedded.len() != batch.len() {
                return Err(EmbeddingError::EncodingFailed(format!(
                    "batch {} returned {} vectors for {} texts",
                    batch_idx + 1,
                    embedded.len(),
                    batch.len()
                )));
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != dimensions) {
                return Err(EmbeddingError::EncodingFailed(format!(
                    "batch {} returned a {}-dimensional vector, expected {}",
                    batch_idx + 1,
                    bad.len(),
                    dimensions
                )));
            }

            vectors.extend(embedded);

            if total_batches > 1 {
                log::info!("Encoded batch {}/{}", batch_idx + 1, total_batches);
            }
            if let Some(bar) = &progress {
                bar.inc(batch.len() as u64);
            }
        }

        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        Ok(vectors)
    }
}
