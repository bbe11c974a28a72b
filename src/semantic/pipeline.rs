//! Search session: model loading, embedding preparation, and queries.
//!
//! `init()` walks `Uninitialized -> LoadingModel -> PreparingEmbeddings -> Ready`.
//! A failure on that path is terminal (`Failed`) until `shutdown()`.
//! `search()` is only accepted in `Ready` and returns there whatever happens.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::dataset::{DatasetError, DatasetSource, DocumentRecord};
use crate::semantic::embeddings::{model_id_hash, Embedder, EmbeddingError, OracleLoader};
use crate::semantic::preprocess::prepare_texts;
use crate::semantic::ranker::{rank, RankError, ScoredResult};
use crate::semantic::storage::{CacheRecord, Fingerprint, VectorStorage, VectorStorageError};
use crate::semantic::vector::{EmbeddingCollection, StoredEmbedding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Uninitialized,
    LoadingModel,
    PreparingEmbeddings,
    Ready,
    Querying,
    Failed,
}

/// Session-fatal errors raised while reaching `Ready`.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Embedding storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Embedding cache is corrupt: {0} (run `sift cache clear` to rebuild it)")]
    StorageCorrupt(String),

    #[error("Embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Dataset fetch failed: {0}")]
    DatasetFetchFailed(#[from] DatasetError),

    #[error("Cannot initialize while {0:?}")]
    InvalidState(PipelineState),
}

impl From<VectorStorageError> for InitError {
    fn from(err: VectorStorageError) -> Self {
        match err {
            VectorStorageError::Unavailable(e) => InitError::StorageUnavailable(e.to_string()),
            VectorStorageError::Corrupt(msg) => InitError::StorageCorrupt(msg),
        }
    }
}

impl From<EmbeddingError> for InitError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Unavailable(msg) => InitError::EmbeddingUnavailable(msg),
            EmbeddingError::EncodingFailed(msg) => InitError::EncodingFailed(msg),
        }
    }
}

/// Recoverable errors for a single query. The pipeline stays as it was.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Search query is empty")]
    EmptyQuery,

    #[error("Search is not ready (state: {0:?})")]
    NotReady(PipelineState),

    #[error("Failed to encode query: {0}")]
    EncodingFailed(String),

    #[error(transparent)]
    DimensionMismatch(#[from] RankError),
}

pub struct SearchPipeline {
    loader: Box<dyn OracleLoader>,
    source: DatasetSource,
    storage: VectorStorage,
    show_progress: bool,

    embedder: Option<Embedder>,
    documents: Arc<[DocumentRecord]>,
    collection: EmbeddingCollection,
    state: watch::Sender<PipelineState>,
}

impl SearchPipeline {
    pub fn new(loader: Box<dyn OracleLoader>, source: DatasetSource, storage: VectorStorage) -> Self {
        let (state, _) = watch::channel(PipelineState::Uninitialized);
        Self {
            loader,
            source,
            storage,
            show_progress: false,
            embedder: None,
            documents: Arc::from(Vec::new()),
            collection: vec![],
            state,
        }
    }

    /// Show a progress bar while encoding the dataset.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Readiness signal; observes every state transition.
    pub fn readiness(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn documents(&self) -> &[DocumentRecord] {
        &self.documents
    }

    /// The loaded documents, shareable past the lifetime of a borrow.
    pub fn shared_documents(&self) -> Arc<[DocumentRecord]> {
        self.documents.clone()
    }

    pub fn collection(&self) -> &[StoredEmbedding] {
        &self.collection
    }

    /// Load the model and make the embedding collection available.
    pub fn init(&mut self) -> Result<(), InitError> {
        let state = self.state();
        if state != PipelineState::Uninitialized {
            return Err(InitError::InvalidState(state));
        }

        match self.prepare() {
            Ok(()) => {
                log::info!(
                    "Search ready: {} documents, {} embeddings",
                    self.documents.len(),
                    self.collection.len()
                );
                self.set_state(PipelineState::Ready);
                Ok(())
            }
            Err(err) => {
                log::error!("Failed to initialize search: {err}");
                self.release();
                self.set_state(PipelineState::Failed);
                Err(err)
            }
        }
    }

    /// Rank every document against `query`, best first.
    pub fn search(&mut self, query: &str) -> Result<Vec<ScoredResult>, QueryError> {
        let state = self.state();
        if state != PipelineState::Ready {
            return Err(QueryError::NotReady(state));
        }

        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let Some(embedder) = self.embedder.as_ref() else {
            return Err(QueryError::NotReady(state));
        };

        log::debug!("Searching for: {query}");
        self.set_state(PipelineState::Querying);
        let result = Self::run_query(embedder, &self.collection, query);
        self.set_state(PipelineState::Ready);

        result
    }

    /// Drop the model and in-memory data. A new session may `init()` again.
    pub fn shutdown(&mut self) {
        self.release();
        self.set_state(PipelineState::Uninitialized);
        log::info!("Search pipeline shut down");
    }

    /// Remove the persisted collection; the next `init()` re-encodes.
    pub fn clear_cache(&self) -> Result<(), VectorStorageError> {
        self.storage.clear()?;
        log::info!("Embedding cache cleared");
        Ok(())
    }

    fn run_query(
        embedder: &Embedder,
        collection: &[StoredEmbedding],
        query: &str,
    ) -> Result<Vec<ScoredResult>, QueryError> {
        let query_embedding = embedder
            .embed_batch(&[query.to_string()])
            .map_err(|e| QueryError::EncodingFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::EncodingFailed("no embedding returned".to_string()))?;

        Ok(rank(&query_embedding, collection)?)
    }

    fn prepare(&mut self) -> Result<(), InitError> {
        self.set_state(PipelineState::LoadingModel);
        log::info!("Loading embedding model '{}'", self.loader.model_name());
        let embedder = Embedder::new(self.loader.load()?).with_progress(self.show_progress);

        self.set_state(PipelineState::PreparingEmbeddings);
        let dataset = self.source.fetch()?;
        let fingerprint = Fingerprint {
            model_id: model_id_hash(embedder.name()),
            dataset_digest: dataset.digest,
        };

        let cached = self.storage.load()?;
        let collection = if is_usable(&cached, &fingerprint, dataset.documents.len(), embedder.dimensions()) {
            log::info!("Using cached embeddings ({} entries)", cached.data.len());
            cached.data
        } else {
            if !cached.is_empty() {
                log::warn!("Cached embeddings do not match the current model or dataset, re-encoding");
            }
            let record = CacheRecord {
                fingerprint,
                data: encode_documents(&embedder, &dataset.documents)?,
            };
            self.storage.save(&record)?;
            log::info!("Embeddings cached for future use");
            record.data
        };

        self.embedder = Some(embedder);
        self.documents = dataset.documents.into();
        self.collection = collection;
        Ok(())
    }

    fn release(&mut self) {
        self.embedder = None;
        self.documents = Arc::from(Vec::new());
        self.collection = vec![];
    }

    fn set_state(&self, state: PipelineState) {
        self.state.send_replace(state);
    }
}

fn is_usable(
    cached: &CacheRecord,
    fingerprint: &Fingerprint,
    document_count: usize,
    dimensions: usize,
) -> bool {
    !cached.is_empty()
        && cached.fingerprint == *fingerprint
        && cached.data.len() == document_count
        && cached.data.iter().all(|e| e.dimensions() == dimensions)
}

/// Embed every document; documents without text get placeholders at their index.
fn encode_documents(
    embedder: &Embedder,
    documents: &[DocumentRecord],
) -> Result<EmbeddingCollection, InitError> {
    log::info!("Encoding dataset...");

    let (indices, texts): (Vec<usize>, Vec<String>) = prepare_texts(documents)
        .into_iter()
        .map(|p| (p.index, p.text))
        .unzip();

    if texts.is_empty() {
        return Err(InitError::EncodingFailed(
            "no valid content to encode in the dataset".to_string(),
        ));
    }

    let skipped = documents.len() - texts.len();
    if skipped > 0 {
        log::warn!("{skipped} documents have no text to embed and will score 0");
    }

    let vectors = embedder.embed_batch(&texts)?;

    let mut collection = vec![StoredEmbedding::placeholder(embedder.dimensions()); documents.len()];
    for (index, vector) in indices.into_iter().zip(vectors) {
        collection[index] = StoredEmbedding::new(vector);
    }

    log::info!("Dataset encoded!");
    Ok(collection)
}
