//! Recent search queries, newest first.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::StorageManager;

const HISTORY_KEY: &str = "history.json";

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub struct SearchHistory {
    storage: Arc<dyn StorageManager>,
    limit: usize,
    entries: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct HistoryFile {
    queries: Vec<String>,
}

impl SearchHistory {
    /// Load history from `storage`. A missing file is an empty history.
    pub fn load(storage: Arc<dyn StorageManager>, limit: usize) -> Result<Self, HistoryError> {
        let mut entries = if storage.exists(HISTORY_KEY) {
            let file: HistoryFile = serde_json::from_slice(&storage.read(HISTORY_KEY)?)?;
            file.queries
        } else {
            vec![]
        };
        entries.truncate(limit);

        Ok(Self {
            storage,
            limit,
            entries,
        })
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Remember `query`. Blank and already-known queries are ignored.
    pub fn record(&mut self, query: &str) -> Result<(), HistoryError> {
        let query = query.trim();
        if query.is_empty() || self.entries.iter().any(|q| q == query) {
            return Ok(());
        }

        self.entries.insert(0, query.to_string());
        self.entries.truncate(self.limit);
        self.save()
    }

    pub fn clear(&mut self) -> Result<(), HistoryError> {
        self.entries.clear();
        self.storage.delete(HISTORY_KEY)?;
        Ok(())
    }

    fn save(&self) -> Result<(), HistoryError> {
        let file = HistoryFile {
            queries: self.entries.clone(),
        };
        self.storage
            .write(HISTORY_KEY, &serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }
}
