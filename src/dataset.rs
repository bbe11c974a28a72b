//! Document collection model and loading.
//!
//! The dataset is a JSON array of loosely-structured records. Every field is
//! optional; unknown fields are kept so they can be shown as result details.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Any other fields present in the source record.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A loaded dataset together with the digest of its raw bytes.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub documents: Vec<DocumentRecord>,
    pub digest: [u8; 32],
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read dataset file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to fetch dataset from {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },

    #[error("dataset is not a JSON array of records: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid dataset location: {0}")]
    InvalidLocation(String),
}

/// Where the document collection comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetSource {
    File(PathBuf),
    Url(url::Url),
}

impl DatasetSource {
    /// Interpret a config/CLI string: `http(s)://` is fetched, anything else
    /// is a local path.
    pub fn parse(location: &str) -> Result<Self, DatasetError> {
        let location = location.trim();
        if location.is_empty() {
            return Err(DatasetError::InvalidLocation("empty location".to_string()));
        }

        if location.starts_with("http://") || location.starts_with("https://") {
            let url = url::Url::parse(location)
                .map_err(|e| DatasetError::InvalidLocation(format!("{location}: {e}")))?;
            return Ok(DatasetSource::Url(url));
        }

        Ok(DatasetSource::File(PathBuf::from(location)))
    }

    /// Load and parse the dataset. Blocking.
    pub fn fetch(&self) -> Result<Dataset, DatasetError> {
        let bytes = match self {
            DatasetSource::File(path) => {
                log::info!("Reading dataset from {}", path.display());
                std::fs::read(path).map_err(|source| DatasetError::Read {
                    path: path.clone(),
                    source,
                })?
            }
            DatasetSource::Url(url) => {
                log::info!("Fetching dataset from {url}");
                let fetch_err = |source| DatasetError::Fetch {
                    url: url.to_string(),
                    source,
                };
                reqwest::blocking::Client::builder()
                    .timeout(FETCH_TIMEOUT)
                    .build()
                    .map_err(fetch_err)?
                    .get(url.clone())
                    .send()
                    .and_then(|r| r.error_for_status())
                    .and_then(|r| r.bytes())
                    .map_err(fetch_err)?
                    .to_vec()
            }
        };

        let dataset = Dataset::from_bytes(&bytes)?;
        log::info!("Dataset loaded: {} documents", dataset.documents.len());
        Ok(dataset)
    }
}

impl std::fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetSource::File(path) => write!(f, "{}", path.display()),
            DatasetSource::Url(url) => write!(f, "{url}"),
        }
    }
}

impl Dataset {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatasetError> {
        let documents: Vec<DocumentRecord> = serde_json::from_slice(bytes)?;
        Ok(Self {
            documents,
            digest: Sha256::digest(bytes).into(),
        })
    }
}
