//! Persistence for the dataset's embedding collection.
//!
//! One record, stored under a fixed key. Binary format (little-endian):
//!
//! Header (81 bytes):
//! - magic: [u8; 4] ("SIFT")
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 of the model name)
//! - dataset_digest: [u8; 32] (SHA256 of the raw dataset bytes)
//! - dimensions: u32
//! - entry_count: u64
//!
//! Entries (repeated, in document order):
//! - magnitude: f32
//! - embedding: [f32; dimensions]
//!
//! Trailer:
//! - checksum: u32 (CRC32 of everything before it)

use std::io::Read;
use std::sync::Arc;

use crate::semantic::vector::{magnitude, EmbeddingCollection, StoredEmbedding};
use crate::storage::StorageManager;

/// Key of the single cache record.
pub const CACHE_KEY: &str = "datasetEmbeddings";

const MAGIC: &[u8; 4] = b"SIFT";
const FORMAT_VERSION: u8 = 1;
const HEADER_SIZE: usize = 4 + 1 + 32 + 32 + 4 + 8;
const CHECKSUM_SIZE: usize = 4;

/// Relative tolerance when checking a stored magnitude against the components.
const MAGNITUDE_TOLERANCE: f32 = 1e-4;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("Embedding storage unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    #[error("Embedding cache is corrupt: {0}")]
    Corrupt(String),
}

/// Identifies what a cached collection was computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fingerprint {
    pub model_id: [u8; 32],
    pub dataset_digest: [u8; 32],
}

/// The persisted record: the whole collection plus its fingerprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheRecord {
    pub fingerprint: Fingerprint,
    pub data: EmbeddingCollection,
}

impl CacheRecord {
    pub fn id(&self) -> &'static str {
        CACHE_KEY
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Load/save/clear of the cache record over a key-value collection.
#[derive(Clone)]
pub struct VectorStorage {
    backend: Arc<dyn StorageManager>,
}

impl VectorStorage {
    pub fn new(backend: Arc<dyn StorageManager>) -> Self {
        Self { backend }
    }

    /// Read the record. A missing record yields an empty one.
    pub fn load(&self) -> Result<CacheRecord, VectorStorageError> {
        let bytes = match self.backend.read(CACHE_KEY) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CacheRecord::default());
            }
            Err(e) => return Err(e.into()),
        };

        decode(&bytes)
    }

    /// Replace the record wholesale.
    pub fn save(&self, record: &CacheRecord) -> Result<(), VectorStorageError> {
        let bytes = encode(record)?;
        self.backend.write(CACHE_KEY, &bytes)?;
        log::debug!("Saved {} embeddings ({} bytes)", record.data.len(), bytes.len());
        Ok(())
    }

    /// Remove the record. Clearing a missing record is a no-op.
    pub fn clear(&self) -> Result<(), VectorStorageError> {
        self.backend.delete(CACHE_KEY)?;
        Ok(())
    }
}

fn encode(record: &CacheRecord) -> Result<Vec<u8>, VectorStorageError> {
    let dimensions = record.data.first().map(|e| e.dimensions()).unwrap_or(0);
    if let Some(bad) = record.data.iter().find(|e| e.dimensions() != dimensions) {
        return Err(VectorStorageError::Corrupt(format!(
            "collection mixes {} and {} dimensional vectors",
            dimensions,
            bad.dimensions()
        )));
    }

    let mut bytes =
        Vec::with_capacity(HEADER_SIZE + record.data.len() * (dimensions + 1) * 4 + CHECKSUM_SIZE);

    bytes.extend_from_slice(MAGIC);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&record.fingerprint.model_id);
    bytes.extend_from_slice(&record.fingerprint.dataset_digest);
    bytes.extend_from_slice(&(dimensions as u32).to_le_bytes());
    bytes.extend_from_slice(&(record.data.len() as u64).to_le_bytes());

    for entry in &record.data {
        bytes.extend_from_slice(&entry.magnitude().to_le_bytes());
        for &value in entry.embedding() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    let checksum = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());

    Ok(bytes)
}

fn decode(bytes: &[u8]) -> Result<CacheRecord, VectorStorageError> {
    if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(corrupt("record is truncated"));
    }

    let (payload, trailer) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    let stored_checksum = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(payload) != stored_checksum {
        return Err(corrupt("checksum mismatch"));
    }

    let mut reader = payload;

    let mut magic = [0u8; 4];
    read_exact(&mut reader, &mut magic)?;
    if &magic != MAGIC {
        return Err(corrupt("not an embedding cache"));
    }

    let mut version = [0u8; 1];
    read_exact(&mut reader, &mut version)?;
    if version[0] != FORMAT_VERSION {
        return Err(corrupt(&format!(
            "unsupported version {} (supported: {})",
            version[0], FORMAT_VERSION
        )));
    }

    let mut fingerprint = Fingerprint::default();
    read_exact(&mut reader, &mut fingerprint.model_id)?;
    read_exact(&mut reader, &mut fingerprint.dataset_digest)?;

    let dimensions = read_u32(&mut reader)? as usize;
    let entry_count = read_u64(&mut reader)? as usize;

    let expected_len = entry_count
        .checked_mul(dimensions + 1)
        .and_then(|n| n.checked_mul(4));
    if expected_len != Some(reader.len()) {
        return Err(corrupt(&format!(
            "expected {entry_count} entries of {dimensions} dimensions, found {} bytes",
            reader.len()
        )));
    }

    let mut data = Vec::with_capacity(entry_count);
    for index in 0..entry_count {
        let stored_magnitude = read_f32(&mut reader)?;
        let mut embedding = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            embedding.push(read_f32(&mut reader)?);
        }

        if !stored_magnitude.is_finite() || embedding.iter().any(|v| !v.is_finite()) {
            return Err(corrupt(&format!("entry {index} has non-finite values")));
        }

        let computed = magnitude(&embedding);
        if (computed - stored_magnitude).abs() > MAGNITUDE_TOLERANCE * computed.max(1.0) {
            return Err(corrupt(&format!(
                "entry {index} magnitude {stored_magnitude} does not match components ({computed})"
            )));
        }

        data.push(if computed == 0.0 {
            StoredEmbedding::placeholder(dimensions)
        } else {
            StoredEmbedding::new(embedding)
        });
    }

    Ok(CacheRecord { fingerprint, data })
}

fn corrupt(msg: &str) -> VectorStorageError {
    VectorStorageError::Corrupt(msg.to_string())
}

fn read_exact(reader: &mut &[u8], buf: &mut [u8]) -> Result<(), VectorStorageError> {
    reader
        .read_exact(buf)
        .map_err(|_| corrupt("unexpected end of record"))
}

fn read_u32(reader: &mut &[u8]) -> Result<u32, VectorStorageError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut &[u8]) -> Result<u64, VectorStorageError> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f32(reader: &mut &[u8]) -> Result<f32, VectorStorageError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(f32::from_le_bytes(buf))
}
