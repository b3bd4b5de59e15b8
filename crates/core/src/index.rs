//! Exact cosine-similarity index over the chunks of one document.
//!
//! An index is immutable once built. The persisted artifact is a versioned JSON
//! document that records the embedding model and dimension next to the chunk
//! texts; vectors are stored as base64 little-endian `f32` bytes so a reload
//! reproduces every score bit for bit.

use crate::error::IndexError;
use crate::models::ScoredChunk;
use crate::providers::{with_timeout, EMBEDDING_SERVICE};
use crate::store::write_atomic;
use crate::traits::Embedder;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const INDEX_FORMAT: &str = "pdf-chat-index";
pub const INDEX_VERSION: u32 = 1;
pub const DEFAULT_SEARCH_K: usize = 5;

#[derive(Debug, Clone, PartialEq)]
struct IndexEntry {
    text: String,
    vector: Vec<f32>,
    norm: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingIndex {
    model: String,
    dimensions: usize,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    format: String,
    version: u32,
    model: String,
    dimensions: usize,
    created_at: DateTime<Utc>,
    chunks: Vec<StoredChunk>,
}

#[derive(Serialize, Deserialize)]
struct StoredChunk {
    text: String,
    vector: String,
}

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

fn encode_vector(vector: &[f32]) -> String {
    let bytes: Vec<u8> = vector.iter().flat_map(|value| value.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

fn decode_vector(encoded: &str, dimensions: usize) -> Result<Vec<f32>, IndexError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|error| IndexError::UnsupportedFormat(format!("vector is not base64: {error}")))?;
    let expected_len = dimensions
        .checked_mul(4)
        .ok_or_else(|| IndexError::UnsupportedFormat(format!("dimension {dimensions} is too large")))?;
    if bytes.len() != expected_len {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            actual: bytes.len() / 4,
        });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .collect())
}

impl EmbeddingIndex {
    pub fn from_parts(
        model: impl Into<String>,
        dimensions: usize,
        chunks: Vec<String>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::CountMismatch {
                chunks: chunks.len(),
                embeddings: vectors.len(),
            });
        }

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| {
                if vector.len() != dimensions {
                    return Err(IndexError::DimensionMismatch {
                        expected: dimensions,
                        actual: vector.len(),
                    });
                }
                let norm = norm(&vector);
                Ok(IndexEntry { text, vector, norm })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            model: model.into(),
            dimensions,
            created_at: Utc::now(),
            entries,
        })
    }

    /// Embeds every chunk in `embedder.batch_size()` batches, each bounded by
    /// `timeout`. Any failing batch aborts the whole build.
    pub async fn build(
        chunks: &[String],
        embedder: &dyn Embedder,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let started = Instant::now();
        let mut vectors = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(embedder.batch_size().max(1)) {
            let embedded = with_timeout(EMBEDDING_SERVICE, timeout, embedder.embed(batch)).await?;
            if embedded.len() != batch.len() {
                return Err(IndexError::CountMismatch {
                    chunks: batch.len(),
                    embeddings: embedded.len(),
                });
            }
            debug!(batch = batch.len(), "embedded chunk batch");
            vectors.extend(embedded);
        }

        let index = Self::from_parts(
            embedder.model_id(),
            embedder.dimensions(),
            chunks.to_vec(),
            vectors,
        )?;

        info!(
            model = %index.model,
            chunk_count = index.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedding index built"
        );
        Ok(index)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.text.as_str())
    }

    /// Fails when `embedder` would produce vectors from a different space than
    /// the one this index was built with.
    pub fn ensure_compatible(&self, embedder: &dyn Embedder) -> Result<(), IndexError> {
        if embedder.model_id() != self.model {
            return Err(IndexError::ModelMismatch {
                expected: self.model.clone(),
                actual: embedder.model_id().to_string(),
            });
        }
        if embedder.dimensions() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedder.dimensions(),
            });
        }
        Ok(())
    }

    /// Top `k` chunks by cosine similarity, best first. Equal scores keep
    /// document order.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if query_vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let query_norm = norm(query_vector);
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let score = if query_norm < f32::EPSILON || entry.norm < f32::EPSILON {
                    0.0
                } else {
                    let dot: f32 = entry
                        .vector
                        .iter()
                        .zip(query_vector)
                        .map(|(left, right)| left * right)
                        .sum();
                    dot / (entry.norm * query_norm)
                };
                ScoredChunk {
                    position,
                    text: entry.text.clone(),
                    score,
                }
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.position.cmp(&right.position))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let file = IndexFile {
            format: INDEX_FORMAT.to_string(),
            version: INDEX_VERSION,
            model: self.model.clone(),
            dimensions: self.dimensions,
            created_at: self.created_at,
            chunks: self
                .entries
                .iter()
                .map(|entry| StoredChunk {
                    text: entry.text.clone(),
                    vector: encode_vector(&entry.vector),
                })
                .collect(),
        };
        Ok(serde_json::to_vec(&file)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        let file: IndexFile = serde_json::from_slice(bytes)?;
        if file.format != INDEX_FORMAT {
            return Err(IndexError::UnsupportedFormat(format!(
                "expected format {INDEX_FORMAT}, found {}",
                file.format
            )));
        }
        if file.version != INDEX_VERSION {
            return Err(IndexError::UnsupportedFormat(format!(
                "expected version {INDEX_VERSION}, found {}",
                file.version
            )));
        }

        let mut chunks = Vec::with_capacity(file.chunks.len());
        let mut vectors = Vec::with_capacity(file.chunks.len());
        for stored in file.chunks {
            vectors.push(decode_vector(&stored.vector, file.dimensions)?);
            chunks.push(stored.text);
        }

        let mut index = Self::from_parts(file.model, file.dimensions, chunks, vectors)?;
        index.created_at = file.created_at;
        Ok(index)
    }

    pub async fn persist(&self, path: &Path) -> Result<(), IndexError> {
        let bytes = self.to_bytes()?;
        write_atomic(path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "index persisted");
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_bytes(&bytes)
    }
}
