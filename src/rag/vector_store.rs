//! Persistent nearest-neighbour index over chunk embeddings.
//!
//! The whole index lives in memory and is mirrored to a single JSON snapshot.
//! Writers are serialised by one writer lock held across embed, append and
//! persist; readers only ever take the state read lock, so a search sees the
//! last fully appended batch and never half of one.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::embeddings::EmbeddingGateway;
use crate::config::RetrieverConfig;
use crate::error::{RagError, Result};
use crate::indexer::chunker::Chunk;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

/// A retrieved chunk and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexState {
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format_version: u32,
    dimension: Option<usize>,
    entries: &'a [IndexEntry],
}

#[derive(Deserialize)]
struct Snapshot {
    format_version: u32,
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

pub struct VectorIndex {
    path: PathBuf,
    state: RwLock<IndexState>,
    writer: Mutex<()>,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a * norm_b);
    // overflowed components give inf/inf; treat them as unrelated
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

impl VectorIndex {
    /// A fresh, empty index that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self::with_state(path.into(), IndexState::default())
    }

    fn with_state(path: PathBuf, state: IndexState) -> Self {
        Self {
            path,
            state: RwLock::new(state),
            writer: Mutex::new(()),
        }
    }

    /// Load the snapshot at `path`. Any failure leaves an empty index behind;
    /// the next successful persist overwrites whatever was on disk.
    pub async fn load(path: impl Into<PathBuf>, expected_dimension: usize) -> Self {
        let path = path.into();
        match Self::read_snapshot(&path, expected_dimension).await {
            Ok(Some(state)) => {
                tracing::info!(
                    path = %path.display(),
                    entries = state.entries.len(),
                    "loaded index snapshot"
                );
                Self::with_state(path, state)
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "no index snapshot, starting empty");
                Self::empty(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable index snapshot, starting empty");
                Self::empty(path)
            }
        }
    }

    /// `Ok(None)` when no snapshot exists yet.
    async fn read_snapshot(path: &Path, expected_dimension: usize) -> Result<Option<IndexState>> {
        let load_error = |message: String| RagError::IndexLoad {
            path: path.to_path_buf(),
            message,
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(load_error(e.to_string())),
        };

        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| load_error(e.to_string()))?;

        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(load_error(format!(
                "unsupported snapshot format version {}",
                snapshot.format_version
            )));
        }

        let dimension = match snapshot.dimension {
            Some(dimension) => dimension,
            None if snapshot.entries.is_empty() => return Ok(Some(IndexState::default())),
            None => return Err(load_error("entries present without a dimension".to_string())),
        };
        if dimension != expected_dimension {
            return Err(load_error(format!(
                "snapshot dimension {dimension} does not match embedding dimension {expected_dimension}"
            )));
        }
        if let Some(pos) = snapshot
            .entries
            .iter()
            .position(|entry| entry.vector.len() != dimension)
        {
            return Err(load_error(format!(
                "entry {pos} has {} components, expected {dimension}",
                snapshot.entries[pos].vector.len()
            )));
        }

        Ok(Some(IndexState {
            dimension: Some(dimension),
            entries: snapshot.entries,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Fixed once the first batch is inserted (or a snapshot is loaded).
    pub async fn dimension(&self) -> Option<usize> {
        self.state.read().await.dimension
    }

    /// Distinct source ids currently indexed.
    pub async fn sources(&self) -> BTreeSet<String> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|entry| entry.chunk.metadata.source_id.clone())
            .collect()
    }

    /// Embed `chunks`, append them and persist the snapshot.
    ///
    /// Returns the index-wide ordinals of the new entries. An empty batch is a
    /// no-op and does not touch the snapshot. If persisting fails the entries
    /// stay in memory and the error is returned.
    pub async fn insert(
        &self,
        chunks: Vec<Chunk>,
        gateway: &dyn EmbeddingGateway,
    ) -> Result<Vec<usize>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let _writer = self.writer.lock().await;

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = gateway.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::gateway(
                "embedding",
                format!("expected {} vectors, got {}", chunks.len(), vectors.len()),
            ));
        }

        let ordinals = {
            let mut state = self.state.write().await;
            let expected = state.dimension.unwrap_or(vectors[0].len());
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }

            state.dimension = Some(expected);
            let first = state.entries.len();
            state.entries.extend(
                vectors
                    .into_iter()
                    .zip(chunks)
                    .map(|(vector, chunk)| IndexEntry { vector, chunk }),
            );
            (first..state.entries.len()).collect::<Vec<_>>()
        };

        tracing::debug!(count = ordinals.len(), "appended entries to index");
        self.write_snapshot().await?;
        Ok(ordinals)
    }

    /// The `config.k` nearest entries to `query`, nearest first.
    pub async fn search(
        &self,
        query: &str,
        config: &RetrieverConfig,
        gateway: &dyn EmbeddingGateway,
    ) -> Result<Vec<SearchHit>> {
        if config.k == 0 || self.is_empty().await {
            return Ok(Vec::new());
        }

        let query_vector = gateway.embed(query).await?;

        let state = self.state.read().await;
        if let Some(dimension) = state.dimension {
            if query_vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: query_vector.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(&entry.vector, &query_vector)))
            .collect();

        // stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(config.k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                chunk: state.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Write the current state to the snapshot path.
    pub async fn persist(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.write_snapshot().await
    }

    /// Caller must hold the writer lock.
    async fn write_snapshot(&self) -> Result<()> {
        let persist_error = |source: std::io::Error| RagError::IndexPersist {
            path: self.path.clone(),
            source,
        };

        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec(&SnapshotRef {
                format_version: SNAPSHOT_FORMAT_VERSION,
                dimension: state.dimension,
                entries: &state.entries,
            })
            .map_err(|e| persist_error(std::io::Error::other(e)))?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(persist_error)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await.map_err(persist_error)?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(persist_error(e));
        }

        tracing::info!(path = %self.path.display(), bytes = bytes.len(), "persisted index snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_of_overflowed_vector_is_zero() {
        assert_eq!(cosine_similarity(&[f32::INFINITY, 1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[f32::MAX, f32::MAX], &[1.0, 1.0]), 0.0);
    }
}
