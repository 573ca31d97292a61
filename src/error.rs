//! Error types shared by the ingestion and query paths.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Document bytes are not valid UTF-8. Ingestion skips the document.
    #[error("could not decode '{source_id}' as UTF-8: {source}")]
    Decode {
        source_id: String,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("document not found: {0}")]
    NotFound(String),

    /// Snapshot could not be read back. Only ever logged; `VectorIndex::load`
    /// falls back to an empty index.
    #[error("failed to load index snapshot {}: {message}", path.display())]
    IndexLoad { path: PathBuf, message: String },

    #[error("failed to persist index snapshot {}: {source}", path.display())]
    IndexPersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{gateway} gateway error: {message}")]
    Gateway { gateway: String, message: String },

    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("storage error on '{name}': {source}")]
    Storage {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid document name: {0}")]
    InvalidName(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("ingestion already in progress")]
    IngestionInProgress,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn gateway(gateway: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Gateway {
            gateway: gateway.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
