use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::embeddings::EmbeddingGateway;
use super::vector_store::VectorIndex;
use crate::error::{RagError, Result};
use crate::indexer::chunker::{Chunker, Document};
use crate::indexer::storage::StorageGateway;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStatus {
    pub is_indexing: bool,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub total_files: usize,
    pub total_chunks: usize,
    pub skipped_files: Vec<String>,
    pub failed_files: Vec<String>,
    pub indexed_entries: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedFile {
    pub source_id: String,
    pub chunk_count: usize,
    /// First 8 bytes of the SHA-256 of the raw document, hex encoded.
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIssue {
    pub source_id: String,
    pub reason: String,
}

/// Summary of one full-corpus run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub files_seen: usize,
    pub total_chunks: usize,
    /// Every decoded document, blank ones included with `chunk_count == 0`.
    pub ingested: Vec<IngestedFile>,
    /// Documents that could not be decoded as text.
    pub skipped: Vec<FileIssue>,
    /// Documents that hit any other error (missing, gateway, persistence).
    pub failed: Vec<FileIssue>,
}

/// What happened to a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Decoded and handed to the index. A blank document lands here with no ids.
    Indexed { chunk_ids: Vec<String>, digest: String },
    /// Not valid UTF-8; nothing was indexed.
    Skipped(String),
}

impl IngestReport {
    /// Fold one document's result into the report. `ingest_all` and the
    /// batch CLI both classify documents through here.
    pub fn record(&mut self, source_id: String, outcome: Result<FileOutcome>) {
        self.files_seen += 1;
        match outcome {
            Ok(FileOutcome::Indexed { chunk_ids, digest }) => {
                self.total_chunks += chunk_ids.len();
                self.ingested.push(IngestedFile {
                    source_id,
                    chunk_count: chunk_ids.len(),
                    digest,
                });
            }
            Ok(FileOutcome::Skipped(reason)) => {
                self.skipped.push(FileIssue { source_id, reason });
            }
            Err(e) => {
                tracing::warn!(source_id = %source_id, error = %e, "failed to ingest document");
                self.failed.push(FileIssue {
                    source_id,
                    reason: e.to_string(),
                });
            }
        }
    }
}

fn document_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}

/// Drives storage -> chunker -> embeddings -> index.
pub struct IngestionPipeline {
    status: Mutex<IndexStatus>,
    storage: Arc<dyn StorageGateway>,
    chunker: Chunker,
    embeddings: Arc<dyn EmbeddingGateway>,
    index: Arc<VectorIndex>,
}

impl IngestionPipeline {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        chunker: Chunker,
        embeddings: Arc<dyn EmbeddingGateway>,
        index: Arc<VectorIndex>,
    ) -> Self {
        Self {
            status: Mutex::new(IndexStatus::default()),
            storage,
            chunker,
            embeddings,
            index,
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub async fn get_status(&self) -> IndexStatus {
        let mut status = self.status.lock().await.clone();
        status.indexed_entries = self.index.len().await;
        status
    }

    pub async fn is_indexing(&self) -> bool {
        self.status.lock().await.is_indexing
    }

    pub async fn list_documents(&self) -> Result<Vec<String>> {
        self.storage.list().await
    }

    pub async fn save_document(&self, name: &str, content: &[u8]) -> Result<String> {
        let location = self.storage.write(name, content).await?;
        tracing::info!(source_id = name, bytes = content.len(), "stored document");
        Ok(location)
    }

    /// Ingest one document and return the ids of the chunks added to the index.
    ///
    /// A document that is not valid UTF-8, or has no text, yields no ids.
    /// Re-ingesting a document appends a second copy of its chunks.
    pub async fn ingest_file(&self, source_id: &str) -> Result<Vec<String>> {
        match self.ingest_document(source_id).await? {
            FileOutcome::Indexed { chunk_ids, .. } => Ok(chunk_ids),
            FileOutcome::Skipped(_) => Ok(Vec::new()),
        }
    }

    /// Ingest one document and say how it was classified.
    pub async fn ingest_document(&self, source_id: &str) -> Result<FileOutcome> {
        tracing::info!(source_id, "starting ingestion");

        let raw_bytes = self.storage.read(source_id).await?;
        let digest = document_digest(&raw_bytes);
        let document = Document::new(source_id, raw_bytes);

        let chunks = match self.chunker.split(&document) {
            Ok(chunks) => chunks,
            Err(e @ RagError::Decode { .. }) => {
                tracing::warn!(source_id, error = %e, "skipping undecodable document");
                return Ok(FileOutcome::Skipped(e.to_string()));
            }
            Err(e) => return Err(e),
        };
        tracing::info!(source_id, chunk_count = chunks.len(), "split document");

        let ordinals = self.index.insert(chunks, self.embeddings.as_ref()).await?;
        tracing::info!(source_id, chunk_count = ordinals.len(), "ingested document");

        Ok(FileOutcome::Indexed {
            chunk_ids: ordinals.iter().map(usize::to_string).collect(),
            digest,
        })
    }

    /// Ingest every document in storage. One document failing never stops
    /// the run; only a failure to list the corpus does.
    pub async fn ingest_all(&self) -> Result<IngestReport> {
        {
            let mut status = self.status.lock().await;
            if status.is_indexing {
                return Err(RagError::IngestionInProgress);
            }
            status.is_indexing = true;
            status.last_error = None;
            status.skipped_files.clear();
            status.failed_files.clear();
        }

        // catch_unwind so is_indexing always resets
        let result = std::panic::AssertUnwindSafe(self.do_ingest_all())
            .catch_unwind()
            .await;

        let mut status = self.status.lock().await;
        status.is_indexing = false;
        match result {
            Ok(Ok(report)) => {
                status.last_indexed_at = Some(Utc::now());
                status.total_files = report.ingested.len();
                status.total_chunks = report.total_chunks;
                status.skipped_files = report.skipped.iter().map(|f| f.source_id.clone()).collect();
                status.failed_files = report.failed.iter().map(|f| f.source_id.clone()).collect();
                Ok(report)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "ingestion run failed");
                status.last_error = Some(e.to_string());
                Err(e)
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("ingestion panicked: {s}")
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("ingestion panicked: {s}")
                } else {
                    "ingestion panicked with unknown error".to_string()
                };
                tracing::error!("{}", panic_msg);
                status.last_error = Some(panic_msg.clone());
                Err(RagError::Internal(panic_msg))
            }
        }
    }

    async fn do_ingest_all(&self) -> Result<IngestReport> {
        let files = self.storage.list().await?;
        tracing::info!(count = files.len(), "found files to ingest");

        let mut report = IngestReport::default();
        for source_id in files {
            let outcome = self.ingest_document(&source_id).await;
            report.record(source_id, outcome);
        }

        tracing::info!(
            ingested = report.ingested.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            chunks = report.total_chunks,
            "ingestion complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_digest_is_short_hex() {
        let digest = document_digest(b"hello");
        assert_eq!(digest.len(), 16);
        assert_eq!(digest, document_digest(b"hello"));
        assert_ne!(digest, document_digest(b"world"));
    }
}
