#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rag_service::indexer::{Chunk, ChunkMetadata, Chunker, LocalStorage};
use rag_service::proxy::GenerationGateway;
use rag_service::rag::embeddings::{EmbeddingGateway, HashEmbedder};
use rag_service::rag::index_manager::IngestionPipeline;
use rag_service::rag::vector_store::VectorIndex;
use rag_service::{RagError, Result};
use tempfile::TempDir;

pub const DIM: usize = 256;

pub fn chunk(source_id: &str, chunk_index: usize, text: &str) -> Chunk {
    Chunk {
        text: text.to_string(),
        metadata: ChunkMetadata {
            source_id: source_id.to_string(),
            chunk_index,
            start_offset: 0,
        },
    }
}

pub fn embedder() -> HashEmbedder {
    HashEmbedder::new(DIM).unwrap()
}

/// Embedding gateway that always fails.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingGateway for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::gateway("embedding", "backend unavailable"))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Embedding gateway that waits for permits before answering.
pub struct GatedEmbedder {
    pub inner: HashEmbedder,
    pub gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait]
impl EmbeddingGateway for GatedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| RagError::gateway("embedding", e))?;
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Generation gateway that records every prompt and answers with a fixed text.
pub struct RecordingGenerator {
    pub answer: String,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerationGateway for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

pub struct FailingGenerator;

#[async_trait]
impl GenerationGateway for FailingGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(RagError::gateway("generation", "model offline"))
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub storage: Arc<LocalStorage>,
    pub index: Arc<VectorIndex>,
    pub pipeline: Arc<IngestionPipeline>,
}

impl Fixture {
    pub fn snapshot_path(&self) -> std::path::PathBuf {
        self.dir.path().join("vector_index").join("index.json")
    }
}

pub fn fixture_with(embeddings: Arc<dyn EmbeddingGateway>, chunker: Chunker) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStorage::new(dir.path().join("raw")).unwrap());
    let index = Arc::new(VectorIndex::empty(
        dir.path().join("vector_index").join("index.json"),
    ));
    let pipeline = Arc::new(IngestionPipeline::new(
        storage.clone(),
        chunker,
        embeddings,
        index.clone(),
    ));
    Fixture {
        dir,
        storage,
        index,
        pipeline,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(Arc::new(embedder()), Chunker::new(1000, 200).unwrap())
}
