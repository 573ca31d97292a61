use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use rag_service::config::AppConfig;
use rag_service::indexer::{Chunker, LocalStorage};
use rag_service::proxy;
use rag_service::rag::embeddings;
use rag_service::rag::index_manager::IngestionPipeline;
use rag_service::rag::vector_store::VectorIndex;
use rag_service::rag::RagEngine;
use rag_service::routes::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // 環境変数読み込み
    dotenv::dotenv().ok();

    // ロギング初期化
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;
    tracing::info!(dir = %config.storage.base_dir.display(), "document storage");
    tracing::info!(path = %config.index.snapshot_path.display(), "index snapshot");
    tracing::info!(
        embedding = ?config.embedding.backend,
        generation = ?config.generation.backend,
        "gateway backends"
    );

    // コンポーネント初期化
    let storage = Arc::new(LocalStorage::new(&config.storage.base_dir)?);
    let embedder = embeddings::from_config(&config.embedding)?;
    let generator = proxy::from_config(&config.generation);
    let chunker = Chunker::from_config(&config.chunking)?;

    let index = Arc::new(VectorIndex::load(&config.index.snapshot_path, embedder.dimensions()).await);
    tracing::info!(entries = index.len().await, "vector index ready");

    let pipeline = Arc::new(IngestionPipeline::new(
        storage,
        chunker,
        embedder.clone(),
        index.clone(),
    ));
    let engine = RagEngine::new(index, embedder, generator, config.retrieval);

    let state = Arc::new(AppState { pipeline, engine });

    // ルーター設定
    let app = routes::router(
        state,
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("RAG service listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
