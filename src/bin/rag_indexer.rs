use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use rag_service::config::AppConfig;
use rag_service::indexer::{Chunker, LocalStorage, StorageGateway};
use rag_service::rag::embeddings;
use rag_service::rag::index_manager::{IngestReport, IngestionPipeline};
use rag_service::rag::vector_store::VectorIndex;

#[derive(Parser, Debug)]
#[command(name = "rag-indexer")]
#[command(about = "Ingest every document in the storage directory into the vector index")]
struct Args {
    /// Config file (TOML); defaults and RAG_* env vars apply when absent
    #[arg(long, env = "RAG_CONFIG", default_value = "rag.toml")]
    config: String,

    /// Directory holding the raw documents
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Snapshot file of the vector index
    #[arg(long)]
    index_path: Option<PathBuf>,

    /// Maximum chunk size in characters
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Overlap between chunks in characters
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Embedding dimension for the hash embedder
    #[arg(long)]
    dimensions: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load_from(&args.config)?;
    if let Some(dir) = args.storage_dir {
        config.storage.base_dir = dir;
    }
    if let Some(path) = args.index_path {
        config.index.snapshot_path = path;
    }
    if let Some(size) = args.chunk_size {
        config.chunking.chunk_size = size;
    }
    if let Some(overlap) = args.chunk_overlap {
        config.chunking.chunk_overlap = overlap;
    }
    if let Some(dimensions) = args.dimensions {
        config.embedding.dimensions = dimensions;
    }
    config.validate()?;

    if !config.storage.base_dir.exists() {
        anyhow::bail!("Directory does not exist: {}", config.storage.base_dir.display());
    }

    println!("Initializing embedding backend ({:?})...", config.embedding.backend);
    let embedder = embeddings::from_config(&config.embedding)?;

    println!("Loading index from {}...", config.index.snapshot_path.display());
    let index = Arc::new(VectorIndex::load(&config.index.snapshot_path, embedder.dimensions()).await);
    let entries_before = index.len().await;

    let storage = Arc::new(LocalStorage::new(&config.storage.base_dir)?);
    let files = storage.list().await?;
    println!("Found {} files in {}", files.len(), config.storage.base_dir.display());

    if files.is_empty() {
        println!("No files found. Exiting.");
        return Ok(());
    }

    let pipeline = IngestionPipeline::new(
        storage,
        Chunker::from_config(&config.chunking)?,
        embedder,
        index.clone(),
    );

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut report = IngestReport::default();

    for name in &files {
        pb.set_message(name.clone());
        let outcome = pipeline.ingest_document(name).await;
        report.record(name.clone(), outcome);
        pb.inc(1);
    }

    pb.finish_with_message("done");

    println!("\nIngestion complete!");
    println!("  Files ingested:  {}/{}", report.ingested.len(), report.files_seen);
    println!("  Files skipped:   {}", report.skipped.len());
    println!("  Files failed:    {}", report.failed.len());
    println!("  Chunks added:    {}", report.total_chunks);
    println!("  Index entries:   {} -> {}", entries_before, index.len().await);
    println!("  Snapshot:        {}", index.path().display());

    let blank: Vec<&str> = report
        .ingested
        .iter()
        .filter(|f| f.chunk_count == 0)
        .map(|f| f.source_id.as_str())
        .collect();
    if !blank.is_empty() {
        println!("\nIngested without text (no chunks):");
        for name in blank {
            println!("  {}", name);
        }
    }

    if !report.skipped.is_empty() {
        println!("\nSkipped files (not valid UTF-8):");
        for issue in &report.skipped {
            println!("  {}", issue.source_id);
        }
    }

    if !report.failed.is_empty() {
        println!("\nFailed files:");
        for issue in &report.failed {
            println!("  {}: {}", issue.source_id, issue.reason);
        }
    }

    Ok(())
}
