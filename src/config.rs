//! Service configuration.
//!
//! Values come from an optional TOML file (`rag.toml`, or the path in
//! `RAG_CONFIG`) overlaid with `RAG_`-prefixed environment variables, using
//! `__` between section and key: `RAG_CHUNKING__CHUNK_SIZE=500`.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{RagError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "rag.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrieverConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data/raw"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub snapshot_path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("data/vector_index/index.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Passed to every index search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub k: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self { k: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Hash,
    Remote,
    #[serde(rename = "fastembed")]
    FastEmbed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub dimensions: usize,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub model_dir: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hash,
            dimensions: 768,
            base_url: "http://localhost:4000".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            model_dir: PathBuf::from("/app/models/bge-small-en-v1.5"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationBackend {
    Static,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub backend: GenerationBackend,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Canned answers for the static backend; empty means the built-in set.
    pub responses: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: GenerationBackend::Static,
            base_url: "http://localhost:4000".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            responses: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from `RAG_CONFIG` (or `rag.toml`) and the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var("RAG_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("RAG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RagError::Config(e.to_string()))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| RagError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.k == 0 {
            return Err(RagError::Config("retrieval k must be greater than zero".to_string()));
        }
        if self.embedding.dimensions == 0 {
            return Err(RagError::Config(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.k, 3);
        assert_eq!(config.embedding.backend, EmbeddingBackend::Hash);
        assert_eq!(config.generation.backend, GenerationBackend::Static);
    }

    #[test]
    fn test_rejects_overlap_larger_than_size() {
        let mut config = AppConfig::default();
        config.chunking.chunk_overlap = 1000;
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_k() {
        let mut config = AppConfig::default();
        config.retrieval.k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[chunking]
chunk_size = 500
chunk_overlap = 50

[retrieval]
k = 5

[embedding]
backend = "remote"
dimensions = 384
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.embedding.backend, EmbeddingBackend::Remote);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.storage.base_dir, PathBuf::from("data/raw"));
    }
}
