use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{RagError, Result};

/// Maps text to a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Defaults to calling [`embed`](EmbeddingGateway::embed) once per text.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize;
}

/// Build the embedding gateway selected in the configuration.
pub fn from_config(config: &EmbeddingConfig) -> Result<std::sync::Arc<dyn EmbeddingGateway>> {
    match config.backend {
        EmbeddingBackend::Hash => Ok(std::sync::Arc::new(HashEmbedder::new(config.dimensions)?)),
        EmbeddingBackend::Remote => Ok(std::sync::Arc::new(RemoteEmbedder::new(
            &config.base_url,
            &config.model,
            config.dimensions,
            config.api_key.clone(),
        ))),
        #[cfg(feature = "fastembed")]
        EmbeddingBackend::FastEmbed => Ok(std::sync::Arc::new(local::FastEmbedder::new(
            &config.model_dir,
        )?)),
        #[cfg(not(feature = "fastembed"))]
        EmbeddingBackend::FastEmbed => Err(RagError::Config(
            "the fastembed backend requires building with `--features fastembed`".to_string(),
        )),
    }
}

/// Deterministic local embedder: hashed bag of words, L2-normalised.
///
/// Texts that share words land close together under cosine similarity, which
/// is enough for local runs and tests without a model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::Config(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimensions })
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingGateway for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint (LiteLLM, OpenAI, ...).
pub struct RemoteEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl RemoteEmbedder {
    pub fn new(base_url: &str, model: &str, dimensions: usize, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
            api_key,
        }
    }
}

#[async_trait]
impl EmbeddingGateway for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::gateway("embedding", "empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts.to_vec(),
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| RagError::gateway("embedding", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(%status, "embedding request failed");
            return Err(RagError::gateway(
                "embedding",
                format!("request failed: {status} - {error_text}"),
            ));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::gateway("embedding", e))?;

        if parsed.data.len() != texts.len() {
            return Err(RagError::gateway(
                "embedding",
                format!("expected {} vectors, got {}", texts.len(), parsed.data.len()),
            ));
        }
        parsed.data.sort_by_key(|d| d.index.unwrap_or(0));

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }
        tracing::debug!(count = vectors.len(), "remote embeddings received");
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(feature = "fastembed")]
mod local {
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};

    use super::EmbeddingGateway;
    use crate::error::{RagError, Result};

    /// Local ONNX model loaded from a directory of exported model files.
    pub struct FastEmbedder {
        model: Arc<TextEmbedding>,
        dimensions: usize,
    }

    fn read_model_file(dir: &Path, name: &str) -> Result<Vec<u8>> {
        std::fs::read(dir.join(name))
            .map_err(|e| RagError::Config(format!("failed to read {name}: {e}")))
    }

    impl FastEmbedder {
        pub fn new(model_dir: &Path) -> Result<Self> {
            tracing::info!(dir = %model_dir.display(), "initializing embedding model from local files");

            if !model_dir.exists() {
                return Err(RagError::Config(format!(
                    "model directory not found: {}",
                    model_dir.display()
                )));
            }

            let user_model = UserDefinedEmbeddingModel {
                onnx_file: read_model_file(model_dir, "model.onnx")?,
                tokenizer_files: TokenizerFiles {
                    tokenizer_file: read_model_file(model_dir, "tokenizer.json")?,
                    config_file: read_model_file(model_dir, "config.json")?,
                    special_tokens_map_file: read_model_file(model_dir, "special_tokens_map.json")?,
                    tokenizer_config_file: read_model_file(model_dir, "tokenizer_config.json")?,
                },
            };

            let model = TextEmbedding::try_new_from_user_defined(
                user_model,
                InitOptionsUserDefined::default(),
            )
            .map_err(|e| RagError::gateway("embedding", format!("failed to initialize model: {e}")))?;

            // Probe once to learn the model's output dimension.
            let probe = model
                .embed(vec!["dimension probe"], None)
                .map_err(|e| RagError::gateway("embedding", e))?;
            let dimensions = probe.first().map(Vec::len).unwrap_or(0);

            tracing::info!(dimensions, "embedding model initialized");
            Ok(Self {
                model: Arc::new(model),
                dimensions,
            })
        }
    }

    #[async_trait]
    impl EmbeddingGateway for FastEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut vectors = self.embed_batch(&[text]).await?;
            vectors
                .pop()
                .ok_or_else(|| RagError::gateway("embedding", "model returned no vector"))
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            let model = Arc::clone(&self.model);
            let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();

            // ONNX inference is CPU bound; keep it off the async workers.
            tokio::task::spawn_blocking(move || model.embed(texts, None))
                .await
                .map_err(|e| RagError::gateway("embedding", e))?
                .map_err(|e| RagError::gateway("embedding", e))
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }
}

#[cfg(feature = "fastembed")]
pub use local::FastEmbedder;

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_hash_embedder_dimension_and_norm() {
        let embedder = HashEmbedder::new(64).unwrap();
        let vector = embedder.embed("hello world").await.unwrap();
        assert_eq!(vector.len(), 64);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_case_insensitive() {
        let embedder = HashEmbedder::new(128).unwrap();
        let a = embedder.embed("Rust Ownership").await.unwrap();
        let b = embedder.embed("rust ownership").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let embedder = HashEmbedder::new(256).unwrap();
        let doc = embedder.embed("the borrow checker enforces ownership").await.unwrap();
        let near = embedder.embed("ownership and the borrow checker").await.unwrap();
        let far = embedder.embed("pasta recipes with tomatoes").await.unwrap();
        assert!(cosine(&doc, &near) > cosine(&doc, &far));
    }

    #[tokio::test]
    async fn test_blank_text_is_zero_vector() {
        let embedder = HashEmbedder::new(16).unwrap();
        let vector = embedder.embed("   ").await.unwrap();
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_default_batch_matches_single() {
        let embedder = HashEmbedder::new(32).unwrap();
        let batch = embedder.embed_batch(&["one", "two"]).await.unwrap();
        assert_eq!(batch[1], embedder.embed("two").await.unwrap());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(HashEmbedder::new(0).is_err());
    }

    #[cfg(feature = "fastembed")]
    #[test]
    fn test_fastembed_missing_model_dir_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FastEmbedder::new(&dir.path().join("absent")),
            Err(RagError::Config(_))
        ));
    }

    #[cfg(feature = "fastembed")]
    #[tokio::test(flavor = "current_thread")]
    #[ignore = "needs an exported ONNX model in RAG_TEST_MODEL_DIR"]
    async fn test_fastembed_batch_leaves_runtime_responsive() {
        let dir = std::env::var("RAG_TEST_MODEL_DIR").expect("RAG_TEST_MODEL_DIR");
        let embedder = FastEmbedder::new(std::path::Path::new(&dir)).unwrap();
        let texts: Vec<String> = (0..64).map(|i| format!("sentence number {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let ticker = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        });
        let vectors = embedder.embed_batch(&refs).await.unwrap();

        assert!(ticker.is_finished());
        assert_eq!(vectors.len(), 64);
        assert!(vectors.iter().all(|v| v.len() == embedder.dimensions()));
    }
}
