use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{GenerationBackend, GenerationConfig};
use crate::error::{RagError, Result};
use crate::models::{CompletionMessage, CompletionRequest, CompletionResponse};

/// Maps a prompt to a completion.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub fn from_config(config: &GenerationConfig) -> Arc<dyn GenerationGateway> {
    match config.backend {
        GenerationBackend::Static if config.responses.is_empty() => Arc::new(StaticResponder::default()),
        GenerationBackend::Static => Arc::new(StaticResponder::new(config.responses.clone())),
        GenerationBackend::Remote => Arc::new(LiteLlmProxy::new(
            config.base_url.clone(),
            config.model.clone(),
            config.api_key.clone(),
        )),
    }
}

/// Replays a fixed list of answers in order, wrapping around.
#[derive(Debug)]
pub struct StaticResponder {
    responses: Vec<String>,
    next: AtomicUsize,
}

impl StaticResponder {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            next: AtomicUsize::new(0),
        }
    }
}

impl Default for StaticResponder {
    fn default() -> Self {
        Self::new(vec![
            "This is a simulated response based on the retrieved context.".to_string(),
            "I found some relevant information in the documents.".to_string(),
            "According to the context, the answer is... (simulated)".to_string(),
        ])
    }
}

#[async_trait]
impl GenerationGateway for StaticResponder {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        if self.responses.is_empty() {
            return Err(RagError::gateway("generation", "no canned responses configured"));
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        Ok(self.responses[i].clone())
    }
}

/// OpenAI-compatible chat completion client (LiteLLM proxy or upstream API).
pub struct LiteLlmProxy {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LiteLlmProxy {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }

    pub async fn chat_completion(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self.client.post(&url).json(request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| RagError::gateway("generation", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RagError::gateway(
                "generation",
                format!("LiteLLM request failed: {status} - {error_text}"),
            ));
        }

        response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| RagError::gateway("generation", e))
    }
}

#[async_trait]
impl GenerationGateway for LiteLlmProxy {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![CompletionMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: None,
            max_tokens: None,
            stream: Some(false),
        };

        let response = self.chat_completion(&request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| RagError::gateway("generation", "completion returned no choices"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_responder_cycles() {
        let responder = StaticResponder::new(vec!["a".to_string(), "b".to_string()]);
        let answers: Vec<String> = (0..3)
            .map(|_| tokio_test::block_on(responder.generate("prompt")).unwrap())
            .collect();
        assert_eq!(answers, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_empty_static_responder_is_gateway_error() {
        let responder = StaticResponder::new(Vec::new());
        assert!(matches!(
            tokio_test::block_on(responder.generate("prompt")),
            Err(RagError::Gateway { .. })
        ));
    }

    #[test]
    fn test_from_config_uses_configured_responses() {
        let config = GenerationConfig {
            responses: vec!["I am a test bot.".to_string()],
            ..GenerationConfig::default()
        };
        let gateway = from_config(&config);
        assert_eq!(
            tokio_test::block_on(gateway.generate("Hello")).unwrap(),
            "I am a test bot."
        );
    }
}
