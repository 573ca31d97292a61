pub mod embeddings;
pub mod index_manager;
pub mod vector_store;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::RetrieverConfig;
use crate::error::Result;
use crate::proxy::GenerationGateway;
use self::embeddings::EmbeddingGateway;
use self::vector_store::{SearchHit, VectorIndex};

/// Generated answer plus the documents its context came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub sources: BTreeSet<String>,
}

/// The single fixed prompt: answer strictly from the retrieved context.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the question based only on the following context:\n{context}\n\nQuestion: {question}\n"
    )
}

/// Texts of the hits, nearest first, separated by a blank line.
pub fn format_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Retrieval-augmented query orchestrator.
#[derive(Clone)]
pub struct RagEngine {
    index: Arc<VectorIndex>,
    embeddings: Arc<dyn EmbeddingGateway>,
    generator: Arc<dyn GenerationGateway>,
    retriever: RetrieverConfig,
}

impl RagEngine {
    pub fn new(
        index: Arc<VectorIndex>,
        embeddings: Arc<dyn EmbeddingGateway>,
        generator: Arc<dyn GenerationGateway>,
        retriever: RetrieverConfig,
    ) -> Self {
        Self {
            index,
            embeddings,
            generator,
            retriever,
        }
    }

    pub fn retriever(&self) -> RetrieverConfig {
        self.retriever
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.index
            .search(query, &self.retriever, self.embeddings.as_ref())
            .await
    }

    /// Retrieve once, then build both the prompt context and the source list
    /// from that single result set.
    pub async fn answer(&self, query: &str) -> Result<Answer> {
        let hits = self.retrieve(query).await?;
        tracing::debug!(hits = hits.len(), "retrieved context");

        let context = format_context(&hits);
        let prompt = build_prompt(&context, query);
        let text = self.generator.generate(&prompt).await?;

        let sources = hits
            .into_iter()
            .map(|hit| hit.chunk.metadata.source_id)
            .collect();

        Ok(Answer { text, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_context_and_question() {
        let prompt = build_prompt("alpha\n\nbeta", "What is X?");
        assert_eq!(
            prompt,
            "Answer the question based only on the following context:\nalpha\n\nbeta\n\nQuestion: What is X?\n"
        );
    }

    #[test]
    fn test_empty_context_keeps_template_shape() {
        let prompt = build_prompt("", "What is X?");
        assert!(prompt.starts_with("Answer the question based only on the following context:\n\n"));
        assert!(prompt.ends_with("Question: What is X?\n"));
    }
}
