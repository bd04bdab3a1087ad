//! C6/C14: provider capability interfaces (§9 redesign: "the
//! `EmbeddingProvider` and `LLMProvider` families should be modeled as
//! interfaces with a small factory keyed by an enum. No reflection.").
//!
//! Concrete record types (`EmbeddingOutput`, `GenerationOutput`) replace the
//! source's duck-typed result objects per §9: the indexer depends on fields
//! beyond the vectors themselves (`model`, `token_total`).

pub mod embedding_candle;
pub mod embedding_http;
pub mod fakes;
pub mod llm_http;
pub mod retry;

use async_trait::async_trait;

use crate::errors::CoreResult;

/// Task type distinction for query vs document embeddings (§9 open
/// question): providers that support it use `Query` for the question text
/// and `Document` for chunk text; providers that don't distinguish may
/// treat both identically, defaulting to `Document` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTaskType {
    Document,
    Query,
}

pub struct EmbeddingOutput {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
    pub token_total: usize,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds `texts`, truncating (not rejecting) any input longer than
    /// `max_input_tokens()`, right-side and token-aligned. Returns vectors
    /// in input order. Retries transient failures internally; callers see
    /// only the exhausted-retry failure.
    async fn embed(&self, texts: &[String], task: EmbedTaskType) -> CoreResult<EmbeddingOutput>;

    fn dimension(&self) -> usize;
    fn model_name(&self) -> &str;
    fn max_input_tokens(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: usize,
    pub system_prompt: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        GenerationParams {
            temperature: 0.1,
            max_output_tokens: 1024,
            system_prompt: None,
        }
    }
}

pub struct GenerationOutput {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generates text from `prompt`. Retries transient failures like C6;
    /// fails with `GenerationFailed` on exhaustion or content-policy
    /// refusal (non-retryable).
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> CoreResult<GenerationOutput>;
}
