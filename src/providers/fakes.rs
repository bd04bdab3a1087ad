//! In-memory provider fakes for tests (§9: "Tests use in-memory fakes that
//! satisfy the same interface — see §8 scenario 5"). No network calls.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::CoreResult;

use super::{EmbedTaskType, EmbeddingOutput, EmbeddingProvider, GenerationOutput, GenerationParams, LlmProvider};

/// Deterministic but distinct vectors per text: each component is derived
/// from a rolling hash of the text bytes, then L2-normalized so cosine
/// similarity behaves sensibly in MMR/semantic-retrieval tests.
pub struct FakeEmbeddingProvider {
    dimension: usize,
    model: String,
}

impl FakeEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        FakeEmbeddingProvider {
            dimension,
            model: "fake-embedder".to_string(),
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut state: u64 = 1469598103934665603; // FNV offset basis
        for byte in text.as_bytes() {
            state ^= *byte as u64;
            state = state.wrapping_mul(1099511628211);
        }
        let mut vector = Vec::with_capacity(self.dimension);
        let mut seed = state;
        for _ in 0..self.dimension {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let component = ((seed >> 33) as f64 / u32::MAX as f64) * 2.0 - 1.0;
            vector.push(component as f32);
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddingProvider {
    async fn embed(&self, texts: &[String], _task: EmbedTaskType) -> CoreResult<EmbeddingOutput> {
        let vectors = texts.iter().map(|t| self.vector_for(t)).collect();
        Ok(EmbeddingOutput {
            vectors,
            model: self.model.clone(),
            token_total: texts.iter().map(|t| t.split_whitespace().count()).sum(),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_input_tokens(&self) -> usize {
        8192
    }
}

/// Returns a canned answer, recording the last prompt it was given so
/// tests can assert on what the query engine assembled.
pub struct FakeLlmProvider {
    pub canned_answer: String,
    last_prompt: Mutex<Option<String>>,
}

impl FakeLlmProvider {
    pub fn new(canned_answer: impl Into<String>) -> Self {
        FakeLlmProvider {
            canned_answer: canned_answer.into(),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for FakeLlmProvider {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> CoreResult<GenerationOutput> {
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        Ok(GenerationOutput {
            text: self.canned_answer.clone(),
            prompt_tokens: prompt.split_whitespace().count(),
            completion_tokens: self.canned_answer.split_whitespace().count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distinct_texts_yield_distinct_vectors() {
        let provider = FakeEmbeddingProvider::new(16);
        let output = provider
            .embed(&["alpha".to_string(), "beta".to_string()], EmbedTaskType::Document)
            .await
            .unwrap();
        assert_ne!(output.vectors[0], output.vectors[1]);
    }

    #[tokio::test]
    async fn same_text_yields_same_vector() {
        let provider = FakeEmbeddingProvider::new(16);
        let output = provider
            .embed(&["alpha".to_string(), "alpha".to_string()], EmbedTaskType::Document)
            .await
            .unwrap();
        assert_eq!(output.vectors[0], output.vectors[1]);
    }
}
