//! HTTP `EmbeddingProvider` over `reqwest`, calling out to a remote
//! embeddings API. Sits alongside the local Candle provider as the
//! second of two concrete `EmbeddingProvider` variants (§4.6).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

use super::retry::retry;
use super::{EmbedTaskType, EmbeddingOutput, EmbeddingProvider};

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    max_input_tokens: usize,
    retry_max: u32,
    retry_delay: Duration,
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        dimension: usize,
        retry_max: u32,
        retry_delay: Duration,
    ) -> Self {
        HttpEmbeddingProvider {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
            dimension,
            max_input_tokens: 8192,
            retry_max,
            retry_delay,
        }
    }

    /// Approximate token-aligned truncation without a local tokenizer:
    /// whitespace-split and rejoin, right-side, which keeps this provider's
    /// contract (truncate, don't reject) without depending on C1's
    /// tokenizer registry matching the remote model's vocabulary.
    fn truncate(&self, text: &str) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= self.max_input_tokens {
            text.to_string()
        } else {
            words[..self.max_input_tokens].join(" ")
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponseItem {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedResponseItem>,
    usage: Option<EmbedUsage>,
}

#[derive(Deserialize)]
struct EmbedUsage {
    total_tokens: usize,
}

fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String], _task: EmbedTaskType) -> CoreResult<EmbeddingOutput> {
        let truncated: Vec<String> = texts.iter().map(|t| self.truncate(t)).collect();

        let result = retry(
            self.retry_max,
            self.retry_delay,
            |transient: &bool| *transient,
            || async {
                let response = self
                    .client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&EmbedRequest {
                        model: &self.model,
                        input: &truncated,
                    })
                    .send()
                    .await;

                match response {
                    Ok(resp) if resp.status().is_success() => resp
                        .json::<EmbedResponse>()
                        .await
                        .map_err(|_| true),
                    Ok(resp) => Err(is_transient_status(resp.status())),
                    Err(e) => Err(e.is_timeout() || e.is_connect()),
                }
            },
        )
        .await;

        match result {
            Ok(parsed) => {
                if parsed.data.len() != texts.len() {
                    return Err(CoreError::EmbeddingFailed {
                        reason: format!(
                            "expected {} vectors, got {}",
                            texts.len(),
                            parsed.data.len()
                        ),
                        transient: false,
                    });
                }
                Ok(EmbeddingOutput {
                    vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
                    model: self.model.clone(),
                    token_total: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
                })
            }
            Err(transient) => Err(CoreError::EmbeddingFailed {
                reason: "exhausted retries calling embedding provider".to_string(),
                transient,
            }),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }
}
