//! HTTP `LlmProvider` over `reqwest`, applied to a chat-completions
//! endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::{CoreError, CoreResult};

use super::retry::retry;
use super::{GenerationOutput, GenerationParams, LlmProvider};

pub struct HttpLlmProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    retry_max: u32,
    retry_delay: Duration,
}

impl HttpLlmProvider {
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        timeout: Duration,
        retry_max: u32,
        retry_delay: Duration,
    ) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::internal(anyhow::anyhow!(e)))?;
        Ok(HttpLlmProvider {
            client,
            endpoint,
            api_key,
            model,
            retry_max,
            retry_delay,
        })
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> CoreResult<GenerationOutput> {
        let mut messages = Vec::new();
        if let Some(system) = &params.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt.to_string(),
        });

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_output_tokens,
        });

        let result = retry(
            self.retry_max,
            self.retry_delay,
            |transient: &bool| *transient,
            || async {
                let response = self
                    .client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&body)
                    .send()
                    .await;

                match response {
                    Ok(resp) if resp.status().is_success() => {
                        resp.json::<ChatCompletion>().await.map_err(|_| true)
                    }
                    Ok(resp) => {
                        let transient = resp.status().is_server_error()
                            || resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS;
                        Err(transient)
                    }
                    Err(e) => Err(e.is_timeout() || e.is_connect()),
                }
            },
        )
        .await;

        match result {
            Ok(completion) => {
                let choice = completion
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| CoreError::GenerationFailed("empty completion".to_string()))?;
                if choice.finish_reason.as_deref() == Some("content_filter") {
                    return Err(CoreError::GenerationFailed("content policy refusal".to_string()));
                }
                let usage = completion.usage;
                Ok(GenerationOutput {
                    text: choice.message.content,
                    prompt_tokens: usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
                    completion_tokens: usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
                })
            }
            Err(_transient) => Err(CoreError::GenerationFailed(
                "exhausted retries calling generation provider".to_string(),
            )),
        }
    }
}
