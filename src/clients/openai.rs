//! OpenAI streaming chat-completion client

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{LanguageModel, TokenStream};
use crate::memory::ChatMessage;
use crate::{Error, Result};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

const LLM_MODEL: &str = "gpt-4o-mini";

/// Short responses keep voice latency down
const MAX_RESPONSE_TOKENS: u32 = 150;

const TEMPERATURE: f32 = 0.7;

/// Upper bound on the whole streamed completion
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Streams chat completions from OpenAI
pub struct OpenAiLlm {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiLlm {
    /// Create a new LLM client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for LLM".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: LLM_MODEL.to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiLlm {
    async fn stream_reply(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_RESPONSE_TOKENS,
        });

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "OpenAI request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "OpenAI API error");
            return Err(Error::Llm(format!("OpenAI API error {status}: {body}")));
        }

        // SSE lines can split across network chunks; carry the partial tail
        // between reads
        let stream = response
            .bytes_stream()
            .scan(String::new(), |carry, chunk| {
                let tokens = match chunk {
                    Ok(bytes) => {
                        carry.push_str(&String::from_utf8_lossy(&bytes));
                        drain_sse_tokens(carry).into_iter().map(Ok).collect()
                    }
                    Err(e) => vec![Err(Error::Llm(e.to_string()))],
                };
                std::future::ready(Some(futures::stream::iter(tokens)))
            })
            .flatten();

        Ok(Box::pin(stream))
    }
}

/// Pull completed SSE lines out of the carry buffer and extract their
/// content deltas
fn drain_sse_tokens(carry: &mut String) -> Vec<String> {
    let mut tokens = Vec::new();

    while let Some(newline) = carry.find('\n') {
        let line: String = carry.drain(..=newline).collect();
        let line = line.trim_end();

        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            continue;
        }

        if let Ok(event) = serde_json::from_str::<serde_json::Value>(data) {
            if let Some(delta) = event["choices"][0]["delta"]["content"].as_str() {
                if !delta.is_empty() {
                    tokens.push(delta.to_string());
                }
            }
        }
    }

    tokens
}
