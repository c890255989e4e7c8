// SPDX-License-Identifier: MIT

//! OpenAI-compatible chat completion client

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ChatModel, LlmConfig, LlmError, TokenStream};

pub struct OpenAiModel {
    client: Client,
    config: LlmConfig,
}

impl OpenAiModel {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Create from `LLM_*` environment variables
    pub fn from_env() -> Result<Self, LlmError> {
        Ok(Self::new(LlmConfig::from_env()?))
    }

    fn request_body(&self, system: &str, user: &str, stream: bool) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "stream": stream,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        })
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }
        Ok(resp)
    }
}

/// Accumulates raw response bytes and yields complete lines
///
/// HTTP chunk boundaries can fall inside a multi-byte UTF-8 character, so
/// bytes are buffered as-is and only complete lines are decoded; `\n` never
/// occurs inside a UTF-8 sequence, making it a safe split point.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

/// Extract the delta token from one `data:` line of a completion stream
///
/// Returns None for comments, blank lines, the `[DONE]` sentinel and
/// chunks without content (role-only deltas, finish chunks).
fn parse_data_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    let chunk: serde_json::Value = serde_json::from_str(payload).ok()?;
    chunk["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let body = self.request_body(system, user, false);
        log::debug!("completion request for model {}", self.config.model);

        let resp_json: serde_json::Value = self.post(&body).await?.json().await?;
        resp_json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::InvalidResponse("no message content in choices".to_string()))
    }

    async fn stream(&self, system: &str, user: &str) -> Result<TokenStream, LlmError> {
        let body = self.request_body(system, user, true);
        log::debug!("streaming completion request for model {}", self.config.model);

        let resp = self.post(&body).await?;
        let mut bytes = resp.bytes_stream();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(bytes) => {
                        for line in lines.push(&bytes) {
                            if line == "data: [DONE]" {
                                return;
                            }
                            if let Some(token) = parse_data_line(&line) {
                                if tx.send(Ok(token)).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Http(e)));
                        return;
                    }
                }
            }
        });

        Ok(UnboundedReceiverStream::new(rx))
    }
}
