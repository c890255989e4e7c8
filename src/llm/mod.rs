// SPDX-License-Identifier: MIT

//! Chat model abstraction
//!
//! Agents talk to any OpenAI-compatible completion API through the
//! [`ChatModel`] trait, either as one full completion or as an incremental
//! token stream forwarded through the flow channel.

pub mod openai;

pub use openai::OpenAiModel;

use async_trait::async_trait;
use thiserror::Error;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::flow::StepError;

/// Incremental completion tokens, in emission order
pub type TokenStream = UnboundedReceiverStream<Result<String, LlmError>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM_API_KEY must be set")]
    MissingApiKey,

    #[error("model API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response from model: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<LlmError> for StepError {
    fn from(err: LlmError) -> Self {
        StepError::Llm(err.to_string())
    }
}

/// A chat completion model
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One full completion for a system + user prompt pair
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError>;

    /// Incremental completion; tokens arrive as the model produces them
    async fn stream(&self, system: &str, user: &str) -> Result<TokenStream, LlmError>;
}

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: f32,
}

impl LlmConfig {
    /// Read settings from `LLM_API_KEY`, `LLM_BASE_URL` and `LLM_MODEL`
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("LLM_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self {
            model,
            base_url,
            api_key,
            temperature: 0.6,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}
