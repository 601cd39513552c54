pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ChunkFailure, ErrorKind};

pub use openai::{OpenAiChatProvider, OpenAiConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// Token accounting reported by the provider. Only used for cost reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    /// Estimated cost given prices per million prompt/completion tokens.
    #[must_use]
    pub fn estimated_cost(&self, prompt_price: f64, completion_price: f64) -> f64 {
        (self.prompt_tokens as f64 * prompt_price + self.completion_tokens as f64 * completion_price)
            / 1_000_000.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatCompletion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("credentials rejected (status {status}): {body}")]
    Unauthorized { status: u16, body: String },
    #[error("rate limited (status 429): {body}")]
    RateLimited { body: String },
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected provider payload: {0}")]
    InvalidPayload(String),
}

impl ProviderError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredentials | Self::Unauthorized { .. } => ErrorKind::Config,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RateLimited { .. }
            | Self::Status { .. }
            | Self::Transport(_)
            | Self::InvalidPayload(_) => ErrorKind::Provider,
        }
    }
}

impl From<ProviderError> for ChunkFailure {
    fn from(err: ProviderError) -> Self {
        ChunkFailure::new(err.kind(), err.to_string())
    }
}

/// A chat-completion capability. Implementations may be slow, wrong, or rate limited.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion, ProviderError>;
}

#[async_trait]
impl<P: ChatProvider + ?Sized> ChatProvider for std::sync::Arc<P> {
    async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion, ProviderError> {
        (**self).chat(request).await
    }
}
