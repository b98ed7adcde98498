//! LLM provider trait.

use async_trait::async_trait;

use super::error::LLMError;
use super::types::{ChatRequest, ChatStream, ModelInfo};

/// A backend that can list its models and stream chat completions.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// List the models the provider currently serves.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError>;

    /// Start a streaming chat completion.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError>;
}
