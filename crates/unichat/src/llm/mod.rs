//! LLM provider client for OpenAI-compatible model servers.

mod error;
mod openai;
mod provider;
mod registry;
mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use error::LLMError;
pub use openai::OpenAICompatibleProvider;
pub use provider::LLMProvider;
pub use registry::{ProviderConfig, ProviderRegistry, default_providers};
pub use types::{ChatRequest, ChatStream, Message, ModelInfo, Role, StreamEvent};
