//! Language-model provider implementations

pub mod openai;

use crate::{CompletionOptions, Context, Error, Message, Result};
use async_trait::async_trait;

/// Trait for language-model providers
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion and return the assistant message (text and/or tool calls)
    async fn complete(&self, context: &Context, options: &CompletionOptions) -> Result<Message>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
