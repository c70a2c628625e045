//! comanda-ai: language-model provider abstraction
//!
//! Message, content and tool types shared by the orchestrator, the
//! [`LanguageModel`](providers::LanguageModel) seam, and an OpenAI-compatible
//! chat-completions client.

pub mod error;
pub mod providers;
pub mod types;

pub use error::{Error, Result};
pub use providers::{LanguageModel, openai::OpenAiCompatible};
pub use types::*;
