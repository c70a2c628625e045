//! comanda-agent: turn orchestration engine for a conversational ordering assistant
//!
//! Inbound messages enter through the [`DebounceScheduler`], which coalesces
//! bursts per user into a [`Turn`]. The [`Pipeline`] splits the turn into
//! intent fragments, dispatches them one by one against the tool catalogue,
//! composes a reply and commits state, memory and the reply together.

pub mod channel;
pub mod composer;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod intent;
pub mod memory;
pub mod order;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod splitter;
pub mod steps;
pub mod tool;

#[cfg(test)]
mod testing;

pub use channel::Channel;
pub use config::{OrchestratorConfig, RetrySettings};
pub use conversation::{ConversationState, CustomerInfo, Turn, TurnContext};
pub use error::{Error, Result};
pub use events::TurnEvent;
pub use intent::{Intent, IntentFragment};
pub use memory::{AppendOutcome, ConversationMessage, MemoryConfig, MemoryLog, Role};
pub use order::{ActiveOrder, Customization, CustomizationCatalog, OrderItem};
pub use pipeline::{Pipeline, TurnControl, TurnRunner};
pub use scheduler::{DebounceScheduler, Diagnostics, Disposition};
pub use service::{Generation, ModelService, ProviderService, ToolCall};
pub use steps::{Step, StepStatus, StepTracker, next_incomplete};
pub use tool::{BoxedTool, Tool, ToolCatalog, ToolResult, ToolScope};
