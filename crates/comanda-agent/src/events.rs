//! Turn event types

use serde::{Deserialize, Serialize};

use crate::intent::IntentFragment;

/// Events emitted while a turn moves through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A coalesced turn started processing
    TurnStart {
        user_id: String,
        message_count: usize,
    },

    /// The splitter produced the fragment queue
    FragmentsSplit {
        user_id: String,
        fragments: Vec<IntentFragment>,
    },

    /// The dispatcher took a fragment off the queue
    FragmentStart {
        user_id: String,
        fragment: IntentFragment,
    },

    /// The dispatcher finished a fragment
    FragmentEnd {
        user_id: String,
        fragment: IntentFragment,
        tool_calls: usize,
        /// Whether the fragment failed and was treated as no state change
        failed: bool,
    },

    /// Tool execution started
    ToolExecutionStart {
        user_id: String,
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        user_id: String,
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// The reply went out through the channel
    ReplySent { user_id: String, text: String },

    /// The turn was superseded or the scheduler stopped
    TurnCancelled { user_id: String },

    /// The turn failed and the customer got an apology
    TurnFailed { user_id: String, message: String },
}

impl TurnEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnEvent::ReplySent { .. } | TurnEvent::TurnCancelled { .. } | TurnEvent::TurnFailed { .. }
        )
    }

    pub fn user_id(&self) -> &str {
        match self {
            TurnEvent::TurnStart { user_id, .. }
            | TurnEvent::FragmentsSplit { user_id, .. }
            | TurnEvent::FragmentStart { user_id, .. }
            | TurnEvent::FragmentEnd { user_id, .. }
            | TurnEvent::ToolExecutionStart { user_id, .. }
            | TurnEvent::ToolExecutionEnd { user_id, .. }
            | TurnEvent::ReplySent { user_id, .. }
            | TurnEvent::TurnCancelled { user_id }
            | TurnEvent::TurnFailed { user_id, .. } => user_id,
        }
    }
}
