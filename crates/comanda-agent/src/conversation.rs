//! Conversation state: the turn being processed, the customer, the order and funnel progress.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::ConversationMessage;
use crate::order::ActiveOrder;
use crate::steps::StepTracker;

/// One coalesced burst of customer messages
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub user_id: String,
    pub raw_messages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(user_id: impl Into<String>, raw_messages: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            raw_messages,
            created_at: Utc::now(),
        }
    }

    /// The messages joined in arrival order
    pub fn body(&self) -> String {
        self.raw_messages.join("\n")
    }
}

/// What we know about the customer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub customer_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl CustomerInfo {
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            ..Default::default()
        }
    }

    /// Pick up customer fields from a tool payload (top level or `customer` member).
    /// Returns whether anything changed.
    pub fn absorb(&mut self, payload: &Value) -> bool {
        let source = match payload.get("customer") {
            Some(inner) if inner.is_object() => inner,
            _ => payload,
        };
        let Some(obj) = source.as_object() else {
            return false;
        };
        // A product payload also has a name; only treat it as customer data when it says so
        if payload.get("customer").is_none() && !obj.contains_key("customer_id") {
            return false;
        }

        let before = self.clone();
        let text = |key: &str| {
            obj.get(key)
                .and_then(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
        };
        if let Some(id) = text("customer_id").or_else(|| text("id")) {
            self.customer_id = id;
        }
        if let Some(name) = text("name") {
            self.name = Some(name);
        }
        if let Some(phone) = text("phone") {
            self.phone = Some(phone);
        }
        if let Some(address) = text("address") {
            self.address = Some(address);
        }
        *self != before
    }

    pub fn describe(&self) -> String {
        format!(
            "customer_id: {}, name: {}, phone: {}, address: {}",
            self.customer_id,
            self.name.as_deref().unwrap_or("unknown"),
            self.phone.as_deref().unwrap_or("unknown"),
            self.address.as_deref().unwrap_or("unknown"),
        )
    }
}

/// Everything the orchestrator tracks for one user between turns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub steps: StepTracker,
    pub order: Option<ActiveOrder>,
    pub customer: CustomerInfo,
}

impl ConversationState {
    pub fn new(user_id: &str) -> Self {
        Self {
            steps: StepTracker::new(),
            order: None,
            customer: CustomerInfo::new(user_id),
        }
    }

    pub fn order_item_count(&self) -> usize {
        self.order.as_ref().map(ActiveOrder::item_count).unwrap_or(0)
    }

    pub fn order_total(&self) -> Decimal {
        self.order.as_ref().map(|o| o.total).unwrap_or_default()
    }

    /// Compact summary handed to the classifier
    pub fn summary(&self) -> String {
        let list = |steps: Vec<crate::steps::Step>| {
            if steps.is_empty() {
                "none".to_string()
            } else {
                steps.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            }
        };
        format!(
            "completed steps: {}\nin-progress steps: {}\norder: {} item(s), total {}",
            list(self.steps.completed()),
            list(self.steps.in_progress()),
            self.order_item_count(),
            self.order_total(),
        )
    }
}

/// Immutable input shared by every stage of one turn
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub turn: Turn,
    /// State as it was when the turn started
    pub state: ConversationState,
    /// Most recent stored messages, oldest first
    pub history: Vec<ConversationMessage>,
}

impl TurnContext {
    pub fn user_id(&self) -> &str {
        &self.turn.user_id
    }

    /// Recent history rendered one message per line
    pub fn history_text(&self) -> String {
        self.history
            .iter()
            .map(|m| {
                let who = match m.role {
                    crate::memory::Role::Human => "customer",
                    crate::memory::Role::Assistant => "assistant",
                };
                format!("{}: {}", who, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
