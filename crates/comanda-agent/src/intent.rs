//! Intent fragments and the parse boundary for classifier output

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::steps::Step;

/// What the customer wants from one piece of a turn
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    Greeting,
    PersonalInfo,
    Address,
    MenuBrowse,
    CreateOrder,
    SelectProducts,
    CustomizeProduct,
    ModifyOrder,
    Confirm,
    Finalize,
    General,
    /// A label the classifier produced that is not part of the vocabulary
    Unrecognized(String),
}

impl Intent {
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "greeting" => Intent::Greeting,
            "personal_info" => Intent::PersonalInfo,
            "address" => Intent::Address,
            "menu_browse" | "menu" => Intent::MenuBrowse,
            "create_order" => Intent::CreateOrder,
            "select_products" | "select_product" => Intent::SelectProducts,
            "customize_product" => Intent::CustomizeProduct,
            "modify_order" => Intent::ModifyOrder,
            "confirm" | "confirm_order" => Intent::Confirm,
            "finalize" | "finalize_order" => Intent::Finalize,
            "general" => Intent::General,
            _ => Intent::Unrecognized(label.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Intent::Greeting => "greeting",
            Intent::PersonalInfo => "personal_info",
            Intent::Address => "address",
            Intent::MenuBrowse => "menu_browse",
            Intent::CreateOrder => "create_order",
            Intent::SelectProducts => "select_products",
            Intent::CustomizeProduct => "customize_product",
            Intent::ModifyOrder => "modify_order",
            Intent::Confirm => "confirm",
            Intent::Finalize => "finalize",
            Intent::General => "general",
            Intent::Unrecognized(raw) => raw,
        }
    }

    /// The funnel step this intent contributes to
    pub fn step(&self) -> Step {
        match self {
            Intent::Greeting => Step::Greeting,
            Intent::PersonalInfo => Step::PersonalInfo,
            Intent::Address => Step::Address,
            Intent::MenuBrowse => Step::MenuBrowse,
            Intent::CreateOrder => Step::CreateOrder,
            Intent::SelectProducts | Intent::CustomizeProduct | Intent::ModifyOrder => {
                Step::SelectProducts
            }
            Intent::Confirm => Step::Confirm,
            Intent::Finalize => Step::Finalize,
            Intent::General | Intent::Unrecognized(_) => Step::General,
        }
    }

    /// Labels offered to the classifier
    pub fn vocabulary() -> &'static [&'static str] {
        &[
            "greeting",
            "personal_info",
            "address",
            "menu_browse",
            "create_order",
            "select_products",
            "customize_product",
            "modify_order",
            "confirm",
            "finalize",
            "general",
        ]
    }
}

impl From<String> for Intent {
    fn from(label: String) -> Self {
        Intent::from_label(&label)
    }
}

impl From<Intent> for String {
    fn from(intent: Intent) -> Self {
        intent.label().to_string()
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One (intent, action) unit of a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentFragment {
    pub intent: Intent,
    pub action: String,
}

impl IntentFragment {
    pub fn new(intent: Intent, action: impl Into<String>) -> Self {
        Self {
            intent,
            action: action.into(),
        }
    }
}

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").unwrap());

/// Remove a markdown code fence wrapping the whole output, if any
pub fn strip_code_fences(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => raw.trim(),
    }
}

/// Parse classifier output into fragments.
///
/// Accepts `{"intents": [...]}`, `{"fragments": [...]}`, a bare array, or a
/// single `{"intent", "action"}` object. Fragments with no action take
/// `fallback_action` (usually the whole turn text).
pub fn parse_fragments(raw: &str, fallback_action: &str) -> Result<Vec<IntentFragment>, String> {
    let cleaned = strip_code_fences(raw);
    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(first) => {
            let embedded = extract_json(cleaned).ok_or_else(|| first.to_string())?;
            serde_json::from_str(embedded).map_err(|e| e.to_string())?
        }
    };

    let items: Vec<&Value> = match &value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => {
            if let Some(Value::Array(items)) = obj.get("intents").or_else(|| obj.get("fragments")) {
                items.iter().collect()
            } else if obj.contains_key("intent") {
                vec![&value]
            } else {
                return Err("object has no intents".to_string());
            }
        }
        _ => return Err("expected an array or object".to_string()),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let label = item.get("intent").and_then(Value::as_str)?;
            let action = item
                .get("action")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .unwrap_or(fallback_action);
            Some(IntentFragment::new(Intent::from_label(label), action))
        })
        .collect())
}

/// Find the outermost JSON array/object embedded in surrounding prose
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let close = if text.as_bytes()[start] == b'[' { ']' } else { '}' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
