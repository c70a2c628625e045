//! Tool trait, results and the scoped tool catalogue

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use comanda_ai::Content;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content to return to the model
    pub content: Vec<Content>,
    /// Whether the execution resulted in an error
    pub is_error: bool,
    /// Optional structured payload (customer, order, product...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
            details: None,
        }
    }

    /// Create a successful result carrying a structured payload
    pub fn json(payload: serde_json::Value) -> Self {
        Self {
            content: vec![Content::text(payload.to_string())],
            is_error: false,
            details: Some(payload),
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
            details: None,
        }
    }

    /// Get the text content as a single string
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Structured payload: `details` if set, otherwise the text parsed as JSON
    pub fn payload(&self) -> Option<serde_json::Value> {
        if let Some(ref details) = self.details {
            return Some(details.clone());
        }
        serde_json::from_str(self.text_content().trim()).ok()
    }
}

/// Which part of the business a tool touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolScope {
    Customer,
    Order,
    Menu,
    General,
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Scope used to narrow the catalogue offered for a fragment
    fn scope(&self) -> ToolScope {
        ToolScope::General
    }

    /// Execute the tool with the given arguments
    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a comanda_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> comanda_ai::Tool {
    comanda_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// The tools the tool-execution service exposes, with cached argument validators
#[derive(Default, Clone)]
pub struct ToolCatalog {
    tools: Vec<BoxedTool>,
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(tools: Vec<BoxedTool>) -> Self {
        let mut catalog = Self::new();
        for tool in tools {
            catalog.add(tool);
        }
        catalog
    }

    /// Add a tool, replacing any tool with the same name
    pub fn add(&mut self, tool: BoxedTool) {
        self.cache_tool_schema(&tool);
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    fn cache_tool_schema(&mut self, tool: &BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// API definitions for every tool
    pub fn api_tools(&self) -> Vec<comanda_ai::Tool> {
        self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect()
    }

    /// API definitions restricted to the given scopes
    pub fn scoped_api_tools(&self, scopes: &[ToolScope]) -> Vec<comanda_ai::Tool> {
        self.tools
            .iter()
            .filter(|t| scopes.contains(&t.scope()))
            .map(|t| to_api_tool(t.as_ref()))
            .collect()
    }

    /// Validate arguments and run a tool by name
    pub async fn execute(
        &self,
        tool_call_id: &str,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(format!("Tool not found: {}", name));
        };

        if let Some(err) = self
            .schema_cache
            .get(name)
            .and_then(|validator| validate_with_validator(&arguments, validator))
        {
            return ToolResult::error(err);
        }

        tool.execute(tool_call_id, arguments, cancel).await
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MenuTool;

    #[async_trait]
    impl Tool for MenuTool {
        fn name(&self) -> &str {
            "get_menu"
        }
        fn description(&self) -> &str {
            "List menu items"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "category": { "type": "string" }
                },
                "required": ["category"]
            })
        }
        fn scope(&self) -> ToolScope {
            ToolScope::Menu
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            ToolResult::json(json!({"category": arguments["category"], "items": []}))
        }
    }

    struct UpdateCustomerTool;

    #[async_trait]
    impl Tool for UpdateCustomerTool {
        fn name(&self) -> &str {
            "update_customer"
        }
        fn description(&self) -> &str {
            "Update customer"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        fn scope(&self) -> ToolScope {
            ToolScope::Customer
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            _arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            ToolResult::text("ok")
        }
    }

    fn catalog() -> ToolCatalog {
        ToolCatalog::with_tools(vec![Arc::new(MenuTool), Arc::new(UpdateCustomerTool)])
    }

    #[tokio::test]
    async fn test_execute_validates_arguments() {
        let result = catalog()
            .execute("c1", "get_menu", json!({}), CancellationToken::new())
            .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("validation failed"));
    }

    #[tokio::test]
    async fn test_execute_valid_call() {
        let result = catalog()
            .execute("c1", "get_menu", json!({"category": "pizza"}), CancellationToken::new())
            .await;
        assert!(!result.is_error);
        assert_eq!(result.payload().unwrap()["category"], "pizza");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let result = catalog()
            .execute("c1", "drop_tables", json!({}), CancellationToken::new())
            .await;
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Tool not found: drop_tables");
    }

    #[test]
    fn test_scoped_api_tools() {
        let catalog = catalog();
        let scoped = catalog.scoped_api_tools(&[ToolScope::Order, ToolScope::Menu]);
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].name, "get_menu");
        assert_eq!(catalog.api_tools().len(), 2);
    }

    #[test]
    fn test_add_replaces_same_name() {
        let mut catalog = catalog();
        catalog.add(Arc::new(MenuTool));
        assert_eq!(catalog.names(), vec!["update_customer", "get_menu"]);
    }

    #[test]
    fn test_payload_parses_text_json() {
        let result = ToolResult::text("{\"order_id\": \"o-9\"}");
        assert_eq!(result.payload().unwrap()["order_id"], "o-9");
        assert!(ToolResult::text("done").payload().is_none());
    }
}
