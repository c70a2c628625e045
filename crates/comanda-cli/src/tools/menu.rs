//! Menu listing tool

use std::sync::Arc;

use async_trait::async_trait;
use comanda_agent::tool::{Tool, ToolResult, ToolScope};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::string_arg;
use crate::store::{MenuItem, Store};

/// List the products on the menu
pub struct MenuTool {
    store: Arc<Store>,
}

impl MenuTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MenuTool {
    fn name(&self) -> &str {
        "get_menu"
    }

    fn description(&self) -> &str {
        "List menu products with their ids and prices, optionally filtered by category (pizza, sweet pizza, drink)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "description": "Only list products of this category"
                }
            }
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
        let category = string_arg(&arguments, "category");
        let items = self.store.menu(category.as_deref());
        if items.is_empty() {
            return ToolResult::error(format!(
                "No products in category {}",
                category.unwrap_or_default()
            ));
        }
        ToolResult::json(json!({
            "items": items.iter().map(MenuItem::to_json).collect::<Vec<_>>()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_menu() {
        let tool = MenuTool::new(Arc::new(Store::demo()));
        let result = tool.execute("1", json!({}), CancellationToken::new()).await;
        let payload = result.payload().unwrap();
        assert_eq!(payload["items"].as_array().unwrap().len(), 7);
        assert_eq!(payload["items"][0]["price"], "45.00");
    }

    #[tokio::test]
    async fn test_category_filter() {
        let tool = MenuTool::new(Arc::new(Store::demo()));
        let result = tool
            .execute("1", json!({"category": "Drink"}), CancellationToken::new())
            .await;
        let payload = result.payload().unwrap();
        assert!(
            payload["items"]
                .as_array()
                .unwrap()
                .iter()
                .all(|i| i["type"] == "drink")
        );

        let result = tool
            .execute("2", json!({"category": "dessert"}), CancellationToken::new())
            .await;
        assert!(result.is_error);
    }
}
