//! Customer record tools

use std::sync::Arc;

use async_trait::async_trait;
use comanda_agent::tool::{Tool, ToolResult, ToolScope};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::string_arg;
use crate::store::Store;

/// Look up what is known about a customer
pub struct LookupCustomerTool {
    store: Arc<Store>,
}

impl LookupCustomerTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for LookupCustomerTool {
    fn name(&self) -> &str {
        "lookup_customer"
    }

    fn description(&self) -> &str {
        "Look up the stored name, phone and delivery address of a customer."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "customer_id": {
                    "type": "string",
                    "description": "Customer id"
                }
            },
            "required": ["customer_id"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Customer
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let Some(customer_id) = string_arg(&arguments, "customer_id") else {
            return ToolResult::error("Missing 'customer_id' argument");
        };
        match self.store.customer(&customer_id) {
            Some(record) => ToolResult::json(json!({ "customer": record })),
            None => ToolResult::error(format!("No customer registered as {}", customer_id)),
        }
    }
}

/// Store the customer's name, phone or delivery address
pub struct UpdateCustomerTool {
    store: Arc<Store>,
}

impl UpdateCustomerTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UpdateCustomerTool {
    fn name(&self) -> &str {
        "update_customer"
    }

    fn description(&self) -> &str {
        "Save the customer's name, phone or delivery address. Only pass the fields the customer gave."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "customer_id": {
                    "type": "string",
                    "description": "Customer id"
                },
                "name": {
                    "type": "string",
                    "description": "Customer name"
                },
                "phone": {
                    "type": "string",
                    "description": "Contact phone"
                },
                "address": {
                    "type": "string",
                    "description": "Full delivery address"
                }
            },
            "required": ["customer_id"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Customer
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let Some(customer_id) = string_arg(&arguments, "customer_id") else {
            return ToolResult::error("Missing 'customer_id' argument");
        };
        let name = string_arg(&arguments, "name");
        let phone = string_arg(&arguments, "phone");
        let address = string_arg(&arguments, "address");
        if name.is_none() && phone.is_none() && address.is_none() {
            return ToolResult::error("Nothing to update: pass name, phone or address");
        }

        let record = self.store.upsert_customer(&customer_id, name, phone, address);
        tracing::debug!("Updated customer {}", customer_id);
        ToolResult::json(json!({ "customer": record }))
    }
}
