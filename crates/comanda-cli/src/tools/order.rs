//! Order lifecycle tools

use std::sync::Arc;

use async_trait::async_trait;
use comanda_agent::tool::{Tool, ToolResult, ToolScope};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::string_arg;
use crate::store::{OrderLine, OrderRecord, OrderStatus, Store};

fn order_id_schema() -> Value {
    json!({
        "type": "string",
        "description": "Order id"
    })
}

fn customer_id_schema() -> Value {
    json!({
        "type": "string",
        "description": "Customer id"
    })
}

/// Fetch an order and check it belongs to the customer
fn owned_order(store: &Store, arguments: &Value) -> Result<OrderRecord, ToolResult> {
    let order_id = string_arg(arguments, "order_id")
        .ok_or_else(|| ToolResult::error("Missing 'order_id' argument"))?;
    let customer_id = string_arg(arguments, "customer_id")
        .ok_or_else(|| ToolResult::error("Missing 'customer_id' argument"))?;
    match store.order(&order_id) {
        Some(order) if order.customer_id == customer_id => Ok(order),
        Some(_) => Err(ToolResult::error(format!(
            "Order {} does not belong to {}",
            order_id, customer_id
        ))),
        None => Err(ToolResult::error(format!("Order {} not found", order_id))),
    }
}

/// The customer's open order
pub struct GetActiveOrderTool {
    store: Arc<Store>,
}

impl GetActiveOrderTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetActiveOrderTool {
    fn name(&self) -> &str {
        "get_active_order"
    }

    fn description(&self) -> &str {
        "Get the customer's order that is still open, with its items."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "customer_id": customer_id_schema() },
            "required": ["customer_id"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Order
    }

    async fn execute(&self, _tool_call_id: &str, arguments: Value, _cancel: CancellationToken) -> ToolResult {
        let Some(customer_id) = string_arg(&arguments, "customer_id") else {
            return ToolResult::error("Missing 'customer_id' argument");
        };
        match self.store.active_order(&customer_id) {
            Some(order) => ToolResult::json(json!({ "order": order.to_json() })),
            None => ToolResult::error(format!("{} has no open order", customer_id)),
        }
    }
}

/// Open a new, empty order
pub struct CreateOrderTool {
    store: Arc<Store>,
}

impl CreateOrderTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CreateOrderTool {
    fn name(&self) -> &str {
        "create_order"
    }

    fn description(&self) -> &str {
        "Open a new, empty order for the customer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "customer_id": customer_id_schema() },
            "required": ["customer_id"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Order
    }

    async fn execute(&self, _tool_call_id: &str, arguments: Value, _cancel: CancellationToken) -> ToolResult {
        let Some(customer_id) = string_arg(&arguments, "customer_id") else {
            return ToolResult::error("Missing 'customer_id' argument");
        };
        if let Some(existing) = self.store.active_order(&customer_id) {
            return ToolResult::json(json!({
                "order_id": existing.order_id,
                "status": existing.status,
            }));
        }
        let order = self.store.create_order(&customer_id);
        tracing::info!("Opened order {} for {}", order.order_id, customer_id);
        ToolResult::json(json!({
            "order_id": order.order_id,
            "status": order.status,
        }))
    }
}

/// Add, customize or remove a product in an open order
pub struct AddItemTool {
    store: Arc<Store>,
}

impl AddItemTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AddItemTool {
    fn name(&self) -> &str {
        "add_item_to_order"
    }

    fn description(&self) -> &str {
        "Add a product to the order by name or id. Passing a product already in the order updates its \
         border and additions. Pass remove=true to take the product out of the order."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "order_id": order_id_schema(),
                "product": {
                    "type": "string",
                    "description": "Product name or id from the menu"
                },
                "border": {
                    "type": "string",
                    "description": "Stuffed border"
                },
                "additions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Extra toppings"
                },
                "remove": {
                    "type": "boolean",
                    "description": "Remove the product instead of adding it"
                }
            },
            "required": ["order_id", "product"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Order
    }

    async fn execute(&self, _tool_call_id: &str, arguments: Value, _cancel: CancellationToken) -> ToolResult {
        let Some(order_id) = string_arg(&arguments, "order_id") else {
            return ToolResult::error("Missing 'order_id' argument");
        };
        let Some(query) = string_arg(&arguments, "product") else {
            return ToolResult::error("Missing 'product' argument");
        };
        let Some(product) = self.store.find_product(&query) else {
            return ToolResult::error(format!("No product on the menu matches '{}'", query));
        };

        if arguments.get("remove").and_then(Value::as_bool).unwrap_or(false) {
            return match self.store.remove_line(&order_id, &product.product_id) {
                Ok(()) => ToolResult::json(json!({ "removed_product_id": product.product_id })),
                Err(e) => ToolResult::error(e),
            };
        }

        let additions = arguments
            .get("additions")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let line = OrderLine {
            product_id: product.product_id,
            name: product.name,
            category: product.category,
            price: product.price,
            border: string_arg(&arguments, "border"),
            additions,
        };
        match self.store.put_line(&order_id, line) {
            Ok(line) => ToolResult::json(line.to_json()),
            Err(e) => ToolResult::error(e),
        }
    }
}

/// Confirm the items of an order with the customer
pub struct ConfirmOrderTool {
    store: Arc<Store>,
}

impl ConfirmOrderTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ConfirmOrderTool {
    fn name(&self) -> &str {
        "confirm_order"
    }

    fn description(&self) -> &str {
        "Mark the order as confirmed by the customer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "order_id": order_id_schema(),
                "customer_id": customer_id_schema()
            },
            "required": ["order_id", "customer_id"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Order
    }

    async fn execute(&self, _tool_call_id: &str, arguments: Value, _cancel: CancellationToken) -> ToolResult {
        let order = match owned_order(&self.store, &arguments) {
            Ok(order) => order,
            Err(result) => return result,
        };
        match self.store.advance_order(&order.order_id, OrderStatus::Confirmed) {
            Ok(order) => ToolResult::json(json!({
                "order_id": order.order_id,
                "status": order.status,
            })),
            Err(e) => ToolResult::error(e),
        }
    }
}

/// Send a confirmed order to the kitchen
pub struct FinalizeOrderTool {
    store: Arc<Store>,
}

impl FinalizeOrderTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FinalizeOrderTool {
    fn name(&self) -> &str {
        "finalize_order"
    }

    fn description(&self) -> &str {
        "Close a confirmed order and send it to the kitchen."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "order_id": order_id_schema(),
                "customer_id": customer_id_schema()
            },
            "required": ["order_id", "customer_id"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Order
    }

    async fn execute(&self, _tool_call_id: &str, arguments: Value, _cancel: CancellationToken) -> ToolResult {
        let order = match owned_order(&self.store, &arguments) {
            Ok(order) => order,
            Err(result) => return result,
        };
        match self.store.advance_order(&order.order_id, OrderStatus::Finalized) {
            Ok(order) => {
                tracing::info!("Order {} sent to the kitchen", order.order_id);
                ToolResult::json(json!({
                    "order_id": order.order_id,
                    "status": order.status,
                }))
            }
            Err(e) => ToolResult::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    async fn open_order(store: &Arc<Store>) -> String {
        let result = CreateOrderTool::new(store.clone())
            .execute("c", json!({"customer_id": "u1"}), cancel())
            .await;
        result.payload().unwrap()["order_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_no_active_order_is_error() {
        let tool = GetActiveOrderTool::new(Arc::new(Store::demo()));
        let result = tool.execute("1", json!({"customer_id": "u1"}), cancel()).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_create_reuses_open_order() {
        let store = Arc::new(Store::demo());
        let first = open_order(&store).await;
        let second = open_order(&store).await;
        assert_eq!(first, second);

        let result = GetActiveOrderTool::new(store)
            .execute("1", json!({"customer_id": "u1"}), cancel())
            .await;
        assert_eq!(result.payload().unwrap()["order"]["order_id"], first.as_str());
    }

    #[tokio::test]
    async fn test_add_customize_remove() {
        let store = Arc::new(Store::demo());
        let order_id = open_order(&store).await;
        let tool = AddItemTool::new(store.clone());

        let added = tool
            .execute("1", json!({"order_id": order_id, "product": "calabresa"}), cancel())
            .await;
        let payload = added.payload().unwrap();
        assert_eq!(payload["product_id"], "pz-calabresa");
        assert_eq!(payload["price"], "45.00");
        assert_eq!(payload["type"], "pizza");

        let customized = tool
            .execute(
                "2",
                json!({"order_id": order_id, "product": "Calabresa", "border": "catupiry", "additions": ["bacon"]}),
                cancel(),
            )
            .await;
        let payload = customized.payload().unwrap();
        assert_eq!(payload["border"], "catupiry");
        assert_eq!(payload["additions"][0], "bacon");
        assert_eq!(store.order(&order_id).unwrap().items.len(), 1);

        let removed = tool
            .execute("3", json!({"order_id": order_id, "product": "calabresa", "remove": true}), cancel())
            .await;
        assert_eq!(removed.payload().unwrap()["removed_product_id"], "pz-calabresa");
        assert!(store.order(&order_id).unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let store = Arc::new(Store::demo());
        let order_id = open_order(&store).await;
        let result = AddItemTool::new(store)
            .execute("1", json!({"order_id": order_id, "product": "sushi"}), cancel())
            .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("sushi"));
    }

    #[tokio::test]
    async fn test_confirm_then_finalize() {
        let store = Arc::new(Store::demo());
        let order_id = open_order(&store).await;
        let args = json!({"order_id": order_id, "customer_id": "u1"});

        let confirm = ConfirmOrderTool::new(store.clone());
        let finalize = FinalizeOrderTool::new(store.clone());
        assert!(confirm.execute("1", args.clone(), cancel()).await.is_error);

        AddItemTool::new(store.clone())
            .execute("2", json!({"order_id": order_id, "product": "margherita"}), cancel())
            .await;
        assert!(finalize.execute("3", args.clone(), cancel()).await.is_error);

        let confirmed = confirm.execute("4", args.clone(), cancel()).await;
        assert_eq!(confirmed.payload().unwrap()["status"], "confirmed");
        let finalized = finalize.execute("5", args, cancel()).await;
        assert_eq!(finalized.payload().unwrap()["status"], "finalized");
        assert!(store.active_order("u1").is_none());
    }

    #[tokio::test]
    async fn test_order_of_another_customer() {
        let store = Arc::new(Store::demo());
        let order_id = open_order(&store).await;
        let result = ConfirmOrderTool::new(store)
            .execute("1", json!({"order_id": order_id, "customer_id": "u2"}), cancel())
            .await;
        assert!(result.is_error);
    }
}
