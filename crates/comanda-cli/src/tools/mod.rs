//! Demo tools backed by the in-memory [`Store`]

mod customer;
mod menu;
mod order;

use std::sync::Arc;

use comanda_agent::ToolCatalog;
use comanda_agent::tool::BoxedTool;
use serde_json::Value;

use crate::store::Store;

pub use customer::{LookupCustomerTool, UpdateCustomerTool};
pub use menu::MenuTool;
pub use order::{
    AddItemTool, ConfirmOrderTool, CreateOrderTool, FinalizeOrderTool, GetActiveOrderTool,
};

/// Every demo tool, sharing one store
pub fn demo_catalog(store: Arc<Store>) -> ToolCatalog {
    let tools: Vec<BoxedTool> = vec![
        Arc::new(LookupCustomerTool::new(store.clone())),
        Arc::new(UpdateCustomerTool::new(store.clone())),
        Arc::new(MenuTool::new(store.clone())),
        Arc::new(GetActiveOrderTool::new(store.clone())),
        Arc::new(CreateOrderTool::new(store.clone())),
        Arc::new(AddItemTool::new(store.clone())),
        Arc::new(ConfirmOrderTool::new(store.clone())),
        Arc::new(FinalizeOrderTool::new(store)),
    ];
    ToolCatalog::with_tools(tools)
}

/// A non-empty trimmed string argument
fn string_arg(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
