//! Fragment dispatcher: processes one intent fragment against the tool catalogue
//! and folds the results back into order, customer and step state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::conversation::ConversationState;
use crate::error::{Error, Result};
use crate::events::TurnEvent;
use crate::intent::{Intent, IntentFragment};
use crate::order::{ActiveOrder, CustomizationCatalog, DiscoveredProduct, FoldResult};
use crate::service::{ModelService, ToolCall, guarded};
use crate::steps::{Step, StepStatus, StepTracker};
use crate::tool::{ToolCatalog, ToolResult, ToolScope};

/// State after one fragment, merged by the pipeline only on success
#[derive(Debug, Clone)]
pub struct FragmentOutcome {
    pub order: Option<ActiveOrder>,
    pub steps: StepTracker,
    /// Tool payloads that may carry customer fields
    pub customer_payloads: Vec<Value>,
    /// Facts for the response composer
    pub notes: Vec<String>,
    pub tool_calls: usize,
    /// A confirm arrived while the order had no items
    pub nothing_to_confirm: bool,
}

impl FragmentOutcome {
    fn unchanged(state: &ConversationState) -> Self {
        Self {
            order: state.order.clone(),
            steps: state.steps.clone(),
            customer_payloads: Vec::new(),
            notes: Vec::new(),
            tool_calls: 0,
            nothing_to_confirm: false,
        }
    }

    /// Merge into the working state
    pub fn apply(&self, state: &mut ConversationState) {
        state.order = self.order.clone();
        state.steps = self.steps.clone();
        for payload in &self.customer_payloads {
            state.customer.absorb(payload);
        }
    }
}

pub struct FragmentDispatcher {
    model: Arc<dyn ModelService>,
    tools: Arc<ToolCatalog>,
    customizations: CustomizationCatalog,
    tool_timeout: Duration,
    events: broadcast::Sender<TurnEvent>,
}

impl FragmentDispatcher {
    pub fn new(
        model: Arc<dyn ModelService>,
        tools: Arc<ToolCatalog>,
        customizations: CustomizationCatalog,
        tool_timeout: Duration,
        events: broadcast::Sender<TurnEvent>,
    ) -> Self {
        Self {
            model,
            tools,
            customizations,
            tool_timeout,
            events,
        }
    }

    /// Process one fragment against the working state.
    ///
    /// The state is not modified; the caller merges the returned outcome.
    pub async fn process(
        &self,
        fragment: &IntentFragment,
        user_id: &str,
        state: &ConversationState,
        cancel: &CancellationToken,
    ) -> Result<FragmentOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut outcome = FragmentOutcome::unchanged(state);
        let customer_id = state.customer.customer_id.as_str();

        match fragment.intent {
            Intent::Confirm => self.confirm(user_id, customer_id, &mut outcome, cancel).await?,
            Intent::CreateOrder => {
                self.ensure_order(user_id, customer_id, &mut outcome, cancel)
                    .await?
            }
            Intent::SelectProducts | Intent::CustomizeProduct | Intent::ModifyOrder => {
                if outcome.order.is_none() {
                    self.ensure_order(user_id, customer_id, &mut outcome, cancel)
                        .await?;
                }
                let instructions = self.selection_instructions(fragment, state, &outcome);
                let tools = self
                    .tools
                    .scoped_api_tools(&[ToolScope::Order, ToolScope::Menu]);
                self.generate_and_fold(fragment, user_id, &instructions, &tools, &mut outcome, cancel)
                    .await?;
            }
            Intent::Finalize => self.finalize(user_id, customer_id, &mut outcome, cancel).await?,
            _ => {
                let instructions = self.default_instructions(fragment, state);
                let tools = self.tools.api_tools();
                self.generate_and_fold(fragment, user_id, &instructions, &tools, &mut outcome, cancel)
                    .await?;
            }
        }

        Ok(outcome)
    }

    async fn confirm(
        &self,
        user_id: &str,
        customer_id: &str,
        outcome: &mut FragmentOutcome,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let order_id = match outcome.order {
            Some(ref order) if !order.is_empty() => order.order_id.clone(),
            _ => {
                tracing::info!(user_id = %user_id, "Confirm requested with an empty order");
                outcome.nothing_to_confirm = true;
                outcome
                    .notes
                    .push("The customer asked to confirm but the order has no items yet.".to_string());
                return Ok(());
            }
        };

        let result = self
            .call_tool(
                user_id,
                "confirm_order",
                json!({"order_id": order_id, "customer_id": customer_id}),
                outcome,
                cancel,
            )
            .await?;
        if result.is_error {
            return Err(Error::Tool {
                tool: "confirm_order".to_string(),
                message: result.text_content(),
            });
        }
        outcome.steps.complete(Step::Confirm);
        outcome.notes.push(format!("Order {} confirmed.", order_id));
        Ok(())
    }

    /// Load the customer's open order, creating one if there is none
    async fn ensure_order(
        &self,
        user_id: &str,
        customer_id: &str,
        outcome: &mut FragmentOutcome,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if outcome.order.is_none() && outcome.steps.is_done(Step::Finalize) {
            tracing::info!(user_id = %user_id, "Starting a new order after a finalized one");
            outcome.steps.begin_new_order();
        }
        if outcome.order.is_some() {
            outcome.steps.complete(Step::CreateOrder);
            return Ok(());
        }

        let existing = self
            .call_tool(
                user_id,
                "get_active_order",
                json!({"customer_id": customer_id}),
                outcome,
                cancel,
            )
            .await?;
        let mut order = if existing.is_error {
            None
        } else {
            existing
                .payload()
                .and_then(|p| order_from_payload(&p, &self.customizations))
        };

        if order.is_none() {
            let created = self
                .call_tool(
                    user_id,
                    "create_order",
                    json!({"customer_id": customer_id}),
                    outcome,
                    cancel,
                )
                .await?;
            if created.is_error {
                return Err(Error::Tool {
                    tool: "create_order".to_string(),
                    message: created.text_content(),
                });
            }
            order = created
                .payload()
                .and_then(|p| order_from_payload(&p, &self.customizations));
            if order.is_none() {
                return Err(Error::Tool {
                    tool: "create_order".to_string(),
                    message: "response has no order id".to_string(),
                });
            }
        }

        if let Some(ref order) = order {
            tracing::debug!(user_id = %user_id, order_id = %order.order_id, "Active order ready");
            outcome
                .notes
                .push(format!("Order {} is open with {} item(s).", order.order_id, order.item_count()));
        }
        outcome.order = order;
        outcome.steps.complete(Step::CreateOrder);
        Ok(())
    }

    async fn finalize(
        &self,
        user_id: &str,
        customer_id: &str,
        outcome: &mut FragmentOutcome,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let order_id = match outcome.order {
            Some(ref order) if !order.is_empty() && outcome.steps.is_done(Step::Confirm) => {
                order.order_id.clone()
            }
            Some(ref order) if !order.is_empty() => {
                outcome
                    .notes
                    .push("The order must be confirmed before it can be finalized.".to_string());
                return Ok(());
            }
            _ => {
                outcome
                    .notes
                    .push("There is no order with items to finalize.".to_string());
                return Ok(());
            }
        };

        let result = self
            .call_tool(
                user_id,
                "finalize_order",
                json!({"order_id": order_id, "customer_id": customer_id}),
                outcome,
                cancel,
            )
            .await?;
        if result.is_error {
            return Err(Error::Tool {
                tool: "finalize_order".to_string(),
                message: result.text_content(),
            });
        }
        outcome.steps.complete(Step::Finalize);
        outcome.order = None;
        outcome.notes.push(format!("Order {} finalized.", order_id));
        Ok(())
    }

    /// Tool-bound generation followed by the price fold of every result
    async fn generate_and_fold(
        &self,
        fragment: &IntentFragment,
        user_id: &str,
        instructions: &str,
        tools: &[comanda_ai::Tool],
        outcome: &mut FragmentOutcome,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let generation = self.model.generate(instructions, tools, cancel).await?;

        if generation.tool_calls.is_empty() {
            match fragment.intent {
                Intent::SelectProducts | Intent::CustomizeProduct | Intent::ModifyOrder => {
                    tracing::info!(
                        user_id = %user_id,
                        action = %fragment.action,
                        "Product not understood, no tool call"
                    );
                    outcome.notes.push(format!(
                        "Could not identify the product in \"{}\"; ask the customer to clarify.",
                        fragment.action
                    ));
                }
                _ => {
                    if !generation.text.trim().is_empty() {
                        outcome.notes.push(generation.text.trim().to_string());
                    }
                }
            }
            return Ok(());
        }

        let mut succeeded = 0usize;
        let mut order_changed = false;
        for ToolCall { id, name, arguments } in generation.tool_calls {
            let result = self
                .run_tool(user_id, &id, &name, arguments, outcome, cancel)
                .await?;
            if result.is_error {
                tracing::warn!(
                    user_id = %user_id,
                    tool = %name,
                    "Tool returned an error: {}",
                    result.text_content()
                );
                continue;
            }
            succeeded += 1;
            if let Some(payload) = result.payload() {
                order_changed |= self.fold_payload(&fragment.intent, user_id, &payload, outcome);
                outcome.customer_payloads.push(payload);
            }
        }

        if order_changed && fragment.intent == Intent::ModifyOrder {
            // A changed order has to be confirmed again
            outcome.steps.reopen(Step::SelectProducts, StepStatus::InProgress);
            if outcome.steps.is_done(Step::Confirm) {
                outcome.steps.reopen(Step::Confirm, StepStatus::NotStarted);
            }
        }
        let has_items = outcome.order.as_ref().is_some_and(|o| !o.is_empty());
        if order_changed && has_items {
            outcome.steps.complete(Step::SelectProducts);
        }
        if succeeded > 0 && matches!(fragment.intent, Intent::PersonalInfo | Intent::Address | Intent::MenuBrowse) {
            outcome.steps.complete(fragment.intent.step());
        }
        Ok(())
    }

    /// Apply a tool payload to the order. Returns whether the order changed.
    fn fold_payload(
        &self,
        intent: &Intent,
        user_id: &str,
        payload: &Value,
        outcome: &mut FragmentOutcome,
    ) -> bool {
        let Some(order) = outcome.order.as_mut() else {
            return false;
        };

        if *intent == Intent::ModifyOrder {
            if let Some(removed) = removed_product_id(payload) {
                let removed_any = order.remove(&removed);
                if removed_any {
                    outcome
                        .notes
                        .push(format!("Removed {} from the order; total is now {}.", removed, order.total));
                }
                return removed_any;
            }
        }

        let Some(product) = DiscoveredProduct::from_payload(payload) else {
            return false;
        };

        if matches!(intent, Intent::CustomizeProduct | Intent::ModifyOrder)
            && order.customize(&product, &self.customizations)
        {
            outcome.notes.push(format!(
                "Updated {}; total is now {}.",
                product.name, order.total
            ));
            return true;
        }

        match order.fold(&product, &self.customizations) {
            FoldResult::Added { total_price } => {
                tracing::debug!(
                    user_id = %user_id,
                    product = %product.name,
                    price = %total_price,
                    "Item folded into order"
                );
                outcome.notes.push(format!(
                    "Added {} ({}); order total is now {}.",
                    product.name, total_price, order.total
                ));
                true
            }
            FoldResult::Duplicate => false,
        }
    }

    /// Direct tool call issued by the dispatcher itself
    async fn call_tool(
        &self,
        user_id: &str,
        name: &str,
        arguments: Value,
        outcome: &mut FragmentOutcome,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        let id = uuid::Uuid::new_v4().to_string();
        self.run_tool(user_id, &id, name, arguments, outcome, cancel)
            .await
    }

    async fn run_tool(
        &self,
        user_id: &str,
        tool_call_id: &str,
        name: &str,
        arguments: Value,
        outcome: &mut FragmentOutcome,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        let _ = self.events.send(TurnEvent::ToolExecutionStart {
            user_id: user_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: name.to_string(),
            arguments: arguments.clone(),
        });
        outcome.tool_calls += 1;

        let execution = async {
            Ok(self
                .tools
                .execute(tool_call_id, name, arguments, cancel.clone())
                .await)
        };
        let result = guarded("tool call", self.tool_timeout, cancel, execution).await?;

        let _ = self.events.send(TurnEvent::ToolExecutionEnd {
            user_id: user_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: name.to_string(),
            result: result.text_content(),
            is_error: result.is_error,
        });
        Ok(result)
    }

    fn selection_instructions(
        &self,
        fragment: &IntentFragment,
        state: &ConversationState,
        outcome: &FragmentOutcome,
    ) -> String {
        let (order_id, items) = match outcome.order {
            Some(ref order) => (order.order_id.as_str(), order.describe_items()),
            None => ("(none)", "(no items)".to_string()),
        };
        let task = match fragment.intent {
            Intent::CustomizeProduct => {
                "The customer wants to customize a product. Call the order tool with the product and \
                 the border or additions they asked for."
            }
            Intent::ModifyOrder => {
                "The customer wants to change the order. To remove an item call the order tool with \
                 `remove: true`; to change an item call it with the new border or additions."
            }
            _ => {
                "The customer wants to add products. Look the product up in the menu and add it to \
                 the order."
            }
        };
        let mut instructions = format!(
            "You operate the order of a pizzeria customer. Only call tools, do not write a reply.\n\
             {}\n\nRequest: {}\nCustomer id: {}\nOrder id: {}\nCurrent items:\n{}",
            task, fragment.action, state.customer.customer_id, order_id, items
        );
        if matches!(fragment.intent, Intent::CustomizeProduct | Intent::ModifyOrder) {
            instructions.push_str(&format!(
                "\n\nUse exactly these names. {}",
                self.customizations.vocabulary()
            ));
        }
        instructions
    }

    fn default_instructions(&self, fragment: &IntentFragment, state: &ConversationState) -> String {
        let items = state
            .order
            .as_ref()
            .map(ActiveOrder::describe_items)
            .unwrap_or_else(|| "(no order yet)".to_string());
        format!(
            "You assist a pizzeria customer. Topic: {}.\n\
             Use the tools when the request needs customer, menu or order data; \
             otherwise answer briefly.\n\nRequest: {}\nCustomer: {}\nCurrent items:\n{}",
            fragment.intent,
            fragment.action,
            state.customer.describe(),
            items
        )
    }
}

/// An order in a `get_active_order` / `create_order` payload
fn order_from_payload(payload: &Value, customizations: &CustomizationCatalog) -> Option<ActiveOrder> {
    let source = payload.get("order").filter(|o| o.is_object()).unwrap_or(payload);
    let order_id = source
        .get("order_id")
        .or_else(|| source.get("id"))
        .and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })?;

    let mut order = ActiveOrder::new(order_id);
    if let Some(items) = source.get("items").and_then(Value::as_array) {
        for item in items {
            if let Some(product) = DiscoveredProduct::from_payload(item) {
                order.fold(&product, customizations);
            }
        }
    }
    Some(order)
}

fn removed_product_id(payload: &Value) -> Option<String> {
    let text = |v: &Value| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    if let Some(id) = payload.get("removed_product_id").and_then(text) {
        return Some(id);
    }
    if payload.get("remove").and_then(Value::as_bool) == Some(true) {
        return payload.get("product_id").and_then(text);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedTool, ScriptedModel};
    use crate::tool::BoxedTool;
    use rust_decimal::Decimal;

    struct Harness {
        dispatcher: FragmentDispatcher,
        model: Arc<ScriptedModel>,
    }

    fn harness(model: ScriptedModel, tools: Vec<BoxedTool>) -> Harness {
        let model = Arc::new(model);
        let (events, _) = broadcast::channel(64);
        let dispatcher = FragmentDispatcher::new(
            model.clone(),
            Arc::new(ToolCatalog::with_tools(tools)),
            CustomizationCatalog::default(),
            Duration::from_secs(5),
            events,
        );
        Harness { dispatcher, model }
    }

    fn state_with_order(items: &[(&str, &str, i64)]) -> ConversationState {
        let mut state = ConversationState::new("5511999");
        let mut order = ActiveOrder::new("o-1");
        for (id, name, price) in items {
            let product = DiscoveredProduct::from_payload(
                &json!({"product_id": id, "name": name, "price": price}),
            )
            .unwrap();
            order.fold(&product, &CustomizationCatalog::default());
        }
        state.order = Some(order);
        state.steps.complete(Step::CreateOrder);
        state
    }

    async fn run(h: &Harness, intent: Intent, action: &str, state: &ConversationState) -> Result<FragmentOutcome> {
        h.dispatcher
            .process(&IntentFragment::new(intent, action), "u1", state, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_confirm_without_items_is_noop() {
        let confirm = FixedTool::new("confirm_order", ToolScope::Order, json!({"status": "confirmed"}));
        let h = harness(ScriptedModel::new(), vec![confirm.clone()]);
        let outcome = run(&h, Intent::Confirm, "pode fechar", &ConversationState::new("u1"))
            .await
            .unwrap();
        assert!(outcome.nothing_to_confirm);
        assert_eq!(confirm.call_count(), 0);
        assert!(!outcome.steps.is_done(Step::Confirm));
    }

    #[tokio::test]
    async fn test_confirm_with_items() {
        let confirm = FixedTool::new("confirm_order", ToolScope::Order, json!({"status": "confirmed"}));
        let h = harness(ScriptedModel::new(), vec![confirm.clone()]);
        let state = state_with_order(&[("p1", "Calabresa", 45)]);
        let outcome = run(&h, Intent::Confirm, "pode fechar", &state).await.unwrap();
        assert!(outcome.steps.is_done(Step::Confirm));
        let calls = confirm.calls.lock();
        assert_eq!(calls[0]["order_id"], "o-1");
        assert_eq!(calls[0]["customer_id"], "5511999");
    }

    #[tokio::test]
    async fn test_create_order_when_none_active() {
        let get_active = FixedTool::failing("get_active_order", ToolScope::Order);
        let create = FixedTool::new("create_order", ToolScope::Order, json!({"order_id": "o-77"}));
        let h = harness(ScriptedModel::new(), vec![get_active.clone(), create.clone()]);
        let outcome = run(&h, Intent::CreateOrder, "quero pedir", &ConversationState::new("u1"))
            .await
            .unwrap();
        assert_eq!(outcome.order.unwrap().order_id, "o-77");
        assert!(outcome.steps.is_done(Step::CreateOrder));
        assert_eq!(get_active.call_count(), 1);
        assert_eq!(create.call_count(), 1);
    }

    #[tokio::test]
    async fn test_create_order_reuses_active_order() {
        let get_active = FixedTool::new(
            "get_active_order",
            ToolScope::Order,
            json!({"order": {"order_id": "o-5", "items": [{"product_id": "p1", "name": "Calabresa", "price": 45}]}}),
        );
        let create = FixedTool::new("create_order", ToolScope::Order, json!({"order_id": "o-new"}));
        let h = harness(ScriptedModel::new(), vec![get_active, create.clone()]);
        let outcome = run(&h, Intent::CreateOrder, "quero pedir", &ConversationState::new("u1"))
            .await
            .unwrap();
        let order = outcome.order.unwrap();
        assert_eq!(order.order_id, "o-5");
        assert_eq!(order.total, Decimal::new(45, 0));
        assert_eq!(create.call_count(), 0);
    }

    #[tokio::test]
    async fn test_create_order_after_finalize_starts_over() {
        let create = FixedTool::new("create_order", ToolScope::Order, json!({"order_id": "o-2"}));
        let h = harness(ScriptedModel::new(), vec![create]);
        let mut state = ConversationState::new("u1");
        for step in [Step::CreateOrder, Step::SelectProducts, Step::Confirm, Step::Finalize] {
            state.steps.complete(step);
        }
        let outcome = run(&h, Intent::CreateOrder, "outro pedido", &state).await.unwrap();
        assert_eq!(outcome.order.unwrap().order_id, "o-2");
        assert!(outcome.steps.is_done(Step::CreateOrder));
        assert_eq!(outcome.steps.status(Step::Finalize), StepStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_select_folds_price_with_surcharge() {
        let add = FixedTool::new(
            "add_item_to_order",
            ToolScope::Order,
            json!({"product_id": "p1", "name": "Calabresa", "price": "45.00", "border": "catupiry"}),
        );
        let menu = FixedTool::new("get_menu", ToolScope::Menu, json!({"items": []}));
        let customer = FixedTool::new("update_customer", ToolScope::Customer, json!({}));
        let model = ScriptedModel::new().call_tool("add_item_to_order", json!({"product_id": "p1"}));
        let h = harness(model, vec![add, menu, customer]);
        let state = state_with_order(&[]);
        let outcome = run(&h, Intent::SelectProducts, "calabresa com borda de catupiry", &state)
            .await
            .unwrap();

        let order = outcome.order.unwrap();
        assert_eq!(order.item_count(), 1);
        assert_eq!(order.total, Decimal::new(5300, 2));
        assert!(outcome.steps.is_done(Step::SelectProducts));

        let offered = h.model.offered_tools.lock()[0].clone();
        assert!(offered.contains(&"add_item_to_order".to_string()));
        assert!(offered.contains(&"get_menu".to_string()));
        assert!(!offered.contains(&"update_customer".to_string()));
    }

    #[tokio::test]
    async fn test_fold_is_idempotent() {
        let add = FixedTool::new(
            "add_item_to_order",
            ToolScope::Order,
            json!({"product_id": "p1", "name": "Calabresa", "price": 45}),
        );
        let model = ScriptedModel::new().generate(crate::service::Generation {
            text: String::new(),
            tool_calls: vec![
                ToolCall { id: "a".into(), name: "add_item_to_order".into(), arguments: json!({}) },
                ToolCall { id: "b".into(), name: "add_item_to_order".into(), arguments: json!({}) },
            ],
        });
        let h = harness(model, vec![add]);
        let outcome = run(&h, Intent::SelectProducts, "calabresa", &state_with_order(&[]))
            .await
            .unwrap();
        let order = outcome.order.unwrap();
        assert_eq!(order.item_count(), 1);
        assert_eq!(order.total, Decimal::new(45, 0));
        assert_eq!(outcome.tool_calls, 2);
    }

    #[tokio::test]
    async fn test_select_without_tool_call_changes_nothing() {
        let h = harness(ScriptedModel::new().generate(crate::service::Generation::text("?")), vec![]);
        let state = state_with_order(&[]);
        let outcome = run(&h, Intent::SelectProducts, "aquela de sempre", &state).await.unwrap();
        assert!(outcome.order.unwrap().is_empty());
        assert!(!outcome.steps.is_done(Step::SelectProducts));
        assert!(outcome.notes[0].contains("Could not identify"));
    }

    #[tokio::test]
    async fn test_select_creates_order_first() {
        let create = FixedTool::new("create_order", ToolScope::Order, json!({"order_id": "o-9"}));
        let add = FixedTool::new(
            "add_item_to_order",
            ToolScope::Order,
            json!({"product_id": "p2", "name": "Margherita", "price": 40}),
        );
        let model = ScriptedModel::new().call_tool("add_item_to_order", json!({}));
        let h = harness(model, vec![create, add]);
        let outcome = run(&h, Intent::SelectProducts, "margherita", &ConversationState::new("u1"))
            .await
            .unwrap();
        assert_eq!(outcome.order.as_ref().unwrap().order_id, "o-9");
        assert_eq!(outcome.order.unwrap().item_count(), 1);
        assert!(outcome.steps.is_done(Step::CreateOrder));
    }

    #[tokio::test]
    async fn test_customize_existing_item() {
        let add = FixedTool::new(
            "add_item_to_order",
            ToolScope::Order,
            json!({"product_id": "p1", "name": "Calabresa", "price": 45, "additions": ["bacon"]}),
        );
        let model = ScriptedModel::new().call_tool("add_item_to_order", json!({}));
        let h = harness(model, vec![add]);
        let state = state_with_order(&[("p1", "Calabresa", 45)]);
        let outcome = run(&h, Intent::CustomizeProduct, "com bacon", &state).await.unwrap();
        let order = outcome.order.unwrap();
        assert_eq!(order.item_count(), 1);
        assert_eq!(order.total, Decimal::new(5000, 2));
        assert!(h.model.instructions.lock()[0].contains("catupiry"));
    }

    #[tokio::test]
    async fn test_modify_removes_item() {
        let remove = FixedTool::new(
            "add_item_to_order",
            ToolScope::Order,
            json!({"product_id": "p1", "remove": true}),
        );
        let model = ScriptedModel::new().call_tool("add_item_to_order", json!({}));
        let h = harness(model, vec![remove]);
        let state = state_with_order(&[("p1", "Calabresa", 45), ("p2", "Margherita", 40)]);
        let outcome = run(&h, Intent::ModifyOrder, "tira a calabresa", &state).await.unwrap();
        let order = outcome.order.unwrap();
        assert_eq!(order.item_count(), 1);
        assert_eq!(order.total, Decimal::new(40, 0));
        assert!(outcome.steps.is_done(Step::SelectProducts));
    }

    #[tokio::test]
    async fn test_modify_after_confirm_requires_new_confirm() {
        let remove = FixedTool::new(
            "add_item_to_order",
            ToolScope::Order,
            json!({"removed_product_id": "p2"}),
        );
        let model = ScriptedModel::new().call_tool("add_item_to_order", json!({}));
        let h = harness(model, vec![remove]);
        let mut state = state_with_order(&[("p1", "Calabresa", 45), ("p2", "Margherita", 40)]);
        state.steps.complete(Step::SelectProducts);
        state.steps.complete(Step::Confirm);

        let outcome = run(&h, Intent::ModifyOrder, "tira a margherita", &state).await.unwrap();
        assert!(outcome.steps.is_done(Step::SelectProducts));
        assert_eq!(outcome.steps.status(Step::Confirm), StepStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_modify_without_change_keeps_confirm() {
        let failing = FixedTool::failing("add_item_to_order", ToolScope::Order);
        let model = ScriptedModel::new().call_tool("add_item_to_order", json!({}));
        let h = harness(model, vec![failing]);
        let mut state = state_with_order(&[("p1", "Calabresa", 45)]);
        state.steps.complete(Step::SelectProducts);
        state.steps.complete(Step::Confirm);

        let outcome = run(&h, Intent::ModifyOrder, "tira a pepperoni", &state).await.unwrap();
        assert!(outcome.steps.is_done(Step::SelectProducts));
        assert!(outcome.steps.is_done(Step::Confirm));
    }

    #[tokio::test]
    async fn test_finalize_requires_confirm() {
        let finalize = FixedTool::new("finalize_order", ToolScope::Order, json!({"status": "done"}));
        let h = harness(ScriptedModel::new(), vec![finalize.clone()]);
        let state = state_with_order(&[("p1", "Calabresa", 45)]);
        let outcome = run(&h, Intent::Finalize, "pix", &state).await.unwrap();
        assert_eq!(finalize.call_count(), 0);
        assert!(outcome.order.is_some());
    }

    #[tokio::test]
    async fn test_finalize_clears_order() {
        let finalize = FixedTool::new("finalize_order", ToolScope::Order, json!({"status": "done"}));
        let h = harness(ScriptedModel::new(), vec![finalize.clone()]);
        let mut state = state_with_order(&[("p1", "Calabresa", 45)]);
        state.steps.complete(Step::SelectProducts);
        state.steps.complete(Step::Confirm);
        let outcome = run(&h, Intent::Finalize, "pix", &state).await.unwrap();
        assert_eq!(finalize.call_count(), 1);
        assert!(outcome.order.is_none());
        assert!(outcome.steps.is_done(Step::Finalize));
    }

    #[tokio::test]
    async fn test_personal_info_folds_customer() {
        let update = FixedTool::new(
            "update_customer",
            ToolScope::Customer,
            json!({"customer": {"customer_id": "c-1", "name": "Ana"}}),
        );
        let model = ScriptedModel::new().call_tool("update_customer", json!({"name": "Ana"}));
        let h = harness(model, vec![update]);
        let mut state = ConversationState::new("u1");
        let outcome = run(&h, Intent::PersonalInfo, "meu nome é Ana", &state).await.unwrap();
        assert!(outcome.steps.is_done(Step::PersonalInfo));
        outcome.apply(&mut state);
        assert_eq!(state.customer.name.as_deref(), Some("Ana"));
        assert_eq!(state.customer.customer_id, "c-1");
    }

    #[tokio::test]
    async fn test_tool_error_leaves_state() {
        let failing = FixedTool::failing("update_customer", ToolScope::Customer);
        let model = ScriptedModel::new().call_tool("update_customer", json!({}));
        let h = harness(model, vec![failing]);
        let outcome = run(&h, Intent::Address, "rua A 10", &ConversationState::new("u1"))
            .await
            .unwrap();
        assert!(!outcome.steps.is_done(Step::Address));
        assert!(outcome.customer_payloads.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_propagates() {
        let h = harness(ScriptedModel::new(), vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h
            .dispatcher
            .process(&IntentFragment::new(Intent::General, "oi"), "u1", &ConversationState::new("u1"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_removed_product_id() {
        assert_eq!(removed_product_id(&json!({"removed_product_id": 7})), Some("7".into()));
        assert_eq!(removed_product_id(&json!({"product_id": "p1", "remove": true})), Some("p1".into()));
        assert_eq!(removed_product_id(&json!({"product_id": "p1"})), None);
    }
}
