//! Response composer: turns the accumulated turn state into the reply text

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::conversation::{ConversationState, TurnContext};
use crate::error::{Error, Result};
use crate::service::ModelService;
use crate::steps::Step;

/// What the reply should steer the customer toward
pub fn next_action_guidance(next: Option<Step>) -> &'static str {
    match next {
        Some(Step::Greeting) => "Greet the customer warmly.",
        Some(Step::PersonalInfo) => "Ask for the customer's name.",
        Some(Step::Address) => "Ask for the delivery address.",
        Some(Step::CreateOrder) => "Invite the customer to start an order and offer to show the menu.",
        Some(Step::SelectProducts) => "Help the customer choose products from the menu.",
        Some(Step::Confirm) => "Read back the items and the total and ask the customer to confirm.",
        Some(Step::Finalize) => "Ask how the customer wants to pay so the order can be finalized.",
        Some(Step::MenuBrowse) | Some(Step::General) => "Answer the customer's question.",
        None => {
            "Every step is done: thank the customer, give the payment details and say the order is on its way."
        }
    }
}

pub struct ResponseComposer {
    model: Arc<dyn ModelService>,
}

impl ResponseComposer {
    pub fn new(model: Arc<dyn ModelService>) -> Self {
        Self { model }
    }

    pub fn instructions(&self, ctx: &TurnContext, state: &ConversationState, notes: &[String]) -> String {
        let next = state.steps.next_incomplete(state.order_item_count());
        let order = match state.order {
            Some(ref order) => format!(
                "Order {}:\n{}\nTotal: {}",
                order.order_id,
                order.describe_items(),
                order.total
            ),
            None => "No open order.".to_string(),
        };
        let happened = if notes.is_empty() {
            "(nothing)".to_string()
        } else {
            notes.iter().map(|n| format!("- {}", n)).collect::<Vec<_>>().join("\n")
        };
        let history = ctx.history_text();

        format!(
            "You are the ordering assistant of a pizzeria chatting with a customer. \
             Reply in the customer's language, in one short message.\n\n\
             Recent conversation:\n{}\n\n\
             Customer just said:\n{}\n\n\
             What happened this turn:\n{}\n\n\
             Customer: {}\n{}\n\n\
             Next: {}",
            if history.is_empty() { "(none)" } else { history.as_str() },
            ctx.turn.body(),
            happened,
            state.customer.describe(),
            order,
            next_action_guidance(next)
        )
    }

    /// Generate the reply. Failures here are terminal for the turn.
    pub async fn compose(
        &self,
        ctx: &TurnContext,
        state: &ConversationState,
        notes: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let instructions = self.instructions(ctx, state, notes);
        let generation = self.model.generate(&instructions, &[], cancel).await?;
        let reply = generation.text.trim();
        if reply.is_empty() {
            return Err(Error::Other("model returned an empty reply".to_string()));
        }
        Ok(reply.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use crate::service::Generation;
    use crate::testing::ScriptedModel;

    fn context(state: &ConversationState) -> TurnContext {
        TurnContext {
            turn: Turn::new("u1", vec!["oi".into()]),
            state: state.clone(),
            history: Vec::new(),
        }
    }

    #[test]
    fn test_guidance_follows_next_step() {
        let composer = ResponseComposer::new(Arc::new(ScriptedModel::new()));
        let mut state = ConversationState::new("u1");
        let text = composer.instructions(&context(&state), &state, &[]);
        assert!(text.contains("Greet the customer"));

        for step in Step::REQUIRED {
            state.steps.complete(step);
        }
        let text = composer.instructions(&context(&state), &state, &["Order o-1 finalized.".into()]);
        assert!(text.contains("thank the customer"));
        assert!(text.contains("- Order o-1 finalized."));
    }

    #[tokio::test]
    async fn test_compose_returns_trimmed_text() {
        let model = ScriptedModel::new().generate(Generation::text("  Olá! Qual o seu nome?  "));
        let composer = ResponseComposer::new(Arc::new(model));
        let state = ConversationState::new("u1");
        let reply = composer
            .compose(&context(&state), &state, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "Olá! Qual o seu nome?");
    }

    #[tokio::test]
    async fn test_empty_reply_is_an_error() {
        let model = ScriptedModel::new().generate(Generation::text("   "));
        let composer = ResponseComposer::new(Arc::new(model));
        let state = ConversationState::new("u1");
        assert!(
            composer
                .compose(&context(&state), &state, &[], &CancellationToken::new())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_composer_offers_no_tools() {
        let model = Arc::new(ScriptedModel::new());
        let composer = ResponseComposer::new(model.clone());
        let state = ConversationState::new("u1");
        composer
            .compose(&context(&state), &state, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(model.offered_tools.lock()[0].is_empty());
    }
}
