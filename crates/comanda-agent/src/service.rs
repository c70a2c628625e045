//! Model service seam: intent classification and tool-bound generation

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use comanda_ai::{CompletionOptions, Context, LanguageModel, Message};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::RetrySettings;
use crate::error::{Error, Result};
use crate::intent::Intent;

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of a generation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn from_message(message: &Message) -> Self {
        Self {
            text: message.text(),
            tool_calls: message
                .tool_calls()
                .into_iter()
                .map(|(id, name, arguments)| ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.clone(),
                })
                .collect(),
        }
    }
}

/// Language-model operations the pipeline consumes
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Classify a turn into intents. Returns the raw model output, which may
    /// be fenced JSON.
    async fn classify(
        &self,
        text: &str,
        recent_history: &str,
        state_summary: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Generate text, possibly requesting calls to the given tools
    async fn generate(
        &self,
        instructions: &str,
        tools: &[comanda_ai::Tool],
        cancel: &CancellationToken,
    ) -> Result<Generation>;
}

/// Run `fut` with a deadline, abandoning it when `cancel` fires
pub async fn guarded<T, F>(
    operation: &'static str,
    after: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = tokio::time::timeout(after, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout { operation, after }),
        },
    }
}

fn classifier_prompt() -> String {
    format!(
        "You classify customer messages sent to a pizzeria ordering assistant.\n\
         Split the message into the separate things the customer wants, in the order they were said.\n\
         Allowed intents: {}.\n\
         Respond with JSON only: {{\"intents\": [{{\"intent\": \"<intent>\", \"action\": \"<the part of the message for this intent>\"}}]}}",
        Intent::vocabulary().join(", ")
    )
}

/// [`ModelService`] over any [`LanguageModel`], with retry, timeout and cancellation
pub struct ProviderService {
    model: Arc<dyn LanguageModel>,
    retry: RetrySettings,
    timeout: Duration,
    temperature: Option<f32>,
}

impl ProviderService {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            retry: RetrySettings::default(),
            timeout: Duration::from_secs(30),
            temperature: Some(0.2),
        }
    }

    /// Set retry configuration
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline for each provider request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    async fn complete(
        &self,
        context: &Context,
        options: &CompletionOptions,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let mut attempt = 0u32;
        loop {
            let call = async {
                self.model
                    .complete(context, options)
                    .await
                    .map_err(Error::from)
            };
            match guarded("model call", self.timeout, cancel, call).await {
                Ok(message) => return Ok(message),
                Err(Error::Ai(e)) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.retry.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ModelService for ProviderService {
    async fn classify(
        &self,
        text: &str,
        recent_history: &str,
        state_summary: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let history = if recent_history.is_empty() {
            "(none)"
        } else {
            recent_history
        };
        let mut context = Context::with_system(classifier_prompt());
        context.push(Message::user(format!(
            "Recent conversation:\n{}\n\nConversation state:\n{}\n\nCustomer message:\n{}",
            history, state_summary, text
        )));
        let options = CompletionOptions {
            temperature: Some(0.0),
            json_mode: true,
            ..Default::default()
        };
        let message = self.complete(&context, &options, cancel).await?;
        Ok(message.text())
    }

    async fn generate(
        &self,
        instructions: &str,
        tools: &[comanda_ai::Tool],
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        let mut context = Context::with_system(instructions).with_tools(tools.to_vec());
        context.push(Message::user("Carry out the instructions above."));
        let options = CompletionOptions {
            temperature: self.temperature,
            ..Default::default()
        };
        let message = self.complete(&context, &options, cancel).await?;
        Ok(Generation::from_message(&message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comanda_ai::Content;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Mock model that replays canned results
    struct MockModel {
        responses: Mutex<VecDeque<comanda_ai::Result<Message>>>,
        calls: Mutex<Vec<Context>>,
        delay: Option<Duration>,
    }

    impl MockModel {
        fn new(responses: Vec<comanda_ai::Result<Message>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new(vec![Ok(Message::assistant(vec![Content::text("late")]))])
            }
        }
    }

    #[async_trait]
    impl LanguageModel for MockModel {
        async fn complete(
            &self,
            context: &Context,
            _options: &CompletionOptions,
        ) -> comanda_ai::Result<Message> {
            self.calls.lock().push(context.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(comanda_ai::Error::UnexpectedResponse("no more responses".into())))
        }
    }

    fn reply(text: &str) -> comanda_ai::Result<Message> {
        Ok(Message::assistant(vec![Content::text(text)]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_then_succeeds() {
        let model = Arc::new(MockModel::new(vec![
            Err(comanda_ai::Error::RateLimited { retry_after: None }),
            reply("{\"intents\": []}"),
        ]));
        let service = ProviderService::new(model.clone());
        let raw = service
            .classify("oi", "", "none", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(raw, "{\"intents\": []}");
        assert_eq!(model.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned() {
        let model = Arc::new(MockModel::new(vec![Err(comanda_ai::Error::InvalidApiKey)]));
        let service = ProviderService::new(model.clone());
        let err = service
            .generate("say hi", &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ai(comanda_ai::Error::InvalidApiKey)));
        assert_eq!(model.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let service = ProviderService::new(Arc::new(MockModel::slow(Duration::from_secs(60))))
            .with_timeout(Duration::from_secs(5));
        let err = service
            .generate("say hi", &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let model = Arc::new(MockModel::new(vec![reply("hi")]));
        let service = ProviderService::new(model);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service.generate("say hi", &[], &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_generate_extracts_tool_calls() {
        let model = Arc::new(MockModel::new(vec![Ok(Message::assistant(vec![
            Content::text("adding"),
            Content::tool_call("c1", "add_item_to_order", serde_json::json!({"product_id": "p1"})),
        ]))]));
        let service = ProviderService::new(model.clone());
        let tools = vec![comanda_ai::Tool::new(
            "add_item_to_order",
            "Add an item",
            serde_json::json!({"type": "object"}),
        )];
        let generation = service
            .generate("add the pizza", &tools, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(generation.text, "adding");
        assert_eq!(generation.tool_calls[0].name, "add_item_to_order");
        assert_eq!(model.calls.lock()[0].tools.len(), 1);
        assert_eq!(model.calls.lock()[0].system_prompt.as_deref(), Some("add the pizza"));
    }

    #[tokio::test]
    async fn test_classify_prompt_lists_vocabulary() {
        let model = Arc::new(MockModel::new(vec![reply("[]")]));
        let service = ProviderService::new(model.clone());
        service
            .classify("quero uma pizza", "customer: oi", "completed steps: none", &CancellationToken::new())
            .await
            .unwrap();
        let calls = model.calls.lock();
        let system = calls[0].system_prompt.clone().unwrap();
        assert!(system.contains("select_products"));
        assert!(calls[0].messages[0].text().contains("quero uma pizza"));
    }
}
