//! Mock collaborators shared by the unit tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::service::{Generation, ModelService, ToolCall};
use crate::tool::{Tool, ToolResult, ToolScope};

/// Model service that replays canned classifications and generations
#[derive(Default)]
pub struct ScriptedModel {
    pub classifications: Mutex<VecDeque<Result<String>>>,
    pub generations: Mutex<VecDeque<Result<Generation>>>,
    pub classify_inputs: Mutex<Vec<String>>,
    pub instructions: Mutex<Vec<String>>,
    pub offered_tools: Mutex<Vec<Vec<String>>>,
    /// Simulated latency of every call
    pub delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn classify_as(self, raw: &str) -> Self {
        self.classifications.lock().push_back(Ok(raw.to_string()));
        self
    }

    pub fn classify_err(self, error: Error) -> Self {
        self.classifications.lock().push_back(Err(error));
        self
    }

    pub fn generate(self, generation: Generation) -> Self {
        self.generations.lock().push_back(Ok(generation));
        self
    }

    pub fn generate_err(self, error: Error) -> Self {
        self.generations.lock().push_back(Err(error));
        self
    }

    /// Generation that calls one tool
    pub fn call_tool(self, name: &str, arguments: Value) -> Self {
        let n = self.generations.lock().len();
        self.generate(Generation {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("call-{}", n),
                name: name.to_string(),
                arguments,
            }],
        })
    }

    async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn classify(
        &self,
        text: &str,
        _recent_history: &str,
        _state_summary: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.classify_inputs.lock().push(text.to_string());
        self.wait(cancel).await?;
        self.classifications
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("{\"intents\": []}".to_string()))
    }

    async fn generate(
        &self,
        instructions: &str,
        tools: &[comanda_ai::Tool],
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        self.instructions.lock().push(instructions.to_string());
        self.offered_tools
            .lock()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        self.wait(cancel).await?;
        self.generations
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Generation::text("Anything else?")))
    }
}

/// Channel that records every delivered message
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, String)>>,
    /// Simulated delivery latency
    pub delay: Option<Duration>,
}

impl RecordingChannel {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn texts_for(&self, user_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(u, _)| u == user_id)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn send(&self, user_id: &str, text: &str) -> bool {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().push((user_id.to_string(), text.to_string()));
        true
    }
}

/// Tool returning a fixed payload and counting its calls
pub struct FixedTool {
    name: String,
    scope: ToolScope,
    response: Option<Value>,
    pub calls: Mutex<Vec<Value>>,
}

impl FixedTool {
    pub fn new(name: &str, scope: ToolScope, response: Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            scope,
            response: Some(response),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// A tool that always returns an error result
    pub fn failing(name: &str, scope: ToolScope) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            scope,
            response: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Tool for FixedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    fn scope(&self) -> ToolScope {
        self.scope
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        self.calls.lock().push(arguments);
        match self.response {
            Some(ref payload) => ToolResult::json(payload.clone()),
            None => ToolResult::error("backend unavailable"),
        }
    }
}
