//! OpenAI-compatible Chat Completions provider
//!
//! Works against any endpoint that speaks the `/chat/completions` protocol
//! (OpenAI, OpenRouter, Groq, Ollama, vLLM...). Responses are requested
//! non-streamed: the orchestrator needs complete tool calls before it can act.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::LanguageModel;
use crate::{
    error::{Error, Result},
    types::{
        AssistantMetadata, CompletionOptions, Content, Context, Message, Model, StopReason, Usage,
    },
};

/// OpenAI-compatible API client
pub struct OpenAiCompatible {
    client: reqwest::Client,
    api_key: String,
    model: Model,
}

impl OpenAiCompatible {
    /// Create a new client for a model with an API key
    pub fn new(api_key: impl Into<String>, model: Model) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model,
        }
    }

    /// Create from the `OPENAI_API_KEY` environment variable
    pub fn from_env(model: Model) -> Result<Self> {
        let api_key = super::get_api_key(None, "OPENAI_API_KEY")?;
        Ok(Self::new(api_key, model))
    }

    /// The model this client talks to
    pub fn model(&self) -> &Model {
        &self.model
    }

    fn build_request(&self, context: &Context, options: &CompletionOptions) -> ChatRequest {
        let mut messages = Vec::new();

        if let Some(ref system_prompt) = context.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system_prompt.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for msg in &context.messages {
            messages.push(convert_message(msg));
        }

        let tools: Option<Vec<ChatTool>> = if context.tools.is_empty() {
            None
        } else {
            Some(
                context
                    .tools
                    .iter()
                    .map(|t| ChatTool {
                        tool_type: "function".to_string(),
                        function: ChatFunction {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                        },
                    })
                    .collect(),
            )
        };

        let has_tools = tools.is_some();
        ChatRequest {
            model: self.model.id.clone(),
            messages,
            max_tokens: Some(options.max_tokens.unwrap_or(self.model.max_tokens)),
            temperature: options.temperature,
            tools,
            tool_choice: has_tools.then(|| serde_json::json!("auto")),
            response_format: options
                .json_mode
                .then(|| serde_json::json!({"type": "json_object"})),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatible {
    async fn complete(&self, context: &Context, options: &CompletionOptions) -> Result<Message> {
        let request = self.build_request(context, options);
        let url = format!("{}/chat/completions", self.model.base_url.trim_end_matches('/'));

        tracing::debug!(model = %self.model.id, tools = context.tools.len(), "chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(Error::RateLimited { retry_after });
        }
        if status.as_u16() == 401 {
            return Err(Error::InvalidApiKey);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), text));
        }

        let body: ChatResponse = response.json().await?;
        convert_response(body, &self.model)
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    match msg {
        Message::User { .. } => ChatMessage {
            role: "user".to_string(),
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant { content, .. } => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for c in content {
                match c {
                    Content::Text { text } => text_parts.push(text.clone()),
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => tool_calls.push(ChatToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: ChatFunctionCall {
                            name: name.clone(),
                            arguments: arguments.to_string(),
                        },
                    }),
                }
            }

            ChatMessage {
                role: "assistant".to_string(),
                content: (!text_parts.is_empty()).then(|| text_parts.join("")),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Message::ToolResult { tool_call_id, .. } => ChatMessage {
            role: "tool".to_string(),
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

fn convert_response(body: ChatResponse, model: &Model) -> Result<Message> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::UnexpectedResponse("response has no choices".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        content.push(Content::text(text));
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        // Providers occasionally send an empty string for no-argument calls
        let arguments = if call.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                Error::UnexpectedResponse(format!(
                    "invalid arguments for tool '{}': {}",
                    call.function.name, e
                ))
            })?
        };
        content.push(Content::tool_call(call.id, call.function.name, arguments));
    }

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("length") => StopReason::Length,
        Some("tool_calls") => StopReason::ToolUse,
        Some("stop") | None => StopReason::Stop,
        Some(_) => StopReason::Error,
    };

    let usage = body
        .usage
        .map(|u| Usage {
            input: u.prompt_tokens,
            output: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(Message::Assistant {
        content,
        metadata: AssistantMetadata {
            model: Some(model.id.clone()),
            usage,
            stop_reason: Some(stop_reason),
            timestamp: chrono::Utc::now().timestamp_millis(),
        },
    })
}

// Request types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

// Response types

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseToolCall {
    id: String,
    function: ChatResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ChatResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
