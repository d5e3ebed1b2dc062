//! OpenAI Chat Completions model adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ModelSettings;
use crate::error::RelayError;
use crate::tools::ToolDescriptor;
use crate::types::{ChatSettings, ContentPart, Message, MessageContent, Role, ToolCallRequest};

use super::http::{bearer_headers, shared_client, status_to_error};
use super::{ModelAdapter, ModelResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatAdapter {
    model: String,
    api_key: String,
    base_url: String,
    settings: ChatSettings,
}

impl std::fmt::Debug for OpenAiChatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatAdapter")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl OpenAiChatAdapter {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            settings: ChatSettings::default(),
        }
    }

    /// Build from the `[model]` configuration section.
    pub fn from_settings(settings: &ModelSettings) -> Result<Self, RelayError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RelayError::Configuration("missing OPENAI_API_KEY".into()))?;
        let mut adapter = Self::new(settings.model.clone(), api_key).with_settings(
            ChatSettings::builder()
                .maybe_temperature(settings.temperature)
                .maybe_max_tokens(settings.max_tokens)
                .maybe_top_p(settings.top_p)
                .build(),
        );
        if let Some(base_url) = &settings.base_url {
            adapter = adapter.with_base_url(base_url.clone());
        }
        Ok(adapter)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_settings(mut self, settings: ChatSettings) -> Self {
        self.settings = settings;
        self
    }

    fn build_request_body(&self, history: &[Message], tools: &[ToolDescriptor]) -> Value {
        let messages: Vec<Value> = history.iter().map(message_to_openai).collect();
        let mut body = serde_json::Map::new();
        body.insert("model".into(), self.model.clone().into());
        body.insert("messages".into(), messages.into());

        if let Some(temp) = self.settings.temperature {
            body.insert("temperature".into(), temp.into());
        }
        if let Some(max) = self.settings.max_tokens {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(top_p) = self.settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }
        if !tools.is_empty() {
            let tool_defs: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect();
            body.insert("tools".into(), tool_defs.into());
        }
        Value::Object(body)
    }
}

#[async_trait]
impl ModelAdapter for OpenAiChatAdapter {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        history: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse, RelayError> {
        let body = self.build_request_body(history, tools);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, messages = history.len(), tools = tools.len(), "OpenAI chat");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let data: OpenAiChatResponse = resp
            .json()
            .await
            .map_err(|e| RelayError::Model(format!("unreadable response: {e}")))?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Model("no choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        Ok(ModelResponse {
            content: choice.message.content,
            tool_calls,
        })
    }
}

fn message_to_openai(msg: &Message) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    if msg.role == Role::Tool {
        return json!({
            "role": role,
            "tool_call_id": msg.tool_call_id,
            "content": msg.text(),
        });
    }

    if msg.has_tool_calls() {
        let tool_calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments,
                    }
                })
            })
            .collect();
        let text = msg.text();
        return json!({
            "role": role,
            "content": if text.is_empty() { Value::Null } else { Value::String(text) },
            "tool_calls": tool_calls,
        });
    }

    match &msg.content {
        MessageContent::Text(text) => json!({ "role": role, "content": text }),
        MessageContent::Parts(parts) => {
            let parts: Vec<Value> = parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                    ContentPart::Image(img) => json!({
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{}", img.mime_type, img.data) }
                    }),
                    ContentPart::Audio(audio) => json!({
                        "type": "input_audio",
                        "input_audio": { "data": audio.data, "format": audio.format }
                    }),
                })
                .collect();
            json!({ "role": role, "content": parts })
        }
    }
}

// OpenAI API response types (internal)

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}
