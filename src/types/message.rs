//! Message types exchanged with the model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Tool calls requested by the model, in the order it issued them (assistant only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// The request this message answers (tool only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    fn with_role(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, MessageContent::Text(text.into()))
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, MessageContent::Text(text.into()))
    }

    /// Create a user message from multimodal parts.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::with_role(Role::User, MessageContent::Parts(parts))
    }

    /// Create a plain assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// Create an assistant message that carries tool calls.
    ///
    /// Absent content is stored as empty text.
    pub fn assistant_with_tool_calls(
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        let mut message = Self::with_role(
            Role::Assistant,
            MessageContent::Text(content.unwrap_or_default()),
        );
        message.tool_calls = tool_calls;
        message
    }

    /// Create a tool result message.
    pub fn tool_result(result: ToolCallResult) -> Self {
        let mut message = Self::with_role(Role::Tool, MessageContent::Text(result.content));
        message.tool_call_id = Some(result.tool_call_id);
        message
    }

    /// Extract the text content, concatenating all text parts.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Conversation role.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message body: plain text or multimodal parts.
///
/// Parts are round-tripped to the model adapter untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single part of multimodal content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image(ImageContent),
    Audio(AudioContent),
}

/// Base64 image embedded in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageContent {
    pub data: String,
    pub mime_type: String,
}

/// Base64 audio embedded in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioContent {
    pub data: String,
    pub format: String,
}

/// A tool call requested by the model.
///
/// `arguments` is the raw string the model produced; it is parsed only at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// The outcome of one tool call, as fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn tool_result_message_carries_back_reference() {
        let message = Message::tool_result(ToolCallResult::failure("t1", "Tool not found: x"));
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("t1"));
        assert_eq!(message.text(), "Tool not found: x");
        assert!(!message.has_tool_calls());
    }

    #[test]
    fn multimodal_parts_round_trip_through_serde() {
        let message = Message::user_parts(vec![
            ContentPart::Text {
                text: "what is this?".into(),
            },
            ContentPart::Image(ImageContent {
                data: "aGVsbG8=".into(),
                mime_type: "image/png".into(),
            }),
        ]);

        let value = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][1]["type"], "image");

        let back: Message = serde_json::from_value(value).expect("message should deserialize");
        assert_eq!(back, message);
        assert_eq!(back.text(), "what is this?");
    }

    #[test]
    fn plain_text_content_serializes_as_string() {
        let message = Message::assistant("hi");
        let value = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(value["content"], json!("hi"));
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn role_parses_from_lowercase() {
        assert_eq!("tool".parse::<Role>().ok(), Some(Role::Tool));
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }
}
