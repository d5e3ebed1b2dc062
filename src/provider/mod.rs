//! Model adapter trait and implementations.

pub mod http;

#[cfg(feature = "openai")]
pub mod openai;

use async_trait::async_trait;

use crate::error::RelayError;
use crate::tools::ToolDescriptor;
use crate::types::{Message, ToolCallRequest};

/// One model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: Option<String>,
    /// Requested tool calls, in the order the model issued them.
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelResponse {
    /// A final answer with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }
}

/// Bridge to a tool-calling language model.
///
/// Implementations must not reorder `history`. The agent loop appends the
/// returned reply to the conversation itself.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Identifier of the underlying model, for logs.
    fn model_id(&self) -> &str;

    async fn chat(
        &self,
        history: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse, RelayError>;
}
