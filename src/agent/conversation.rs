//! Conversation message history.

use std::collections::HashSet;

use crate::types::{Message, Role, ToolCallRequest, ToolCallResult};

/// Append-only message history of one conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_system(&mut self, text: impl Into<String>) {
        self.messages.push(Message::system(text));
    }

    /// Append a user message that may carry multimodal parts.
    pub fn push_user_message(&mut self, message: Message) {
        debug_assert_eq!(message.role, Role::User);
        self.messages.push(message);
    }

    /// Append the model's reply, with the tool calls it requested.
    pub fn push_assistant(&mut self, content: Option<String>, tool_calls: Vec<ToolCallRequest>) {
        if tool_calls.is_empty() {
            self.messages
                .push(Message::assistant(content.unwrap_or_default()));
        } else {
            self.messages
                .push(Message::assistant_with_tool_calls(content, tool_calls));
        }
    }

    pub fn push_tool_result(&mut self, result: ToolCallResult) {
        self.messages.push(Message::tool_result(result));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Ids of tool calls in the latest assistant message that have no result yet.
    pub fn unanswered_tool_calls(&self) -> Vec<String> {
        let Some(position) = self
            .messages
            .iter()
            .rposition(|message| message.role == Role::Assistant)
        else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.messages[position + 1..]
            .iter()
            .filter_map(|message| message.tool_call_id.as_deref())
            .collect();
        self.messages[position]
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .map(|call| call.id.clone())
            .collect()
    }

    /// Answer every unanswered tool call with an error result carrying
    /// `content`. Returns how many results were appended.
    pub fn fail_unanswered_tool_calls(&mut self, content: &str) -> usize {
        let unanswered = self.unanswered_tool_calls();
        for id in &unanswered {
            self.push_tool_result(ToolCallResult::failure(id, content));
        }
        unanswered.len()
    }
}
