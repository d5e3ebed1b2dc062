//! Conversation history and tool routing for the agent loop.

pub mod conversation;
pub mod router;

pub use conversation::ConversationState;
pub use router::{ToolProvider, ToolRouter};
