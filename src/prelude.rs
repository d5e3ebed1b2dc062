//! Convenience re-exports for common use.

pub use crate::agent::{ConversationState, ToolProvider, ToolRouter};
pub use crate::agent_loop::{AgentLoop, AgentLoopOptions, TurnEvent, TurnEventPayload, TurnState};
pub use crate::config::RelayConfig;
pub use crate::error::{RelayError, Result};
pub use crate::protocol::{
    ClientOptions, ConnectionState, FnStreamHandler, ManagedProvider, MemoryTransport,
    ProtocolClient, ProviderRegistry, StdioTransport, StreamHandler, WebSocketTransport,
};
pub use crate::provider::{ModelAdapter, ModelResponse};
pub use crate::tools::{ToolArguments, ToolDescriptor};
pub use crate::types::{ChatSettings, ContentPart, Message, Role, ToolCallRequest, ToolCallResult};

#[cfg(feature = "mcp")]
pub use crate::protocol::McpStdioProvider;
#[cfg(feature = "openai")]
pub use crate::provider::openai::OpenAiChatAdapter;
