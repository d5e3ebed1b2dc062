//! JSON wire messages exchanged with a tool provider.
//!
//! Every frame is one JSON object whose `type` field selects the message kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::tools::ToolDescriptor;

/// Reserved tool name used by the handshake to fetch a provider's catalog.
pub const LIST_TOOLS: &str = "mcp_system_list_tools";

/// Messages sent from the client to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    ToolCall {
        request_id: String,
        tool_name: String,
        parameters: Value,
    },
    StreamToolCall {
        stream_id: String,
        tool_name: String,
        parameters: Value,
    },
    CancelStream {
        stream_id: String,
    },
    Heartbeat,
}

impl Outbound {
    pub fn to_frame(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    ToolResponse {
        request_id: String,
        #[serde(default)]
        result: Value,
    },
    StreamData {
        stream_id: String,
        #[serde(default)]
        data: Value,
    },
    StreamEnd {
        stream_id: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<String>,
        #[serde(default)]
        error: Value,
    },
    HeartbeatAck,
    #[serde(other)]
    Unknown,
}

impl Inbound {
    pub fn to_frame(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode one inbound frame.
pub fn decode(frame: &str) -> Result<Inbound, RelayError> {
    serde_json::from_str(frame).map_err(|e| RelayError::Parse(format!("malformed frame: {e}")))
}

/// Render a provider-supplied error payload as text.
pub fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        Value::Null => "provider reported an error".into(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogEntry {
    Name(String),
    Descriptor(ToolDescriptor),
}

/// Extract a tool catalog from a handshake result of the form `{"tools": [...]}`.
///
/// Entries may be full descriptors or bare tool names.
pub fn parse_catalog(result: &Value) -> Result<Vec<ToolDescriptor>, RelayError> {
    let entries = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| RelayError::Parse("handshake result has no 'tools' array".into()))?;

    entries
        .iter()
        .map(|entry| {
            serde_json::from_value::<CatalogEntry>(entry.clone())
                .map(|entry| match entry {
                    CatalogEntry::Name(name) => ToolDescriptor::named(name),
                    CatalogEntry::Descriptor(descriptor) => descriptor,
                })
                .map_err(|e| RelayError::Parse(format!("invalid catalog entry {entry}: {e}")))
        })
        .collect()
}
