//! Turn event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ToolCallRequest, ToolCallResult};

use super::types::TurnId;

/// Concrete event payloads emitted by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEventPayload {
    Started,
    ModelRequested {
        iteration: usize,
    },
    ToolCallStarted {
        call: ToolCallRequest,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    },
    ToolResult {
        result: ToolCallResult,
    },
    Completed {
        content: String,
    },
    Failed {
        error: String,
    },
}

/// Envelope for turn events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub turn_id: TurnId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: TurnEventPayload,
}
