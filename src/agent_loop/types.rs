//! Core turn types for the agent loop.

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Unique turn identifier.
pub type TurnId = Uuid;

/// Default cap on model calls within one turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Where the loop currently is within a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingModel,
    ExecutingTools,
}

/// Options for an [`AgentLoop`](super::AgentLoop).
#[derive(Debug, Clone, Builder)]
pub struct AgentLoopOptions {
    /// Model calls allowed per turn before it fails.
    #[builder(default = DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: usize,
    /// Deadline for each tool call.
    #[builder(default = Duration::from_secs(60))]
    pub tool_timeout: Duration,
    /// Appended as a system message when the loop is created.
    pub system_prompt: Option<String>,
    /// Extra context, appended as a system message after the prompt.
    pub context: Option<String>,
}

impl Default for AgentLoopOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
