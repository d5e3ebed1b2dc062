//! Error types for toolrelay.

use thiserror::Error;

/// Broad error category used to decide how a failure travels through a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Timeout,
    ToolExecution,
    Parse,
    Closed,
    Model,
    Configuration,
    Unknown,
}

/// Primary error type for all toolrelay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Connection error ({provider}): {message}")]
    Connection { provider: String, message: String },

    #[error("Provider '{0}' is not connected")]
    NotConnected(String),

    #[error("Tool '{tool_name}' timed out after {timeout_ms}ms")]
    ToolTimeout { tool_name: String, timeout_ms: u64 },

    #[error("Tool '{tool_name}' failed: {message}")]
    ToolError { tool_name: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Create a connection error for the named provider.
    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a provider-reported tool failure.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolError {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } | Self::NotConnected(_) | Self::Io(_) => {
                ErrorCategory::Connection
            }
            Self::ToolTimeout { .. } => ErrorCategory::Timeout,
            Self::ToolError { .. } => ErrorCategory::ToolExecution,
            Self::Parse(_) | Self::Serialization(_) => ErrorCategory::Parse,
            Self::Closed(_) => ErrorCategory::Closed,
            Self::Model(_) | Self::Network(_) => ErrorCategory::Model,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether the agent loop folds this error into history instead of failing the turn.
    ///
    /// Only tool-dispatch failures qualify; model and setup failures always surface.
    pub fn is_recoverable_in_turn(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection
                | ErrorCategory::Timeout
                | ErrorCategory::ToolExecution
                | ErrorCategory::Parse
                | ErrorCategory::Closed
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RelayError>;
