//! Parsing for model-issued tool arguments.

use serde_json::Value;

use crate::error::RelayError;

/// Tool call arguments, validated as a JSON object.
///
/// The model hands arguments over as a raw string; [`ToolArguments::parse`] turns that into a
/// JSON object before anything is sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    /// Parse a raw argument string.
    ///
    /// Empty or whitespace-only input means "no arguments" and yields `{}`. Anything else must be
    /// a JSON object.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self {
                value: Value::Object(Default::default()),
            });
        }
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| RelayError::Parse(format!("tool arguments must be valid JSON: {e}")))?;
        match value {
            Value::Object(_) => Ok(Self { value }),
            other => Err(RelayError::Parse(format!(
                "tool arguments must be a JSON object; got {other}"
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}
