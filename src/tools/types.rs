//! Tool descriptors advertised by providers.

use serde::{Deserialize, Serialize};

/// One entry of a provider's tool catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the tool's arguments.
    #[serde(default = "empty_schema", alias = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Descriptor known only by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, String::new(), empty_schema())
    }
}

/// An object schema with no properties.
pub fn empty_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": [],
    })
}
