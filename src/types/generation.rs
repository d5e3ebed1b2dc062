//! Sampling settings passed through to the model adapter.

use bon::Builder;
use serde::{Deserialize, Serialize};

/// Settings controlling a single chat completion.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct ChatSettings {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
}
