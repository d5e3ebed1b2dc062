//! Routes model-requested tool calls to the provider that advertises them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::RelayError;
use crate::tools::{ToolArguments, ToolDescriptor};
use crate::types::{ToolCallRequest, ToolCallResult};

/// A source of callable tools as seen by the router.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Cached tool catalog.
    fn catalog(&self) -> Vec<ToolDescriptor>;

    fn provides(&self, tool_name: &str) -> bool {
        self.catalog().iter().any(|tool| tool.name == tool_name)
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, RelayError>;
}

/// First-match tool router over an ordered list of providers.
///
/// The router never connects or closes providers.
#[derive(Clone, Default)]
pub struct ToolRouter {
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ToolRouter")
            .field("providers", &names)
            .finish()
    }
}

impl ToolRouter {
    pub fn new(providers: Vec<Arc<dyn ToolProvider>>) -> Self {
        let router = Self { providers };
        router.warn_on_collisions();
        router
    }

    /// Append a provider at the lowest routing priority.
    pub fn push(&mut self, provider: Arc<dyn ToolProvider>) {
        self.providers.push(provider);
        self.warn_on_collisions();
    }

    pub fn providers(&self) -> &[Arc<dyn ToolProvider>] {
        &self.providers
    }

    /// Tool names advertised by more than one provider, with the providers in
    /// routing order.
    pub fn collisions(&self) -> Vec<(String, Vec<String>)> {
        let mut owners: Vec<(String, Vec<String>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for provider in &self.providers {
            for tool in provider.catalog() {
                match index.get(&tool.name) {
                    Some(&slot) => owners[slot].1.push(provider.name().to_string()),
                    None => {
                        index.insert(tool.name.clone(), owners.len());
                        owners.push((tool.name, vec![provider.name().to_string()]));
                    }
                }
            }
        }
        owners.retain(|(_, providers)| providers.len() > 1);
        owners
    }

    fn warn_on_collisions(&self) {
        for (tool, providers) in self.collisions() {
            warn!(
                tool = %tool,
                providers = ?providers,
                winner = %providers[0],
                "tool advertised by several providers; first registered wins"
            );
        }
    }

    /// All catalogs flattened in registration order. Duplicates are kept.
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.providers
            .iter()
            .flat_map(|provider| provider.catalog())
            .collect()
    }

    /// The provider that would receive a call to `tool_name`.
    pub fn route(&self, tool_name: &str) -> Option<&Arc<dyn ToolProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.provides(tool_name))
    }

    /// Execute one tool call. Every failure becomes an error result.
    pub async fn dispatch(&self, call: &ToolCallRequest, timeout: Duration) -> ToolCallResult {
        let Some(provider) = self.route(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "no provider offers tool");
            return ToolCallResult::failure(&call.id, format!("Tool not found: {}", call.name));
        };

        let arguments = match ToolArguments::parse(&call.arguments) {
            Ok(arguments) => arguments,
            Err(error) => {
                warn!(tool = %call.name, call_id = %call.id, error = %error, "invalid tool arguments");
                return ToolCallResult::failure(
                    &call.id,
                    format!("Invalid JSON arguments: {error}"),
                );
            }
        };

        debug!(tool = %call.name, call_id = %call.id, provider = %provider.name(), "dispatching tool call");
        match provider
            .invoke(&call.name, arguments.into_value(), timeout)
            .await
        {
            Ok(value) => ToolCallResult::success(&call.id, render_result(&value)),
            Err(error) => {
                if error.is_recoverable_in_turn() {
                    warn!(tool = %call.name, call_id = %call.id, provider = %provider.name(), error = %error, "tool call failed");
                } else {
                    error!(tool = %call.name, call_id = %call.id, provider = %provider.name(), error = %error, "tool provider returned an unexpected error");
                }
                ToolCallResult::failure(&call.id, format!("Error: {error}"))
            }
        }
    }
}

/// Render a tool result as text for the model.
///
/// Text blocks of a `{"content": [{"type": "text", ...}]}` result are joined;
/// strings are used verbatim; anything else is compact JSON.
pub fn render_result(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Object(map) => {
            let texts: Option<Vec<&str>> = map
                .get("content")
                .and_then(Value::as_array)
                .filter(|blocks| !blocks.is_empty())
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|block| block.get("text").and_then(Value::as_str))
                        .collect()
                });
            match texts {
                Some(texts) if !texts.is_empty() => texts.join("\n"),
                _ => value.to_string(),
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockProvider {
        name: String,
        tools: Vec<ToolDescriptor>,
        calls: Mutex<Vec<(String, Value)>>,
        outcome: Result<Value, String>,
    }

    impl MockProvider {
        fn new(name: &str, tools: &[&str]) -> Arc<Self> {
            Self::with_outcome(name, tools, Ok(json!(format!("{name} ok"))))
        }

        fn with_outcome(name: &str, tools: &[&str], outcome: Result<Value, String>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                tools: tools.iter().map(|tool| ToolDescriptor::named(*tool)).collect(),
                calls: Mutex::new(Vec::new()),
                outcome,
            })
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl ToolProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn catalog(&self) -> Vec<ToolDescriptor> {
            self.tools.clone()
        }

        async fn invoke(
            &self,
            tool_name: &str,
            arguments: Value,
            _timeout: Duration,
        ) -> Result<Value, RelayError> {
            self.calls
                .lock()
                .expect("lock")
                .push((tool_name.to_string(), arguments));
            self.outcome
                .clone()
                .map_err(|message| RelayError::tool(tool_name, message))
        }
    }

    fn router(providers: &[Arc<MockProvider>]) -> ToolRouter {
        ToolRouter::new(
            providers
                .iter()
                .map(|p| p.clone() as Arc<dyn ToolProvider>)
                .collect(),
        )
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn routes_to_only_owner() {
        let a = MockProvider::new("a", &["search"]);
        let b = MockProvider::new("b", &["get_weather"]);
        let router = router(&[a.clone(), b.clone()]);

        let result = router
            .dispatch(
                &ToolCallRequest::new("t1", "get_weather", r#"{"city":"北京"}"#),
                TIMEOUT,
            )
            .await;

        assert_eq!(result, ToolCallResult::success("t1", "b ok"));
        assert!(a.calls().is_empty());
        assert_eq!(
            b.calls(),
            vec![("get_weather".to_string(), json!({"city": "北京"}))]
        );
    }

    #[tokio::test]
    async fn first_registered_wins_on_collision() {
        let a = MockProvider::new("a", &["search"]);
        let b = MockProvider::new("b", &["search"]);
        let router = router(&[a.clone(), b.clone()]);

        assert_eq!(
            router.route("search").map(|p| p.name().to_string()),
            Some("a".to_string())
        );
        assert_eq!(
            router.collisions(),
            vec![("search".to_string(), vec!["a".to_string(), "b".to_string()])]
        );

        router
            .dispatch(&ToolCallRequest::new("t1", "search", "{}"), TIMEOUT)
            .await;
        assert_eq!(a.calls().len(), 1);
        assert!(b.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_is_not_dispatched() {
        let a = MockProvider::new("a", &["search"]);
        let router = router(&[a.clone()]);

        let result = router
            .dispatch(&ToolCallRequest::new("t9", "send_email", "{}"), TIMEOUT)
            .await;

        assert!(result.is_error);
        assert_eq!(result.content, "Tool not found: send_email");
        assert!(a.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_arguments_become_error_result() {
        let a = MockProvider::new("a", &["search"]);
        let router = router(&[a.clone()]);

        let result = router
            .dispatch(&ToolCallRequest::new("t1", "search", "{not json"), TIMEOUT)
            .await;

        assert!(result.is_error);
        assert!(result.content.starts_with("Invalid JSON arguments:"));
        assert!(a.calls().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_becomes_error_result() {
        let a = MockProvider::with_outcome("a", &["search"], Err("quota exceeded".into()));
        let router = router(&[a]);

        let result = router
            .dispatch(&ToolCallRequest::new("t1", "search", ""), TIMEOUT)
            .await;

        assert!(result.is_error);
        assert!(result.content.starts_with("Error: "));
        assert!(result.content.contains("quota exceeded"));
    }

    #[test]
    fn catalog_flattens_in_registration_order() {
        let a = MockProvider::new("a", &["search", "fetch"]);
        let b = MockProvider::new("b", &["get_weather", "search"]);
        let names: Vec<String> = router(&[a, b])
            .catalog()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert_eq!(names, vec!["search", "fetch", "get_weather", "search"]);
    }

    #[test]
    fn renders_results_as_text() {
        assert_eq!(render_result(&json!("今天北京晴天")), "今天北京晴天");
        assert_eq!(render_result(&json!({"temp": 21})), r#"{"temp":21}"#);
        assert_eq!(render_result(&json!(3)), "3");
        assert_eq!(render_result(&Value::Null), "");
        assert_eq!(
            render_result(&json!({
                "content": [
                    {"type": "text", "text": "line one"},
                    {"type": "image", "data": "..."},
                    {"type": "text", "text": "line two"}
                ]
            })),
            "line one\nline two"
        );
    }
}
