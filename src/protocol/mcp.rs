//! Tool provider backed by a Model Context Protocol server on child-process stdio.
//!
//! Local servers launched through `npx` or `uv` speak MCP rather than the
//! relay's frame protocol; this adapter drives them through `rmcp` and exposes
//! the same [`ToolProvider`] surface the router expects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, ClientInfo, Content, ProtocolVersion};
use rmcp::service::{ClientInitializeError, DynService, RoleClient, RunningService, ServiceError};
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::agent::router::ToolProvider;
use crate::error::RelayError;
use crate::tools::ToolDescriptor;

type McpSession = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An MCP server spawned as a child process and spoken to over its stdio.
pub struct McpStdioProvider {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    handshake_timeout: Duration,
    session: StdMutex<Option<Arc<McpSession>>>,
    catalog: RwLock<Vec<ToolDescriptor>>,
}

impl std::fmt::Debug for McpStdioProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpStdioProvider")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl McpStdioProvider {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env: HashMap::new(),
            handshake_timeout: Duration::from_secs(30),
            session: StdMutex::new(None),
            catalog: RwLock::new(Vec::new()),
        }
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// Bound on spawning the server, the initialize exchange and tool listing.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> String {
        if self.args.is_empty() {
            format!("mcp-stdio:{}", self.command)
        } else {
            format!("mcp-stdio:{} {}", self.command, self.args.join(" "))
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|session| !session.is_closed())
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|tool| tool.name == tool_name)
    }

    /// Spawn the server, run the MCP initialize exchange and cache its tools.
    ///
    /// A live session is replaced.
    pub async fn connect(&self) -> Result<(), RelayError> {
        if let Some(previous) = lock(&self.session).take() {
            debug!(provider = %self.name, "replacing previous MCP session");
            drop(previous);
        }

        let mut command = Command::new(&self.command);
        command.args(&self.args).envs(&self.env);
        let transport = TokioChildProcess::new(command).map_err(|e| {
            RelayError::connection(&self.name, format!("failed to spawn '{}': {e}", self.command))
        })?;

        let handshake = async {
            let client_info = ClientInfo {
                protocol_version: ProtocolVersion::LATEST,
                ..Default::default()
            };
            let session = client_info
                .into_dyn()
                .serve(transport)
                .await
                .map_err(|e| initialize_error(&self.name, e))?;
            let tools = session.list_all_tools().await.map_err(|e| {
                RelayError::connection(&self.name, format!("tool listing failed: {e}"))
            })?;
            Ok::<_, RelayError>((session, tools))
        };
        let (session, tools) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                RelayError::connection(
                    &self.name,
                    format!(
                        "MCP handshake timed out after {}ms",
                        self.handshake_timeout.as_millis()
                    ),
                )
            })??;

        let catalog: Vec<ToolDescriptor> = tools.into_iter().map(descriptor_from_mcp).collect();
        info!(provider = %self.name, tools = catalog.len(), "MCP provider connected");
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
        *lock(&self.session) = Some(Arc::new(session));
        Ok(())
    }

    /// Invoke one tool on the server.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, RelayError> {
        let session = lock(&self.session)
            .clone()
            .ok_or_else(|| RelayError::NotConnected(self.name.clone()))?;
        let arguments = match arguments {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                return Err(RelayError::Parse(format!(
                    "tool arguments must be a JSON object; got {other}"
                )))
            }
        };

        let request = CallToolRequestParams {
            meta: None,
            name: tool_name.to_owned().into(),
            arguments,
            task: None,
        };
        let result = match tokio::time::timeout(timeout, session.call_tool(request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => return Err(service_error(&self.name, tool_name, error)),
            Err(_) => {
                warn!(provider = %self.name, tool = %tool_name, "MCP tool call timed out");
                return Err(RelayError::ToolTimeout {
                    tool_name: tool_name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };
        result_value(tool_name, result)
    }

    /// End the session and stop the server process. Idempotent.
    pub async fn close(&self) -> Result<(), RelayError> {
        let Some(session) = lock(&self.session).take() else {
            return Ok(());
        };
        self.catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        match Arc::try_unwrap(session) {
            Ok(session) => {
                if let Err(e) = session.cancel().await {
                    warn!(provider = %self.name, error = %e, "MCP session did not shut down cleanly");
                }
            }
            // In-flight calls hold the remaining references; the session ends when they drop.
            Err(shared) => drop(shared),
        }
        info!(provider = %self.name, "MCP provider closed");
        Ok(())
    }
}

#[async_trait]
impl ToolProvider for McpStdioProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn catalog(&self) -> Vec<ToolDescriptor> {
        self.tools()
    }

    fn provides(&self, tool_name: &str) -> bool {
        self.has_tool(tool_name)
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, RelayError> {
        self.call_tool(tool_name, arguments, timeout).await
    }
}

fn descriptor_from_mcp(tool: rmcp::model::Tool) -> ToolDescriptor {
    ToolDescriptor::new(
        tool.name.to_string(),
        tool.description.map(|d| d.to_string()).unwrap_or_default(),
        Value::Object((*tool.input_schema).clone()),
    )
}

fn text_content(content: &[Content]) -> Option<String> {
    let lines: Vec<String> = content
        .iter()
        .filter_map(|item| item.as_text().map(|text| text.text.clone()))
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Structured content wins, then joined text, then the raw content list.
fn result_value(tool_name: &str, result: CallToolResult) -> Result<Value, RelayError> {
    let text = text_content(&result.content);
    if result.is_error.unwrap_or(false) {
        let message = result
            .structured_content
            .as_ref()
            .map(Value::to_string)
            .or(text)
            .unwrap_or_else(|| "tool reported an error".into());
        return Err(RelayError::tool(tool_name, message));
    }
    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }
    if let Some(text) = text {
        return Ok(Value::String(text));
    }
    Ok(Value::Array(
        result
            .content
            .iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect(),
    ))
}

fn initialize_error(provider: &str, error: ClientInitializeError) -> RelayError {
    let message = match error {
        ClientInitializeError::ConnectionClosed(context) => {
            format!("server closed during initialize: {context}")
        }
        ClientInitializeError::JsonRpcError(error) => {
            format!("initialize rejected ({}): {}", error.code.0, error.message)
        }
        other => format!("initialize failed: {other}"),
    };
    RelayError::connection(provider, message)
}

fn service_error(provider: &str, tool_name: &str, error: ServiceError) -> RelayError {
    match error {
        ServiceError::TransportClosed => RelayError::Closed(format!("{provider}: MCP server exited")),
        ServiceError::TransportSend(error) => {
            RelayError::Closed(format!("{provider}: MCP transport send failed: {error}"))
        }
        ServiceError::Cancelled { reason } => RelayError::Closed(format!(
            "{provider}: MCP request cancelled{}",
            reason.map(|r| format!(" ({r})")).unwrap_or_default()
        )),
        ServiceError::McpError(error) => RelayError::tool(
            tool_name,
            format!("MCP error {}: {}", error.code.0, error.message),
        ),
        other => RelayError::tool(tool_name, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn maps_mcp_tool_into_descriptor() {
        let schema = json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"],
        });
        let Value::Object(schema) = schema.clone() else {
            panic!("schema literal is an object");
        };
        let tool = rmcp::model::Tool::new("fetch", "Fetch a URL", schema);
        let descriptor = descriptor_from_mcp(tool);
        assert_eq!(descriptor.name, "fetch");
        assert_eq!(descriptor.description, "Fetch a URL");
        assert_eq!(descriptor.input_schema["required"], json!(["url"]));
    }

    #[test]
    fn text_results_are_joined() {
        let result = CallToolResult::success(vec![Content::text("line one"), Content::text("line two")]);
        assert_eq!(
            result_value("fetch", result).expect("success"),
            json!("line one\nline two")
        );
    }

    #[test]
    fn structured_content_takes_precedence() {
        let mut result = CallToolResult::success(vec![Content::text("22C")]);
        result.structured_content = Some(json!({"temperature": 22}));
        assert_eq!(
            result_value("get_weather", result).expect("success"),
            json!({"temperature": 22})
        );
    }

    #[test]
    fn error_results_become_tool_errors() {
        let result = CallToolResult::error(vec![Content::text("city not found")]);
        let err = result_value("get_weather", result).expect_err("error result");
        assert!(matches!(
            err,
            RelayError::ToolError { tool_name, message }
                if tool_name == "get_weather" && message == "city not found"
        ));
    }

    #[test]
    fn closed_transport_maps_to_closed() {
        let err = service_error("fetch", "fetch", ServiceError::TransportClosed);
        assert!(matches!(err, RelayError::Closed(message) if message.contains("fetch")));
    }

    #[test]
    fn endpoint_names_the_command() {
        let provider = McpStdioProvider::new("fetch", "uv", vec!["run".into(), "mcp-server-fetch".into()]);
        assert_eq!(provider.endpoint(), "mcp-stdio:uv run mcp-server-fetch");
        assert!(!provider.is_connected());
    }

    #[tokio::test]
    async fn call_before_connect_is_not_connected() {
        let provider = McpStdioProvider::new("fetch", "uv", Vec::new());
        let err = provider
            .call_tool("fetch", json!({}), Duration::from_secs(1))
            .await
            .expect_err("no session");
        assert!(matches!(err, RelayError::NotConnected(name) if name == "fetch"));
        provider.close().await.expect("closing an idle provider");
    }

    #[tokio::test]
    async fn missing_executable_is_a_connection_error() {
        let provider = McpStdioProvider::new(
            "ghost",
            "/nonexistent/toolrelay-mcp-server",
            Vec::new(),
        )
        .with_handshake_timeout(Duration::from_secs(5));
        let err = provider.connect().await.expect_err("spawn must fail");
        assert!(matches!(err, RelayError::Connection { provider, .. } if provider == "ghost"));
        assert!(provider.tools().is_empty());
    }
}
