//! Ordered set of tool providers built from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::client::{ClientOptions, ProtocolClient};
use super::transport::{StdioTransport, WebSocketTransport};
use crate::agent::router::{ToolProvider, ToolRouter};
use crate::config::{ProviderConfig, RelayConfig, TransportConfig};
use crate::error::RelayError;

/// A tool provider whose connection lifecycle the registry owns.
#[async_trait]
pub trait ManagedProvider: ToolProvider {
    /// Human-readable description of where the provider lives.
    fn endpoint(&self) -> String;

    fn is_ready(&self) -> bool;

    async fn connect(&self) -> Result<(), RelayError>;

    async fn close(&self) -> Result<(), RelayError>;

    fn into_tool_provider(self: Arc<Self>) -> Arc<dyn ToolProvider>;
}

#[async_trait]
impl ManagedProvider for ProtocolClient {
    fn endpoint(&self) -> String {
        ProtocolClient::endpoint(self)
    }

    fn is_ready(&self) -> bool {
        ProtocolClient::is_ready(self)
    }

    async fn connect(&self) -> Result<(), RelayError> {
        ProtocolClient::connect(self).await
    }

    async fn close(&self) -> Result<(), RelayError> {
        ProtocolClient::close(self).await
    }

    fn into_tool_provider(self: Arc<Self>) -> Arc<dyn ToolProvider> {
        self
    }
}

#[cfg(feature = "mcp")]
#[async_trait]
impl ManagedProvider for super::mcp::McpStdioProvider {
    fn endpoint(&self) -> String {
        super::mcp::McpStdioProvider::endpoint(self)
    }

    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    async fn connect(&self) -> Result<(), RelayError> {
        super::mcp::McpStdioProvider::connect(self).await
    }

    async fn close(&self) -> Result<(), RelayError> {
        super::mcp::McpStdioProvider::close(self).await
    }

    fn into_tool_provider(self: Arc<Self>) -> Arc<dyn ToolProvider> {
        self
    }
}

/// Owns the providers and their connection lifecycle.
///
/// Registration order is preserved and becomes routing order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ManagedProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One provider per configured entry, in file order.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let options: ClientOptions = config.client_options();
        let mut registry = Self::new();
        for provider in &config.providers {
            registry.insert(build_provider(provider, &options)?)?;
        }
        Ok(registry)
    }

    pub fn register<P>(&mut self, provider: P) -> Result<Arc<P>, RelayError>
    where
        P: ManagedProvider + 'static,
    {
        let provider = Arc::new(provider);
        self.insert(provider.clone())?;
        Ok(provider)
    }

    fn insert(&mut self, provider: Arc<dyn ManagedProvider>) -> Result<(), RelayError> {
        if self.get(provider.name()).is_some() {
            return Err(RelayError::Configuration(format!(
                "provider '{}' is already registered",
                provider.name()
            )));
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ManagedProvider>> {
        self.providers.iter().find(|provider| provider.name() == name)
    }

    pub fn providers(&self) -> &[Arc<dyn ManagedProvider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Connect every provider in order, stopping at the first failure.
    ///
    /// Providers connected before the failure are closed again.
    pub async fn connect_all(&self) -> Result<(), RelayError> {
        for (index, provider) in self.providers.iter().enumerate() {
            if let Err(error) = provider.connect().await {
                warn!(provider = %provider.name(), error = %error, "provider failed to connect");
                for connected in &self.providers[..index] {
                    let _ = connected.close().await;
                }
                return Err(error);
            }
        }
        info!(providers = self.providers.len(), "all providers connected");
        Ok(())
    }

    /// Close every provider. Failures are logged; the first one is returned.
    pub async fn close_all(&self) -> Result<(), RelayError> {
        let mut first_error = None;
        for provider in &self.providers {
            if let Err(error) = provider.close().await {
                warn!(provider = %provider.name(), error = %error, "provider failed to close");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Router over the registered providers, in registration order.
    pub fn router(&self) -> ToolRouter {
        ToolRouter::new(
            self.providers
                .iter()
                .map(|provider| provider.clone().into_tool_provider())
                .collect(),
        )
    }
}

fn build_provider(
    provider: &ProviderConfig,
    options: &ClientOptions,
) -> Result<Arc<dyn ManagedProvider>, RelayError> {
    match &provider.transport {
        TransportConfig::Stdio { command, args, env } => Ok(Arc::new(ProtocolClient::with_options(
            provider.name.clone(),
            StdioTransport::new(command.clone(), args.clone())
                .with_env(env.clone()),
            options.clone(),
        ))),
        TransportConfig::Websocket { url } => Ok(Arc::new(ProtocolClient::with_options(
            provider.name.clone(),
            WebSocketTransport::new(url.clone()),
            options.clone(),
        ))),
        #[cfg(feature = "mcp")]
        TransportConfig::McpStdio { command, args, env } => Ok(Arc::new(
            super::mcp::McpStdioProvider::new(provider.name.clone(), command.clone(), args.clone())
                .with_env(env.clone())
                .with_handshake_timeout(options.handshake_timeout),
        )),
        #[cfg(not(feature = "mcp"))]
        TransportConfig::McpStdio { .. } => Err(RelayError::Configuration(format!(
            "provider '{}': the mcp-stdio transport needs the `mcp` feature",
            provider.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::MemoryTransport;

    #[test]
    fn builds_clients_in_config_order() {
        let config = RelayConfig::from_toml_str(
            r#"
[[providers]]
name = "fetch"
transport = "stdio"
command = "uv"

[[providers]]
name = "weather"
transport = "websocket"
url = "ws://localhost:8765"
"#,
        )
        .expect("config");
        let registry = ProviderRegistry::from_config(&config).expect("registry");
        let names: Vec<&str> = registry.providers().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["fetch", "weather"]);
        assert_eq!(
            registry.get("weather").map(|p| p.endpoint()),
            Some("ws://localhost:8765".to_string())
        );
    }

    const MCP_CONFIG: &str = r#"
[[providers]]
name = "fetch"
transport = "mcp-stdio"
command = "uvx"
args = ["mcp-server-fetch"]
"#;

    #[cfg(feature = "mcp")]
    #[test]
    fn mcp_stdio_entries_build_mcp_providers() {
        let config = RelayConfig::from_toml_str(MCP_CONFIG).expect("config");
        let registry = ProviderRegistry::from_config(&config).expect("registry");
        let fetch = registry.get("fetch").expect("registered");
        assert_eq!(fetch.endpoint(), "mcp-stdio:uvx mcp-server-fetch");
        assert!(!fetch.is_ready());
        assert!(registry.router().route("fetch").is_none());
    }

    #[cfg(not(feature = "mcp"))]
    #[test]
    fn mcp_stdio_entries_need_the_feature() {
        let config = RelayConfig::from_toml_str(MCP_CONFIG).expect("config");
        let err = ProviderRegistry::from_config(&config).expect_err("feature disabled");
        assert!(matches!(err, RelayError::Configuration(msg) if msg.contains("mcp")));
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = ProviderRegistry::new();
        let (first, _l1) = MemoryTransport::new();
        let (second, _l2) = MemoryTransport::new();
        registry
            .register(ProtocolClient::new("dup", first))
            .expect("first registration");
        let err = registry
            .register(ProtocolClient::new("dup", second))
            .expect_err("duplicate");
        assert!(matches!(err, RelayError::Configuration(_)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn connect_all_stops_at_first_failure() {
        let mut registry = ProviderRegistry::new();
        let (transport, listener) = MemoryTransport::new();
        drop(listener);
        registry
            .register(ProtocolClient::new("gone", transport))
            .expect("register");
        let err = registry.connect_all().await.expect_err("no listener");
        assert!(matches!(err, RelayError::Connection { provider, .. } if provider == "gone"));
        registry.close_all().await.expect("close_all on idle clients");
    }
}
