//! Configuration (layered: TOML file < environment < command line).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::agent_loop::AgentLoopOptions;
use crate::error::RelayError;
use crate::protocol::ClientOptions;

const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub client: ClientSettings,
    pub agent: AgentSettings,
    pub model: ModelSettings,
    /// Registration order is routing order.
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSettings {
    pub call_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
            heartbeat_interval_secs: 30,
            handshake_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSettings {
    pub max_iterations: usize,
    pub system_prompt: Option<String>,
    pub context: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            system_prompt: None,
            context: None,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSettings {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            base_url: None,
            api_key: None,
            temperature: Some(0.7),
            max_tokens: None,
            top_p: None,
        }
    }
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .finish()
    }
}

/// One tool provider entry.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Websocket {
        url: String,
    },
    /// A Model Context Protocol server on child-process stdio.
    #[serde(rename = "mcp-stdio")]
    McpStdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

impl RelayConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, RelayError> {
        let config: Self = toml::from_str(source)
            .map_err(|e| RelayError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// `<config_dir>/toolrelay/config.toml`, if a home directory can be resolved.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "toolrelay").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load the default config file, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, RelayError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Overlay `OPENAI_API_KEY` / `OPENAI_BASE_URL` / `TOOLRELAY_MODEL` from
    /// the environment (and `.env`, if present).
    pub fn with_env_overrides(mut self) -> Self {
        let _ = dotenvy::dotenv();
        self.apply_env(|key| std::env::var(key).ok());
        self
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if let Some(model) = non_empty("TOOLRELAY_MODEL") {
            self.model.model = model;
        }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            let name = provider.name.trim();
            if name.is_empty() {
                return Err(RelayError::Configuration(
                    "provider name must not be empty".into(),
                ));
            }
            if !seen.insert(name) {
                return Err(RelayError::Configuration(format!(
                    "duplicate provider name '{name}'"
                )));
            }
            match &provider.transport {
                TransportConfig::Stdio { command, .. } | TransportConfig::McpStdio { command, .. }
                    if command.trim().is_empty() =>
                {
                    return Err(RelayError::Configuration(format!(
                        "provider '{name}': stdio transport requires a command"
                    )));
                }
                TransportConfig::Websocket { url } => {
                    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                        return Err(RelayError::Configuration(format!(
                            "provider '{name}': websocket url must start with ws:// or wss://"
                        )));
                    }
                }
                TransportConfig::Stdio { .. } | TransportConfig::McpStdio { .. } => {}
            }
        }

        let client = &self.client;
        if client.call_timeout_secs == 0
            || client.heartbeat_interval_secs == 0
            || client.handshake_timeout_secs == 0
        {
            return Err(RelayError::Configuration(
                "client timeouts and heartbeat interval must be positive".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(RelayError::Configuration(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::builder()
            .call_timeout(Duration::from_secs(self.client.call_timeout_secs))
            .heartbeat_interval(Duration::from_secs(self.client.heartbeat_interval_secs))
            .handshake_timeout(Duration::from_secs(self.client.handshake_timeout_secs))
            .build()
    }

    pub fn loop_options(&self) -> AgentLoopOptions {
        AgentLoopOptions::builder()
            .max_iterations(self.agent.max_iterations)
            .tool_timeout(Duration::from_secs(self.client.call_timeout_secs))
            .maybe_system_prompt(self.agent.system_prompt.clone())
            .maybe_context(self.agent.context.clone())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
[client]
call_timeout_secs = 10

[agent]
system_prompt = "You are a weather assistant."

[model]
model = "gpt-4o-mini"

[[providers]]
name = "fetch"
transport = "stdio"
command = "uv"
args = ["run", "mcp-server-fetch"]

[[providers]]
name = "weather"
transport = "websocket"
url = "ws://localhost:8765"
"#;

    #[test]
    fn parses_full_document() {
        let config = RelayConfig::from_toml_str(SAMPLE).expect("sample should parse");
        assert_eq!(config.client.call_timeout_secs, 10);
        assert_eq!(config.client.heartbeat_interval_secs, 30);
        assert_eq!(config.agent.max_iterations, 20);
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.model.temperature, Some(0.7));
        assert_eq!(
            config.providers,
            vec![
                ProviderConfig {
                    name: "fetch".into(),
                    transport: TransportConfig::Stdio {
                        command: "uv".into(),
                        args: vec!["run".into(), "mcp-server-fetch".into()],
                        env: HashMap::new(),
                    },
                },
                ProviderConfig {
                    name: "weather".into(),
                    transport: TransportConfig::Websocket {
                        url: "ws://localhost:8765".into(),
                    },
                },
            ]
        );
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = RelayConfig::from_toml_str("").expect("empty config is valid");
        let options = config.client_options();
        assert_eq!(options.call_timeout, Duration::from_secs(60));
        assert_eq!(options.handshake_timeout, Duration::from_secs(30));
        assert!(config.providers.is_empty());
    }

    #[test]
    fn rejects_duplicate_provider_names() {
        let err = RelayConfig::from_toml_str(
            r#"
[[providers]]
name = "a"
transport = "websocket"
url = "ws://one"

[[providers]]
name = "a"
transport = "websocket"
url = "ws://two"
"#,
        )
        .expect_err("duplicate names");
        assert!(matches!(err, RelayError::Configuration(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn stdio_requires_command() {
        let err = RelayConfig::from_toml_str(
            r#"
[[providers]]
name = "local"
transport = "stdio"
"#,
        )
        .expect_err("missing command");
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[test]
    fn websocket_requires_ws_scheme() {
        let err = RelayConfig::from_toml_str(
            r#"
[[providers]]
name = "remote"
transport = "websocket"
url = "http://localhost"
"#,
        )
        .expect_err("wrong scheme");
        assert!(matches!(err, RelayError::Configuration(msg) if msg.contains("ws://")));
    }

    #[test]
    fn parses_mcp_stdio_provider() {
        let config = RelayConfig::from_toml_str(
            r#"
[[providers]]
name = "fs"
transport = "mcp-stdio"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
"#,
        )
        .expect("mcp-stdio entry");
        assert_eq!(
            config.providers[0].transport,
            TransportConfig::McpStdio {
                command: "npx".into(),
                args: vec![
                    "-y".into(),
                    "@modelcontextprotocol/server-filesystem".into(),
                    "/tmp".into()
                ],
                env: HashMap::new(),
            }
        );

        let err = RelayConfig::from_toml_str(
            "[[providers]]\nname = \"fs\"\ntransport = \"mcp-stdio\"\ncommand = \" \"\n",
        )
        .expect_err("blank command");
        assert!(matches!(err, RelayError::Configuration(msg) if msg.contains("command")));
    }

    #[test]
    fn zero_iterations_are_rejected() {
        let err = RelayConfig::from_toml_str("[agent]\nmax_iterations = 0\n")
            .expect_err("zero iterations");
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[test]
    fn env_overrides_model_settings() {
        let mut config = RelayConfig::default();
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "http://localhost:9999/v1"),
            ("TOOLRELAY_MODEL", "   "),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(
            config.model.base_url.as_deref(),
            Some("http://localhost:9999/v1")
        );
        assert_eq!(config.model.model, "gpt-4o");
        assert!(!format!("{:?}", config.model).contains("sk-test"));
    }

    #[test]
    fn loop_options_follow_agent_section() {
        let config = RelayConfig::from_toml_str(SAMPLE).expect("sample should parse");
        let options = config.loop_options();
        assert_eq!(options.max_iterations, 20);
        assert_eq!(options.tool_timeout, Duration::from_secs(10));
        assert_eq!(
            options.system_prompt.as_deref(),
            Some("You are a weather assistant.")
        );
        assert_eq!(options.context, None);
    }

    #[test]
    fn reads_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).expect("write config");
        let config = RelayConfig::from_file(&path).expect("file should load");
        assert_eq!(config.providers.len(), 2);

        let missing = RelayConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(RelayError::Configuration(_))));
    }
}
