//! toolrelay: an orchestration engine for tool-calling language models.
//!
//! A [`ProtocolClient`](protocol::ProtocolClient) talks to one external tool
//! provider over a duplex JSON channel. A [`ToolRouter`](agent::ToolRouter)
//! maps model-requested tool names to providers, and an
//! [`AgentLoop`](agent_loop::AgentLoop) alternates model calls with tool
//! dispatch until the model answers in plain text.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use toolrelay::prelude::*;
//!
//! # async fn example() -> toolrelay::error::Result<()> {
//! let weather = Arc::new(ProtocolClient::new(
//!     "weather",
//!     WebSocketTransport::new("ws://localhost:8765"),
//! ));
//! weather.connect().await?;
//!
//! let router = ToolRouter::new(vec![weather.clone() as Arc<dyn ToolProvider>]);
//! let model = Arc::new(OpenAiChatAdapter::new("gpt-4o", std::env::var("OPENAI_API_KEY").unwrap_or_default()));
//! let mut agent = AgentLoop::new(model, router);
//! let answer = agent.invoke("北京天气怎么样?").await?;
//! println!("{answer}");
//!
//! weather.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agent_loop;
pub mod config;
pub mod error;
pub mod prelude;
pub mod protocol;
pub mod provider;
pub mod tools;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
