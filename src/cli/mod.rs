//! CLI definitions for toolrelay.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::warn;

use crate::error::RelayError;
use crate::protocol::ProviderRegistry;

/// Tool-calling agent over external tool providers
#[derive(Parser, Debug)]
#[command(name = "toolrelay", version, about = "Run tool-calling model turns against tool providers")]
pub struct Cli {
    /// Config file (defaults to <config_dir>/toolrelay/config.toml)
    #[arg(short, long, global = true, env = "TOOLRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one turn for a prompt and print the answer
    Chat(ChatArgs),
    /// Connect to every provider and list the tools it offers
    Tools,
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Model name, overriding the config file
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt, overriding the config file
    #[arg(short, long)]
    pub system: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Max tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling cutoff (0.0 - 1.0)
    #[arg(long)]
    pub top_p: Option<f64>,

    /// Maximum model calls in the turn
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// User prompt (positional)
    pub prompt: String,
}

/// Print a finished turn's answer, then close every provider.
///
/// A close failure is logged and never replaces the turn's own outcome.
pub async fn report_and_close(
    outcome: Result<String, RelayError>,
    registry: &ProviderRegistry,
    out: &mut impl Write,
) -> Result<(), RelayError> {
    let printed = match &outcome {
        Ok(answer) => writeln!(out, "{answer}").map_err(RelayError::from),
        Err(_) => Ok(()),
    };
    if let Err(e) = registry.close_all().await {
        warn!(error = %e, "provider shutdown failed");
    }
    outcome?;
    printed
}
