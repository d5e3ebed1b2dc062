//! toolrelay CLI binary entry point.

use std::sync::Arc;

use clap::Parser;
use toolrelay::agent_loop::{AgentLoop, TurnEvent, TurnEventPayload};
use toolrelay::cli::{report_and_close, ChatArgs, Cli, Commands};
use toolrelay::config::RelayConfig;
use toolrelay::error::RelayError;
use toolrelay::agent::ToolProvider;
use toolrelay::protocol::{ManagedProvider, ProviderRegistry};
use toolrelay::provider::openai::OpenAiChatAdapter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,toolrelay=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match load_config(&cli) {
        Ok(config) => match cli.command {
            Commands::Chat(args) => handle_chat(config, args).await,
            Commands::Tools => handle_tools(config).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<RelayConfig, RelayError> {
    let config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::load_default()?,
    };
    Ok(config.with_env_overrides())
}

async fn handle_chat(mut config: RelayConfig, args: ChatArgs) -> Result<(), RelayError> {
    if let Some(model) = args.model {
        config.model.model = model;
    }
    if let Some(system) = args.system {
        config.agent.system_prompt = Some(system);
    }
    if let Some(t) = args.temperature {
        config.model.temperature = Some(t);
    }
    if let Some(max) = args.max_tokens {
        config.model.max_tokens = Some(max);
    }
    if let Some(top_p) = args.top_p {
        config.model.top_p = Some(top_p);
    }
    if let Some(max) = args.max_iterations {
        config.agent.max_iterations = max;
    }
    config.validate()?;

    let adapter = Arc::new(OpenAiChatAdapter::from_settings(&config.model)?);
    let registry = ProviderRegistry::from_config(&config)?;
    registry.connect_all().await?;

    let sink = Arc::new(|event: TurnEvent| match &event.payload {
        TurnEventPayload::ToolCallStarted { call, provider } => {
            let provider = provider.as_deref().unwrap_or("-");
            eprintln!("⚡ {} ({}) via {provider}", call.name, call.id);
        }
        TurnEventPayload::ToolResult { result } => {
            let output = &result.content;
            let truncated = if output.len() > 200 {
                let mut end = 200;
                while end > 0 && !output.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &output[..end])
            } else {
                output.clone()
            };
            if result.is_error {
                eprintln!("  ❌ {truncated}");
            } else {
                eprintln!("  ✅ {truncated}");
            }
        }
        _ => {}
    });

    let mut agent = AgentLoop::with_options(adapter, registry.router(), config.loop_options())
        .with_event_sink(sink);
    let outcome = agent.invoke(args.prompt).await;
    report_and_close(outcome, &registry, &mut std::io::stdout()).await
}

async fn handle_tools(config: RelayConfig) -> Result<(), RelayError> {
    let registry = ProviderRegistry::from_config(&config)?;
    if registry.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }
    registry.connect_all().await?;
    for provider in registry.providers() {
        println!("{} ({})", provider.name(), provider.endpoint());
        for tool in provider.catalog() {
            if tool.description.is_empty() {
                println!("  {}", tool.name);
            } else {
                println!("  {} - {}", tool.name, tool.description);
            }
        }
    }
    for (tool, providers) in registry.router().collisions() {
        println!("warning: '{tool}' is offered by {}; {} wins", providers.join(", "), providers[0]);
    }
    registry.close_all().await
}
