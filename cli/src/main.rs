use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tinker_core::agent::{AgentLoop, ContextBuilder, ReflectionGate, ToolRegistry};
use tinker_core::traits::{Provider, ToolProvider};
use tinker_core::{Config, McpClient, ServerLaunch, config, providers};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod shell;

#[derive(Parser)]
#[command(name = "tinker")]
#[command(about = "tinker - a tool-calling chat shell for MCP servers", long_about = None)]
struct Cli {
    /// Tool server to launch: a *.py or *.js script, or a full command line
    server: Option<String>,

    /// Config file (defaults to ~/.tinker/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the per-turn step budget
    #[arg(long)]
    max_steps: Option<usize>,

    /// Skip the self-critique pass on final answers
    #[arg(long)]
    no_reflect: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let provider = providers::create_provider(&config)?;

    let target = cli
        .server
        .clone()
        .unwrap_or_else(|| config.server.default_target.clone());
    let launch = ServerLaunch::from_target(&target, &config.server.python)?;

    let client = Arc::new(
        McpClient::connect(
            &launch,
            Duration::from_secs(config.tools.call_timeout_secs),
        )
        .await
        .with_context(|| format!("Could not start tool server `{}`", launch))?,
    );

    let result = run(&config, provider, client.clone()).await;

    if let Err(e) = client.shutdown().await {
        warn!(error = %e, "tool server did not shut down cleanly");
    }

    result
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::load_or_init(&config::get_config_path())?,
    };

    if let Some(max_steps) = cli.max_steps {
        config.max_steps = max_steps;
    }
    if cli.no_reflect {
        config.reflection.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: &Config, provider: Arc<dyn Provider>, client: Arc<McpClient>) -> Result<()> {
    let tools: Arc<dyn ToolProvider> = client;
    let registry = ToolRegistry::discover(tools)
        .await?
        .with_output_limit(config.tools.output_limit);

    let mut context_builder = ContextBuilder::new().with_tool_specs(registry.specs());
    if let Some(persona) = &config.persona {
        context_builder = context_builder.with_persona(persona.clone());
    }

    let names = registry.names();
    let mut agent = AgentLoop::new(
        provider.clone(),
        context_builder,
        Arc::new(registry),
        config.model.clone(),
    )
    .with_max_steps(config.max_steps)
    .with_temperature(config.temperature)
    .with_max_tokens(config.max_tokens)
    .with_json_mode_fallback(config.json_mode_fallback);

    if config.reflection.enabled {
        let gate = ReflectionGate::new(provider.clone(), config.reflection_model())
            .with_temperature(config.reflection.temperature)
            .with_max_tokens(config.reflection.max_tokens)
            .with_timeout(Duration::from_secs(config.reflection.timeout_secs));
        agent = agent.with_reflection(gate);
    }

    println!(
        "{} {} via {}",
        style("tinker").bold().cyan(),
        style(&config.model).dim(),
        provider.name()
    );
    if names.is_empty() {
        println!("{}", style("Connected, but the server offers no tools.").yellow());
    } else {
        println!(
            "{} {}",
            style("Connected tools:").green(),
            names.join(", ")
        );
    }

    shell::run(&mut agent).await
}
