use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::{build_runtime, load_runtime_config, GenerateCommand, HealthCommand, ProvidersCommand};
use common::{init_structured_logging, LoggingConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "llm-switch")]
#[command(about = "Route prompts across LLM providers with retries and failover")]
#[command(version)]
struct Cli {
    /// Runtime configuration (TOML); LLM_SWITCH_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Provider definitions as [[providers]] tables
    #[arg(long, global = true, default_value = "providers.toml")]
    providers: PathBuf,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt through the active provider
    Generate(GenerateCommand),
    /// List registered providers with their routing role and health
    Providers(ProvidersCommand),
    /// Probe provider health once and report the result
    Health(HealthCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_runtime_config(cli.config.as_deref()).await?;
    let logging = LoggingConfig::default()
        .with_level_str(&cli.log_level)?
        .with_json(cli.json_logs)
        .with_tenant(config.tenant_id.clone());
    init_structured_logging(logging).context("failed to initialize logging")?;

    let runtime = build_runtime(config, &cli.providers).await?;
    let outcome = match &cli.command {
        Commands::Generate(command) => command.execute(&runtime).await,
        Commands::Providers(command) => command.execute(&runtime).await,
        Commands::Health(command) => command.execute(&runtime).await,
    };
    runtime.shutdown().await;
    outcome
}
