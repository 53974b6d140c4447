use anyhow::Result;
use argus_agent::agent::{Agent, PlatformProviders};
use argus_core::config::{expand_path, AgentConfig};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "argus-agent",
    version,
    about = "Argus — endpoint activity-monitoring agent"
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "argus.toml")]
    config: String,

    /// Write a default configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace|debug|info|warn|error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str, local_log_path: &str) -> Result<()> {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let builder = FmtSubscriber::builder().with_max_level(level);

    if local_log_path.trim().is_empty() {
        tracing::subscriber::set_global_default(builder.finish())?;
    } else {
        let path = expand_path(local_log_path);
        if let Some(parent) = Path::new(&path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let subscriber = builder
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        AgentConfig::default().save(&cli.config)?;
        println!("Default configuration written to {}", cli.config);
        return Ok(());
    }

    let config = AgentConfig::load(&cli.config)?;
    init_tracing(&cli.log_level, &config.security.local_log_path)?;
    config.validate()?;

    if cli.dry_run {
        info!(config = %cli.config, device_id = %config.device_id(), "Configuration valid");
        return Ok(());
    }

    let agent = Agent::new(config, PlatformProviders::system())?;
    agent.start().map_err(|e| anyhow::anyhow!(e))?;

    tokio::signal::ctrl_c().await?;
    agent.stop();
    Ok(())
}
