use anyhow::Result;
use argus_server::backup::{BackupSink, HttpBackup, NullBackup};
use argus_server::{build_router, AppState, EventStore};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "argus-server",
    version,
    about = "Argus — aggregation server for endpoint monitoring agents"
)]
struct Cli {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:8460")]
    bind: String,

    /// Shared ingest secret (or set ARGUS_API_KEY)
    #[arg(long, env = "ARGUS_API_KEY")]
    api_key: String,

    /// Backup document-store URL (replication disabled when absent)
    #[arg(long)]
    backup_url: Option<String>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if cli.api_key.trim().is_empty() {
        anyhow::bail!("an ingest API key is required (--api-key or ARGUS_API_KEY)");
    }

    let backup: Arc<dyn BackupSink> = match cli.backup_url {
        Some(url) => {
            info!(url = %url, "Backup replication enabled");
            Arc::new(HttpBackup::new(url))
        }
        None => Arc::new(NullBackup),
    };

    let state = AppState {
        store: Arc::new(EventStore::new()),
        api_key: cli.api_key,
        backup,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    info!(addr = %cli.bind, "Argus server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
