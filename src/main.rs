use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use api_utils::config::config;
use api_utils::database::{Database, DatabaseManager, MemoryDatabase, PgDatabase};

#[derive(Parser)]
#[command(name = "api-utils-demo")]
#[command(about = "Serves the sample projects resource")]
#[command(version)]
struct Args {
    #[arg(long, env = "PORT", default_value_t = 3000, help = "Port to listen on")]
    port: u16,

    #[arg(long, help = "Use the in-memory store even when DATABASE_URL is set")]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so DATABASE_URL and RUST_LOG are picked up
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = config();
    tracing::info!("Starting demo server in {:?} mode", config.environment);

    let db: Arc<dyn Database> = if args.memory || config.database.url.is_none() {
        tracing::info!("Using in-memory store");
        Arc::new(MemoryDatabase::new())
    } else {
        Arc::new(PgDatabase::new(DatabaseManager::from_config().await?))
    };

    let bind_addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, api_utils::demo::app(db)).await?;
    Ok(())
}
