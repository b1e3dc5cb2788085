use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use emoshare::auth::github::GithubProvider;
use emoshare::config::{Cli, Config};
use emoshare::state::AppState;
use emoshare::{routes, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    if let Err(problem) = config.github.check_configured() {
        tracing::warn!("GitHub login will fail until configured: {}", problem);
    }

    let stores = store::connect(&config)?;
    let provider = GithubProvider::new(config.github.clone())?;
    let state = AppState::new(config.clone(), stores, Arc::new(provider));

    let app = routes::router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
