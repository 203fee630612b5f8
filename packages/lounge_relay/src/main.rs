use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lounge_relay::config::{FileConfig, RelayConfig, load_config};
use lounge_relay::{AppState, router};

#[derive(Parser)]
#[command(name = "lounge-relay")]
#[command(about = "Event relay for repository chat lounges")]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "lounge_relay=debug,tower_http=debug,info"
    } else {
        "lounge_relay=info,info"
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    let file_config: FileConfig = load_config(&cli.config)
        .extract()
        .context("failed to load configuration")?;
    let mut config = RelayConfig::from_file(&file_config);
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let addr = config.server_address();
    let state = AppState::new(config);
    let app = router(state)?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!("Relay listening on ws://{}/ws", addr);

    axum::serve(listener, app).await.context("server error")
}
