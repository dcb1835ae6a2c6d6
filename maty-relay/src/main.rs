//! maty-relay binary entry point.
//!
//! Usage:
//! ```bash
//! maty-relay --config maty.toml
//! maty-relay --bind 127.0.0.1:1978
//! maty-relay --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use maty_relay::config::Config;
use maty_relay::http::{self, health};
use maty_relay::poller::spawn_poller_task;
use maty_relay::server::Relay;
use maty_relay::storage::SqliteStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "maty.toml";

/// Real-time contact and message relay.
#[derive(Parser, Debug)]
#[command(name = "maty-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Override the listen address from the config
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .context("invalid logging filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    health::init_start_time();
    tracing::info!("maty-relay v{} starting", env!("CARGO_PKG_VERSION"));

    let store = SqliteStore::new(&config.storage.database, config.storage.max_connections)
        .await
        .with_context(|| format!("failed to open {}", config.storage.database.display()))?;
    tracing::info!("Store opened: {}", config.storage.database.display());

    let relay = Arc::new(Relay::new(config.clone(), Arc::new(store)));

    let (stop_tx, stop_rx) = watch::channel(false);
    let poller = spawn_poller_task(relay.poller(), &config.poller, stop_rx);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;
    tracing::info!("Listening on {}", config.server.bind_address);

    axum::serve(listener, http::build_router(relay.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = stop_tx.send(true);
    if let Err(e) = poller.await {
        tracing::error!("Delta poller task failed: {}", e);
    }
    relay.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

/// Load the config file. A missing default file means built-in defaults.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path.as_os_str() == DEFAULT_CONFIG {
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("failed to load {}", path.display()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
