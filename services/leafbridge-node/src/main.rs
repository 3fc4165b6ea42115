use anyhow::{Context, Result};
use clap::Parser;
use leafbridge_core::logging;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod config;
mod handlers;
mod state;
mod upstream;
mod wire;

use state::AppState;

const NODE_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

/// Identity translation gateway for leaf devices.
#[derive(Debug, Parser)]
#[command(name = "leafbridge-node", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "LEAFBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Print version information as JSON and exit
    #[arg(long)]
    version_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version_json {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config = config::load(cli.config.as_deref())?;
    logging::init_with_format(config.service.log_format);

    let state = Arc::new(AppState::new(config.clone())?);
    let coordinator = Arc::clone(&state.coordinator);

    let sweeper = config.registration.confirmation_timeout().map(|max_age| {
        let interval = Duration::from_secs(config.registration.expiry_sweep_interval_secs.max(1));
        state::spawn_expiry_sweeper(Arc::clone(&coordinator), interval, max_age)
    });

    let app = handlers::router(state);
    let listener = TcpListener::bind(&config.service.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.service.listen_addr))?;
    info!(
        addr = %config.service.listen_addr,
        module_id = %config.identity.edge_module_id,
        hub = %config.identity.hub_hostname,
        "LeafBridge node listening"
    );

    let draining = Arc::clone(&coordinator);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            draining.begin_shutdown();
        })
        .await?;

    coordinator.shutdown().await;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("LeafBridge node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
