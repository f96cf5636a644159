//! Hall Relay Server
//!
//! Relays kinematic state frames between connected clients.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hall_relay::{RelayConfig, RelayServer, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Hall Relay Server v{}", VERSION);

    let config = RelayConfig::from_env();
    info!("Max peers: {}", config.max_peers);
    info!("Unknown Sync target: {:?}", config.unknown_target);

    let server = Arc::new(
        RelayServer::bind(config.clone())
            .await
            .with_context(|| format!("binding {}:{}", config.host, config.port))?,
    );

    let runner = server.clone();
    let relay = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");
    server.shutdown();

    relay.await.context("relay task")??;
    Ok(())
}
