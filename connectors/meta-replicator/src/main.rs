//! Meta Replicator Connector
//!
//! Replicates consumer-group membership and subscription-group configuration
//! from a source broker cluster to a target cluster, and hosts the position
//! store used by the tasks that replicate message data.

mod admin;
mod config;
mod connector;
mod filter;
mod reconcile;
mod syncer;
mod watcher;

use config::MetaReplicatorConfig;
use connector::MetaReplicatorConnector;
use replicator_connect_core::{ConnectorResult, ConnectorRuntime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ConnectorResult<()> {
    // Initialize logging
    init_tracing();

    tracing::info!("Starting Meta Replicator Connector");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = MetaReplicatorConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    tracing::info!("Configuration loaded successfully");
    tracing::info!("Connector: {}", config.core.connector_name);
    tracing::info!("Source cluster: {}", config.replicator.source_cluster);
    tracing::info!("Target cluster: {}", config.replicator.target_cluster);
    tracing::info!("Whitelist: {:?}", config.replicator.whitelist);

    // Create connector instance
    let connector = MetaReplicatorConnector::new(&config)?;

    // Create and run the runtime
    let mut runtime = ConnectorRuntime::new(connector, config.core)?;

    // Run until shutdown signal
    runtime.run().await?;

    tracing::info!("Meta Replicator Connector stopped");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,meta_replicator=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
