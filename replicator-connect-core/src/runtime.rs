//! Runtime for managing connector lifecycle.
//!
//! The runtime handles:
//! - Configuration validation and tracing setup
//! - Loading and running the position store used by execution tasks
//! - Reacting to reconfiguration requests by recomputing task assignments
//! - Graceful shutdown in dependency order

use crate::{
    Connector, ConnectorConfig, ConnectorContext, ConnectorMetrics, ConnectorResult,
    PositionStore, TaskConfig,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Context handed to the connector; requests are coalesced in a one-slot channel
struct ReconfigurationHandle {
    tx: mpsc::Sender<()>,
}

impl ConnectorContext for ReconfigurationHandle {
    fn request_task_reconfiguration(&self) {
        match self.tx.try_send(()) {
            Ok(()) => debug!("Task reconfiguration requested"),
            // A request is already pending and will cover this one
            Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("Runtime is shutting down, ignoring reconfiguration request")
            }
        }
    }
}

/// Runtime hosting a single connector
pub struct ConnectorRuntime<C: Connector> {
    connector: C,
    config: ConnectorConfig,
    positions: PositionStore,
    metrics: ConnectorMetrics,
    shutdown: CancellationToken,
    assignments: watch::Sender<Vec<TaskConfig>>,
}

impl<C: Connector> ConnectorRuntime<C> {
    /// Create a new runtime
    pub fn new(connector: C, config: ConnectorConfig) -> ConnectorResult<Self> {
        // Validate configuration
        config.validate()?;

        // Initialize tracing
        Self::init_tracing(&config);

        info!("Initializing Connector Runtime");
        info!("Connector: {}", config.connector_name);
        info!("Node: {}", config.position_store.node_id);

        let metrics = ConnectorMetrics::new(&config.connector_name);
        let positions = PositionStore::new(&config.position_store, metrics.clone());
        let (assignments, _) = watch::channel(Vec::new());

        Ok(Self {
            connector,
            config,
            positions,
            metrics,
            shutdown: CancellationToken::new(),
            assignments,
        })
    }

    /// Position store handle for execution tasks
    pub fn positions(&self) -> PositionStore {
        self.positions.clone()
    }

    /// Receiver of the latest task assignments
    pub fn task_assignments(&self) -> watch::Receiver<Vec<TaskConfig>> {
        self.assignments.subscribe()
    }

    /// Token that stops [`ConnectorRuntime::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the connector until shutdown is requested
    pub async fn run(&mut self) -> ConnectorResult<()> {
        info!("Starting Connector Runtime");

        // Setup shutdown handler
        self.setup_shutdown_handler();

        // Positions must be readable before any task is assigned
        self.positions.load().await?;
        self.positions.start()?;

        let (tx, mut rx) = mpsc::channel(1);
        let context: Arc<dyn ConnectorContext> = Arc::new(ReconfigurationHandle { tx });

        info!("Starting connector");
        if let Err(e) = self.connector.start(context).await {
            error!("Connector failed to start: {}", e);
            self.shutdown.cancel();
            if let Err(e) = self.positions.stop().await {
                error!("Failed to stop position store: {}", e);
            }
            return Err(e);
        }
        self.metrics.set_health(true);
        info!("Connector started successfully");

        // Main loop
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(()) = rx.recv() => self.reconfigure().await,
            }
        }

        // Graceful shutdown
        self.shutdown_connector().await
    }

    /// Recompute task assignments and publish them
    async fn reconfigure(&mut self) {
        match self.connector.task_configs(self.config.max_tasks).await {
            Ok(configs) => {
                self.metrics.record_reconfiguration();
                info!(
                    connector = self.connector.name(),
                    tasks = configs.len(),
                    "Task assignments recomputed"
                );
                self.assignments.send_replace(configs);
            }
            Err(e) => error!("Failed to compute task configs: {}", e),
        }
    }

    /// Stop timers, persist positions, then release connections
    async fn shutdown_connector(&mut self) -> ConnectorResult<()> {
        info!("Shutting down connector");

        if let Err(e) = self.connector.stop().await {
            error!("Failed to stop connector cleanly: {}", e);
        }

        if let Err(e) = self.positions.stop().await {
            error!("Failed to stop position store cleanly: {}", e);
        }

        self.connector.close().await?;
        self.metrics.set_health(false);
        info!("Connector Runtime stopped");
        Ok(())
    }

    /// Setup shutdown signal handler for SIGINT
    fn setup_shutdown_handler(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to listen for ctrl-c: {}", e);
                        return;
                    }
                    info!("Received shutdown signal");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }

    /// Initialize tracing/logging
    fn init_tracing(config: &ConnectorConfig) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok(); // Ignore if already initialized
    }
}
