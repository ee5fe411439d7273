//! # Replicator Connect Core
//!
//! Core SDK for building connectors that replicate metadata between broker clusters.
//!
//! This library provides the foundational framework shared by replication connectors:
//! lifecycle management, a cancellable periodic scheduler, the durable position store
//! used by execution tasks, a common error taxonomy and observability hooks. Connector
//! developers implement [`Connector`] and let [`ConnectorRuntime`] drive it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use replicator_connect_core::{Connector, ConnectorContext, ConnectorResult, TaskConfig};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! pub struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     fn name(&self) -> &str {
//!         "my-connector"
//!     }
//!
//!     async fn start(&mut self, context: Arc<dyn ConnectorContext>) -> ConnectorResult<()> {
//!         // Schedule background work; call context.request_task_reconfiguration()
//!         // whenever the work set changes
//!         context.request_task_reconfiguration();
//!         Ok(())
//!     }
//!
//!     async fn stop(&mut self) -> ConnectorResult<()> {
//!         Ok(())
//!     }
//!
//!     async fn task_configs(&self, max_tasks: usize) -> ConnectorResult<Vec<TaskConfig>> {
//!         Ok(vec![TaskConfig::new(); max_tasks.min(1)])
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - **Lifecycle Management**: The runtime starts the connector, reacts to reconfiguration
//!   requests and shuts everything down in dependency order
//! - **Position Store**: In-memory partition → offset table with atomic file persistence
//!   and last-writer-wins synchronization between nodes
//! - **Periodic Scheduling**: Fixed-rate timers that stop cleanly before resources are released
//! - **Observability**: Structured logging via `tracing` and metrics via the `metrics` facade
//! - **Configuration**: Environment variable and TOML file configuration

mod config;
mod error;
mod metrics;
mod position;
mod record;
mod runtime;
mod scheduler;
mod traits;

// Re-export public API
pub use config::{ConnectorConfig, PositionStoreSettings};
pub use error::{ConnectorError, ConnectorResult};
pub use crate::metrics::{ConnectorMetrics, CycleOutcome};
pub use position::{
    PeerExchange, PersistedPosition, PositionSnapshot, PositionStore, PositionStoreState,
    SharedDirExchange,
};
pub use record::{PositionEntry, PositionTable, RecordOffset, RecordPartition};
pub use runtime::ConnectorRuntime;
pub use scheduler::PeriodicScheduler;
pub use traits::{Connector, ConnectorContext, PositionUpdateListener, TaskConfig};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
