//! Connector lifecycle and runtime-facing traits.

use crate::ConnectorResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-task configuration bundle handed to execution tasks
pub type TaskConfig = BTreeMap<String, String>;

/// Handle a connector uses to talk back to its hosting runtime
pub trait ConnectorContext: Send + Sync {
    /// Ask the runtime to recompute and redistribute task assignments.
    ///
    /// Fire-and-forget: the call never blocks, and several requests issued before
    /// the runtime reacts are coalesced into one recomputation.
    fn request_task_reconfiguration(&self);
}

/// Lifecycle of a connector hosted by [`crate::ConnectorRuntime`]
///
/// Construction performs configuration validation, so an instance that exists is
/// ready to be started. Shutdown is split in two: `stop` cancels timers and
/// drains in-flight cycles, `close` releases remote connections. The runtime
/// persists task positions in between.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connector name used in logs and metrics
    fn name(&self) -> &str;

    /// Start background work
    async fn start(&mut self, context: Arc<dyn ConnectorContext>) -> ConnectorResult<()>;

    /// Stop all timers and wait for in-flight cycles to finish
    async fn stop(&mut self) -> ConnectorResult<()>;

    /// Release connections to external systems
    async fn close(&mut self) -> ConnectorResult<()> {
        Ok(())
    }

    /// Suspend periodic work without tearing anything down
    async fn pause(&mut self) -> ConnectorResult<()> {
        Ok(())
    }

    /// Resume periodic work after [`Connector::pause`]
    async fn resume(&mut self) -> ConnectorResult<()> {
        Ok(())
    }

    /// Split the connector's current work into at most `max_tasks` bundles
    async fn task_configs(&self, max_tasks: usize) -> ConnectorResult<Vec<TaskConfig>>;
}

/// Callback invoked after the position table changes
pub trait PositionUpdateListener: Send + Sync {
    fn on_position_update(&self);
}

impl<F> PositionUpdateListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_position_update(&self) {
        self()
    }
}
