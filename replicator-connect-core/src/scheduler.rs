//! Cancellable fixed-rate scheduler.
//!
//! Every scheduled task runs on its own tokio task and shares a single
//! cancellation token. Cancellation is only observed between firings, so a cycle
//! that has already started always runs to completion; [`PeriodicScheduler::shutdown`]
//! waits for that before returning.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives named periodic tasks until shut down
#[derive(Debug)]
pub struct PeriodicScheduler {
    name: String,
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl PeriodicScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Run `task` every `period`, first after `initial_delay`.
    ///
    /// Firings missed because a cycle overran are skipped rather than bunched.
    /// Must be called from within a tokio runtime.
    pub fn schedule_at_fixed_rate<F, Fut>(
        &mut self,
        task_name: &'static str,
        initial_delay: Duration,
        period: Duration,
        mut task: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let scheduler = self.name.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        debug!(scheduler = %scheduler, task = task_name, "Firing periodic task");
                        task().await;
                    }
                }
            }

            debug!(scheduler = %scheduler, task = task_name, "Periodic task stopped");
        });

        info!(
            scheduler = %self.name,
            task = task_name,
            period_ms = period.as_millis() as u64,
            "Scheduled periodic task"
        );
        self.handles.push((task_name, handle));
    }

    /// Whether tasks are scheduled and shutdown has not been requested
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty() && !self.cancel.is_cancelled()
    }

    /// Stop accepting new firings and wait for in-flight ones to complete
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();

        for (task_name, handle) in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(scheduler = %self.name, task = task_name, "Periodic task ended abnormally: {}", e);
            }
        }

        info!(scheduler = %self.name, "Scheduler shut down");
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
