//! Metrics for connectors and the position store.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to the
//! hosting binary.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Outcome label attached to cycle counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Cycle completed with no effect
    Unchanged,
    /// Cycle completed and changed state
    Changed,
    /// Cycle completed but some targets failed
    Degraded,
    /// Cycle aborted, retried on the next tick
    Failed,
}

impl CycleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

/// Metrics handle labelled with the connector name
#[derive(Debug, Clone)]
pub struct ConnectorMetrics {
    connector_name: String,
}

impl ConnectorMetrics {
    pub fn new(connector_name: &str) -> Self {
        Self {
            connector_name: connector_name.to_string(),
        }
    }

    pub fn set_health(&self, healthy: bool) {
        gauge!("connector_health", "connector" => self.connector_name.clone())
            .set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn record_reconcile_cycle(&self, outcome: CycleOutcome, duration: Duration) {
        counter!(
            "reconcile_cycles_total",
            "connector" => self.connector_name.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        histogram!("reconcile_cycle_seconds", "connector" => self.connector_name.clone())
            .record(duration.as_secs_f64());
    }

    pub fn record_reconfiguration(&self) {
        counter!(
            "task_reconfigurations_total",
            "connector" => self.connector_name.clone()
        )
        .increment(1);
    }

    pub fn set_known_groups(&self, count: usize) {
        gauge!("known_groups", "connector" => self.connector_name.clone()).set(count as f64);
    }

    pub fn record_sync_cycle(&self, outcome: CycleOutcome, duration: Duration) {
        counter!(
            "subscription_sync_cycles_total",
            "connector" => self.connector_name.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        histogram!("subscription_sync_seconds", "connector" => self.connector_name.clone())
            .record(duration.as_secs_f64());
    }

    pub fn record_upsert(&self, success: bool) {
        counter!(
            "subscription_upserts_total",
            "connector" => self.connector_name.clone(),
            "result" => if success { "ok" } else { "error" }
        )
        .increment(1);
    }

    pub fn record_persist(&self, success: bool) {
        counter!(
            "position_persists_total",
            "connector" => self.connector_name.clone(),
            "result" => if success { "ok" } else { "error" }
        )
        .increment(1);
    }

    pub fn record_peer_sync(&self, success: bool, applied: usize) {
        counter!(
            "position_syncs_total",
            "connector" => self.connector_name.clone(),
            "result" => if success { "ok" } else { "error" }
        )
        .increment(1);
        counter!(
            "position_sync_applied_total",
            "connector" => self.connector_name.clone()
        )
        .increment(applied as u64);
    }

    pub fn set_position_count(&self, count: usize) {
        gauge!("positions", "connector" => self.connector_name.clone()).set(count as f64);
    }
}
