//! Propagation of subscription-group configuration from source to target.

use crate::admin::{BrokerAddress, ClusterAdmin, SubscriptionGroupConfig};
use crate::filter::WhitelistFilter;
use futures::future::join_all;
use rand::seq::SliceRandom;
use replicator_connect_core::{ConnectorError, ConnectorMetrics, ConnectorResult, CycleOutcome};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one sync cycle
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Source broker the table was read from
    pub source_broker: Option<BrokerAddress>,
    /// Eligible subscription groups found on the source
    pub groups: usize,
    /// Target brokers each group was pushed to
    pub targets: usize,
    /// Successful upserts
    pub upserted: usize,
    /// One [`ConnectorError::PartialPropagation`] per group that missed a broker
    pub failures: Vec<ConnectorError>,
}

impl SyncReport {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Copies eligible subscription groups onto every target broker
pub struct SubscriptionSyncer {
    source: Arc<dyn ClusterAdmin>,
    target: Arc<dyn ClusterAdmin>,
    source_cluster: String,
    target_cluster: String,
    filter: Arc<WhitelistFilter>,
    metrics: ConnectorMetrics,
}

impl SubscriptionSyncer {
    pub fn new(
        source: Arc<dyn ClusterAdmin>,
        target: Arc<dyn ClusterAdmin>,
        source_cluster: impl Into<String>,
        target_cluster: impl Into<String>,
        filter: Arc<WhitelistFilter>,
        metrics: ConnectorMetrics,
    ) -> Self {
        Self {
            source,
            target,
            source_cluster: source_cluster.into(),
            target_cluster: target_cluster.into(),
            filter,
            metrics,
        }
    }

    /// Run one cycle.
    ///
    /// Fails only when the source table or the target broker list cannot be
    /// read. Rejected upserts are reported in [`SyncReport::failures`] and
    /// retried wholesale on the next cycle.
    pub async fn run_once(&self) -> ConnectorResult<SyncReport> {
        let (source_broker, table) = self.fetch_source_table().await?;
        let targets = self.target.list_brokers(&self.target_cluster).await?;

        let eligible: Vec<_> = table
            .into_iter()
            .filter(|config| self.filter.eligible(&config.group_name))
            .collect();

        let mut report = SyncReport {
            source_broker: Some(source_broker),
            groups: eligible.len(),
            targets: targets.len(),
            ..Default::default()
        };

        for config in &eligible {
            let failed = self.propagate(config, &targets).await;
            report.upserted += targets.len() - failed.len();
            if !failed.is_empty() {
                report.failures.push(ConnectorError::PartialPropagation {
                    group: config.group_name.clone(),
                    failed_brokers: failed.iter().map(ToString::to_string).collect(),
                    attempted: targets.len(),
                });
            }
        }

        Ok(report)
    }

    /// Read the full table from the first reachable source broker, trying them
    /// in random order
    async fn fetch_source_table(
        &self,
    ) -> ConnectorResult<(BrokerAddress, Vec<SubscriptionGroupConfig>)> {
        let mut brokers = self.source.list_brokers(&self.source_cluster).await?;
        brokers.shuffle(&mut rand::rng());

        let mut last_error = None;
        for broker in brokers {
            match self.source.subscription_groups(&broker).await {
                Ok(table) => {
                    debug!(broker = %broker, entries = table.len(), "Fetched subscription groups");
                    return Ok((broker, table));
                }
                Err(e) => {
                    warn!(broker = %broker, "Failed to fetch subscription groups: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ConnectorError::transient(format!(
                "no brokers available in source cluster {}",
                self.source_cluster
            ))
        }))
    }

    /// Upsert `config` on every target concurrently; returns the brokers that failed
    async fn propagate(
        &self,
        config: &SubscriptionGroupConfig,
        targets: &[BrokerAddress],
    ) -> Vec<BrokerAddress> {
        let results = join_all(
            targets
                .iter()
                .map(|broker| self.target.upsert_subscription_group(broker, config)),
        )
        .await;

        let mut failed = Vec::new();
        for (broker, result) in targets.iter().zip(results) {
            self.metrics.record_upsert(result.is_ok());
            if let Err(e) = result {
                warn!(
                    group = %config.group_name,
                    broker = %broker,
                    "Subscription group upsert failed: {}", e
                );
                failed.push(broker.clone());
            }
        }
        failed
    }

    /// Run one cycle and contain its errors
    pub async fn tick(&self) {
        let started = Instant::now();
        let outcome = match self.run_once().await {
            Ok(report) if report.is_degraded() => {
                for failure in &report.failures {
                    warn!("{}", failure);
                }
                CycleOutcome::Degraded
            }
            Ok(report) => {
                info!(
                    groups = report.groups,
                    targets = report.targets,
                    "Subscription groups synchronized"
                );
                if report.groups == 0 {
                    CycleOutcome::Unchanged
                } else {
                    CycleOutcome::Changed
                }
            }
            Err(e) => {
                warn!(
                    source = %self.source_cluster,
                    target = %self.target_cluster,
                    "Subscription group sync failed: {}", e
                );
                CycleOutcome::Failed
            }
        };
        self.metrics.record_sync_cycle(outcome, started.elapsed());
    }
}
