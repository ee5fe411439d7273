//! Meta Replicator Connector implementation
//!
//! Keeps consumer groups and subscription-group configuration of a target
//! cluster in step with a source cluster. Two independent fixed-rate timers
//! drive the work: group reconciliation, which asks the runtime to redistribute
//! tasks when the replicated group set changes, and subscription sync, which
//! copies eligible subscription groups onto every target broker.

use crate::admin::{ClusterAdmin, ConsumerGroupId, HttpClusterAdmin};
use crate::config::{MetaReplicatorConfig, ReplicatorConfig};
use crate::filter::WhitelistFilter;
use crate::reconcile::{KnownGroups, ReconciliationCycle};
use crate::syncer::SubscriptionSyncer;
use crate::watcher::GroupDiscoveryWatcher;
use async_trait::async_trait;
use replicator_connect_core::{
    Connector, ConnectorContext, ConnectorError, ConnectorMetrics, ConnectorResult,
    PeriodicScheduler, TaskConfig,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Task config key holding the task index
pub const TASK_ID_KEY: &str = "task.id";
/// Task config key holding the comma-separated groups assigned to the task
pub const TASK_GROUPS_KEY: &str = "task.groups";
pub const SOURCE_CLUSTER_KEY: &str = "source.cluster";
pub const TARGET_CLUSTER_KEY: &str = "target.cluster";

/// Meta Replicator Connector
pub struct MetaReplicatorConnector {
    name: String,
    config: ReplicatorConfig,
    source: Arc<dyn ClusterAdmin>,
    target: Arc<dyn ClusterAdmin>,
    filter: Arc<WhitelistFilter>,
    known: Arc<KnownGroups>,
    paused: Arc<AtomicBool>,
    scheduler: Option<PeriodicScheduler>,
    /// Set once `start` succeeds; survives `stop` so the last known groups can
    /// still be handed out
    started: bool,
    metrics: ConnectorMetrics,
}

impl MetaReplicatorConnector {
    /// Create the connector with HTTP admin clients for both clusters
    pub fn new(config: &MetaReplicatorConfig) -> ConnectorResult<Self> {
        config.validate()?;

        let source = Arc::new(HttpClusterAdmin::new(&config.replicator.source_admin)?);
        let target = Arc::new(HttpClusterAdmin::new(&config.replicator.target_admin)?);

        Self::with_admins(
            &config.core.connector_name,
            config.replicator.clone(),
            source,
            target,
        )
    }

    /// Create the connector on top of existing admin clients
    pub fn with_admins(
        name: &str,
        config: ReplicatorConfig,
        source: Arc<dyn ClusterAdmin>,
        target: Arc<dyn ClusterAdmin>,
    ) -> ConnectorResult<Self> {
        config.validate()?;
        let filter = Arc::new(WhitelistFilter::new(&config.whitelist)?);

        info!(
            source = %config.source_cluster,
            target = %config.target_cluster,
            patterns = filter.pattern_count(),
            "Meta replicator configured"
        );

        Ok(Self {
            name: name.to_string(),
            config,
            source,
            target,
            filter,
            known: Arc::new(KnownGroups::new()),
            paused: Arc::new(AtomicBool::new(false)),
            scheduler: None,
            started: false,
            metrics: ConnectorMetrics::new(name),
        })
    }

    /// Groups currently replicated
    pub fn known_groups(&self) -> Arc<BTreeSet<ConsumerGroupId>> {
        self.known.snapshot()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn schedule<T, F, Fut>(&mut self, task_name: &'static str, worker: Arc<T>, run: F)
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let period = self.config.refresh_interval();
        let paused = self.paused.clone();
        let scheduler = self
            .scheduler
            .get_or_insert_with(|| PeriodicScheduler::new(self.name.clone()));

        scheduler.schedule_at_fixed_rate(task_name, Duration::ZERO, period, move || {
            let skip = paused.load(Ordering::SeqCst);
            let fut = (!skip).then(|| run(worker.clone()));
            async move {
                match fut {
                    Some(fut) => fut.await,
                    None => debug!(task = task_name, "Connector paused, skipping cycle"),
                }
            }
        });
    }
}

/// Split `groups` round-robin into at most `max_tasks` non-empty bundles
///
/// `groups` is ordered, so the same set always yields the same bundles.
pub fn partition_groups(groups: &BTreeSet<ConsumerGroupId>, max_tasks: usize) -> Vec<Vec<ConsumerGroupId>> {
    let slots = max_tasks.min(groups.len());
    if slots == 0 {
        return Vec::new();
    }
    let mut bundles = vec![Vec::new(); slots];
    for (i, group) in groups.iter().enumerate() {
        bundles[i % slots].push(group.clone());
    }
    bundles
}

#[async_trait]
impl Connector for MetaReplicatorConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self, context: Arc<dyn ConnectorContext>) -> ConnectorResult<()> {
        if self.scheduler.is_some() {
            return Err(ConnectorError::invalid_state("connector already started"));
        }

        info!("Starting Meta Replicator Connector");

        let reconcile = Arc::new(ReconciliationCycle::new(
            GroupDiscoveryWatcher::new(self.source.clone(), self.config.source_cluster.clone()),
            self.filter.clone(),
            self.known.clone(),
            context,
            self.metrics.clone(),
        ));
        let syncer = Arc::new(SubscriptionSyncer::new(
            self.source.clone(),
            self.target.clone(),
            self.config.source_cluster.clone(),
            self.config.target_cluster.clone(),
            self.filter.clone(),
            self.metrics.clone(),
        ));

        self.schedule("group-reconcile", reconcile, |cycle| async move { cycle.tick().await });
        self.schedule("subscription-sync", syncer, |syncer| async move { syncer.tick().await });
        self.started = true;

        info!(
            interval_secs = self.config.refresh_interval_secs,
            "Meta Replicator Connector started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> ConnectorResult<()> {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        info!("Meta Replicator Connector stopped");
        Ok(())
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        self.source.shutdown().await;
        self.target.shutdown().await;
        info!("Admin clients released");
        Ok(())
    }

    async fn pause(&mut self) -> ConnectorResult<()> {
        self.paused.store(true, Ordering::SeqCst);
        info!("Meta Replicator Connector paused");
        Ok(())
    }

    async fn resume(&mut self) -> ConnectorResult<()> {
        self.paused.store(false, Ordering::SeqCst);
        info!("Meta Replicator Connector resumed");
        Ok(())
    }

    async fn task_configs(&self, max_tasks: usize) -> ConnectorResult<Vec<TaskConfig>> {
        if !self.started {
            return Ok(Vec::new());
        }

        let groups = self.known.snapshot();
        let configs = partition_groups(&groups, max_tasks)
            .into_iter()
            .enumerate()
            .map(|(id, bundle)| {
                TaskConfig::from([
                    (TASK_ID_KEY.to_string(), id.to_string()),
                    (TASK_GROUPS_KEY.to_string(), bundle.join(",")),
                    (SOURCE_CLUSTER_KEY.to_string(), self.config.source_cluster.clone()),
                    (TARGET_CLUSTER_KEY.to_string(), self.config.target_cluster.clone()),
                ])
            })
            .collect();
        Ok(configs)
    }
}
