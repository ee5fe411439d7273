//! Reconciliation of the known group set against the source cluster.

use crate::admin::ConsumerGroupId;
use crate::filter::WhitelistFilter;
use crate::watcher::GroupDiscoveryWatcher;
use arc_swap::ArcSwap;
use replicator_connect_core::{ConnectorContext, ConnectorMetrics, ConnectorResult, CycleOutcome};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Groups currently believed present on the source and eligible for replication
///
/// Readers get an immutable snapshot without blocking; each successful cycle
/// swaps in a whole new set.
#[derive(Debug, Default)]
pub struct KnownGroups {
    current: ArcSwap<BTreeSet<ConsumerGroupId>>,
}

impl KnownGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<BTreeSet<ConsumerGroupId>> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    fn replace(&self, groups: BTreeSet<ConsumerGroupId>) {
        self.current.store(Arc::new(groups));
    }
}

/// Difference between two successive group sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDiff {
    pub added: BTreeSet<ConsumerGroupId>,
    pub removed: BTreeSet<ConsumerGroupId>,
}

impl GroupDiff {
    pub fn between(known: &BTreeSet<ConsumerGroupId>, observed: &BTreeSet<ConsumerGroupId>) -> Self {
        Self {
            added: observed.difference(known).cloned().collect(),
            removed: known.difference(observed).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Discovery, filtering and diffing run as one periodic cycle
pub struct ReconciliationCycle {
    watcher: GroupDiscoveryWatcher,
    filter: Arc<WhitelistFilter>,
    known: Arc<KnownGroups>,
    context: Arc<dyn ConnectorContext>,
    metrics: ConnectorMetrics,
}

impl ReconciliationCycle {
    pub fn new(
        watcher: GroupDiscoveryWatcher,
        filter: Arc<WhitelistFilter>,
        known: Arc<KnownGroups>,
        context: Arc<dyn ConnectorContext>,
        metrics: ConnectorMetrics,
    ) -> Self {
        Self {
            watcher,
            filter,
            known,
            context,
            metrics,
        }
    }

    /// Run one cycle.
    ///
    /// Returns the applied diff, empty when nothing changed. On a discovery
    /// failure the known set is left as it was and no signal is sent.
    pub async fn run_once(&self) -> ConnectorResult<GroupDiff> {
        let raw = self.watcher.discover().await?;
        let filtered: BTreeSet<_> = raw
            .into_iter()
            .filter(|group| self.filter.eligible(group))
            .collect();

        let known = self.known.snapshot();
        let diff = GroupDiff::between(&known, &filtered);
        if diff.is_empty() {
            return Ok(diff);
        }

        info!(
            cluster = %self.watcher.cluster(),
            added = ?diff.added,
            removed = ?diff.removed,
            "Consumer groups changed, requesting task reconfiguration"
        );
        self.known.replace(filtered);
        self.metrics.set_known_groups(self.known.len());
        self.context.request_task_reconfiguration();

        Ok(diff)
    }

    /// Run one cycle and contain its errors
    pub async fn tick(&self) {
        let started = Instant::now();
        let outcome = match self.run_once().await {
            Ok(diff) if diff.is_empty() => {
                debug!("Consumer groups unchanged");
                CycleOutcome::Unchanged
            }
            Ok(_) => CycleOutcome::Changed,
            Err(e) => {
                warn!(
                    cluster = %self.watcher.cluster(),
                    "Group discovery failed, keeping last known groups: {}", e
                );
                CycleOutcome::Failed
            }
        };
        self.metrics.record_reconcile_cycle(outcome, started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::testing::FakeCluster;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingContext {
        signals: AtomicUsize,
    }

    impl ConnectorContext for CountingContext {
        fn request_task_reconfiguration(&self) {
            self.signals.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingContext {
        fn signals(&self) -> usize {
            self.signals.load(Ordering::SeqCst)
        }
    }

    fn set(groups: &[&str]) -> BTreeSet<ConsumerGroupId> {
        groups.iter().map(|g| g.to_string()).collect()
    }

    fn cycle(
        cluster: Arc<FakeCluster>,
        whitelist: &[&str],
    ) -> (ReconciliationCycle, Arc<KnownGroups>, Arc<CountingContext>) {
        let known = Arc::new(KnownGroups::new());
        let context = Arc::new(CountingContext::default());
        let cycle = ReconciliationCycle::new(
            GroupDiscoveryWatcher::new(cluster, "source"),
            Arc::new(WhitelistFilter::new(whitelist).unwrap()),
            known.clone(),
            context.clone(),
            ConnectorMetrics::new("test"),
        );
        (cycle, known, context)
    }

    #[test]
    fn test_diff_between() {
        let diff = GroupDiff::between(&set(&["A", "B"]), &set(&["B", "C"]));
        assert_eq!(diff.added, set(&["C"]));
        assert_eq!(diff.removed, set(&["A"]));
        assert!(!diff.is_empty());
        assert!(GroupDiff::between(&set(&["A"]), &set(&["A"])).is_empty());
    }

    #[tokio::test]
    async fn test_first_cycle_filters_and_signals_once() {
        let cluster = Arc::new(FakeCluster::with_brokers(&["b1"]));
        cluster.set_consumer_groups(
            "b1",
            &["CID_ONSAPI_OWNER_GROUP", "order-service-consumer", "random-debug-group"],
        );
        let (cycle, known, context) = cycle(cluster, &["order-.*"]);

        let diff = cycle.run_once().await.unwrap();

        assert_eq!(diff.added, set(&["order-service-consumer"]));
        assert_eq!(*known.snapshot(), set(&["order-service-consumer"]));
        assert_eq!(context.signals(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_groups_do_not_signal_again() {
        let cluster = Arc::new(FakeCluster::with_brokers(&["b1"]));
        cluster.set_consumer_groups("b1", &["order-a", "order-b"]);
        let (cycle, _, context) = cycle(cluster, &["order-.*"]);

        cycle.run_once().await.unwrap();
        let second = cycle.run_once().await.unwrap();

        assert!(second.is_empty());
        assert_eq!(context.signals(), 1);
    }

    #[tokio::test]
    async fn test_additions_and_removals_signal_once() {
        let cluster = Arc::new(FakeCluster::with_brokers(&["b1"]));
        cluster.set_consumer_groups("b1", &["A", "B"]);
        let (cycle, known, context) = cycle(cluster.clone(), &["[A-Z]"]);
        cycle.run_once().await.unwrap();

        cluster.set_consumer_groups("b1", &["B", "C"]);
        let diff = cycle.run_once().await.unwrap();

        assert_eq!(diff.added, set(&["C"]));
        assert_eq!(diff.removed, set(&["A"]));
        assert_eq!(*known.snapshot(), set(&["B", "C"]));
        assert_eq!(context.signals(), 2);
    }

    #[tokio::test]
    async fn test_failed_discovery_keeps_known_groups() {
        let cluster = Arc::new(FakeCluster::with_brokers(&["b1", "b2"]));
        cluster.set_consumer_groups("b1", &["order-a"]);
        cluster.set_consumer_groups("b2", &["order-b"]);
        let (cycle, known, context) = cycle(cluster.clone(), &["order-.*"]);
        cycle.run_once().await.unwrap();

        cluster.set_unreachable("b2", true);
        assert!(cycle.run_once().await.is_err());
        cycle.tick().await;
        assert_eq!(*known.snapshot(), set(&["order-a", "order-b"]));
        assert_eq!(context.signals(), 1);

        // Recovery with the same groups is not a change
        cluster.set_unreachable("b2", false);
        assert!(cycle.run_once().await.unwrap().is_empty());
        assert_eq!(context.signals(), 1);
    }

    #[tokio::test]
    async fn test_empty_broker_list_keeps_known_groups() {
        let cluster = Arc::new(FakeCluster::with_brokers(&["b1"]));
        cluster.set_consumer_groups("b1", &["order-a"]);
        let (cycle, known, context) = cycle(cluster.clone(), &["order-.*"]);
        cycle.run_once().await.unwrap();

        cluster.set_brokers(&[]);
        assert!(cycle.run_once().await.unwrap_err().is_retryable());
        cycle.tick().await;
        assert_eq!(*known.snapshot(), set(&["order-a"]));
        assert_eq!(context.signals(), 1);

        cluster.set_brokers(&["b1"]);
        assert!(cycle.run_once().await.unwrap().is_empty());
        assert_eq!(context.signals(), 1);
    }

    #[tokio::test]
    async fn test_no_eligible_groups_never_signals() {
        let cluster = Arc::new(FakeCluster::with_brokers(&["b1"]));
        cluster.set_consumer_groups("b1", &["TOOLS_CONSUMER", "random-debug-group"]);
        let (cycle, known, context) = cycle(cluster, &["order-.*"]);

        cycle.tick().await;
        assert!(known.is_empty());
        assert_eq!(context.signals(), 0);
    }
}
