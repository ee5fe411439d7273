//! Discovery of active consumer groups on the source cluster.

use crate::admin::{ClusterAdmin, ConsumerGroupId};
use futures::future::try_join_all;
use replicator_connect_core::{ConnectorError, ConnectorResult};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Lists the consumer groups active anywhere in the source cluster
pub struct GroupDiscoveryWatcher {
    admin: Arc<dyn ClusterAdmin>,
    cluster: String,
}

impl GroupDiscoveryWatcher {
    pub fn new(admin: Arc<dyn ClusterAdmin>, cluster: impl Into<String>) -> Self {
        Self {
            admin,
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Union of the consumer groups reported by every broker of the cluster.
    ///
    /// Brokers are queried concurrently. If any one of them fails the whole
    /// discovery fails and nothing is returned. A cluster reporting no brokers
    /// at all is treated as a transient failure rather than as "no groups".
    pub async fn discover(&self) -> ConnectorResult<BTreeSet<ConsumerGroupId>> {
        let brokers = self.admin.list_brokers(&self.cluster).await?;
        if brokers.is_empty() {
            return Err(ConnectorError::transient(format!(
                "no brokers reported for cluster {}",
                self.cluster
            )));
        }

        let per_broker = try_join_all(
            brokers
                .iter()
                .map(|broker| self.admin.consumer_groups(broker)),
        )
        .await?;

        let groups: BTreeSet<_> = per_broker.into_iter().flatten().collect();
        debug!(
            cluster = %self.cluster,
            brokers = brokers.len(),
            groups = groups.len(),
            "Discovered consumer groups"
        );
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::testing::FakeCluster;

    #[tokio::test]
    async fn test_union_across_brokers() {
        let cluster = Arc::new(FakeCluster::with_brokers(&["b1", "b2"]));
        cluster.set_consumer_groups("b1", &["order-a", "shared"]);
        cluster.set_consumer_groups("b2", &["order-b", "shared"]);

        let watcher = GroupDiscoveryWatcher::new(cluster, "source");
        let groups = watcher.discover().await.unwrap();

        let expected: BTreeSet<_> = ["order-a", "order-b", "shared"]
            .iter()
            .map(|g| g.to_string())
            .collect();
        assert_eq!(groups, expected);
    }

    #[tokio::test]
    async fn test_single_broker_failure_fails_discovery() {
        let cluster = Arc::new(FakeCluster::with_brokers(&["b1", "b2"]));
        cluster.set_consumer_groups("b1", &["order-a"]);
        cluster.set_unreachable("b2", true);

        let watcher = GroupDiscoveryWatcher::new(cluster, "source");
        let err = watcher.discover().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_broker_list_is_transient() {
        let cluster = Arc::new(FakeCluster::with_brokers(&[]));
        let watcher = GroupDiscoveryWatcher::new(cluster, "source");

        let err = watcher.discover().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, ConnectorError::TransientCluster { .. }));
    }

    #[tokio::test]
    async fn test_brokers_without_groups_is_empty() {
        let cluster = Arc::new(FakeCluster::with_brokers(&["b1"]));
        let watcher = GroupDiscoveryWatcher::new(cluster, "source");
        assert!(watcher.discover().await.unwrap().is_empty());
    }
}
