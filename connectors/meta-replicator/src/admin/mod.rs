//! Management-plane access to a broker cluster.

mod http;

pub use http::HttpClusterAdmin;

use async_trait::async_trait;
use replicator_connect_core::ConnectorResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque consumer group id, unique within a cluster
pub type ConsumerGroupId = String;

/// Network endpoint of a broker within a cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerAddress(String);

impl BrokerAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BrokerAddress {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

/// Subscription-group configuration as held by a broker
///
/// Only the group name is interpreted; the remaining policy fields are copied
/// verbatim from source to target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionGroupConfig {
    #[serde(rename = "groupName")]
    pub group_name: ConsumerGroupId,

    #[serde(flatten)]
    pub policy: serde_json::Map<String, serde_json::Value>,
}

impl SubscriptionGroupConfig {
    pub fn new(group_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            policy: serde_json::Map::new(),
        }
    }

    pub fn with_policy(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.policy.insert(key.into(), value.into());
        self
    }
}

/// Operations the replicator needs from a cluster's admin plane
///
/// Every failure to reach a broker surfaces as a retryable
/// [`replicator_connect_core::ConnectorError::TransientCluster`].
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Addresses of the brokers serving `cluster`
    async fn list_brokers(&self, cluster: &str) -> ConnectorResult<Vec<BrokerAddress>>;

    /// Ids of the consumer groups currently active on `broker`
    async fn consumer_groups(&self, broker: &BrokerAddress) -> ConnectorResult<Vec<ConsumerGroupId>>;

    /// Full subscription-group table held by `broker`
    async fn subscription_groups(
        &self,
        broker: &BrokerAddress,
    ) -> ConnectorResult<Vec<SubscriptionGroupConfig>>;

    /// Create or update one subscription group on `broker`
    async fn upsert_subscription_group(
        &self,
        broker: &BrokerAddress,
        config: &SubscriptionGroupConfig,
    ) -> ConnectorResult<()>;

    /// Release connections held by the client
    async fn shutdown(&self) {}
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory cluster used by the connector tests.

    use super::*;
    use parking_lot::Mutex;
    use replicator_connect_core::ConnectorError;
    use std::collections::{BTreeMap, HashMap, HashSet};

    #[derive(Default)]
    struct State {
        brokers: Vec<BrokerAddress>,
        consumer_groups: HashMap<BrokerAddress, Vec<ConsumerGroupId>>,
        tables: HashMap<BrokerAddress, BTreeMap<ConsumerGroupId, SubscriptionGroupConfig>>,
        unreachable: HashSet<BrokerAddress>,
        upserts: Vec<(BrokerAddress, ConsumerGroupId)>,
        shutdown: bool,
    }

    /// Fake cluster; brokers can be marked unreachable to simulate outages
    #[derive(Default)]
    pub struct FakeCluster {
        state: Mutex<State>,
    }

    impl FakeCluster {
        pub fn with_brokers(brokers: &[&str]) -> Self {
            let cluster = Self::default();
            cluster.state.lock().brokers = brokers.iter().map(|b| BrokerAddress::from(*b)).collect();
            cluster
        }

        pub fn set_brokers(&self, brokers: &[&str]) {
            self.state.lock().brokers = brokers.iter().map(|b| BrokerAddress::from(*b)).collect();
        }

        pub fn set_consumer_groups(&self, broker: &str, groups: &[&str]) {
            self.state.lock().consumer_groups.insert(
                broker.into(),
                groups.iter().map(|g| g.to_string()).collect(),
            );
        }

        pub fn put_subscription_group(&self, broker: &str, config: SubscriptionGroupConfig) {
            self.state
                .lock()
                .tables
                .entry(broker.into())
                .or_default()
                .insert(config.group_name.clone(), config);
        }

        pub fn set_unreachable(&self, broker: &str, unreachable: bool) {
            let mut state = self.state.lock();
            if unreachable {
                state.unreachable.insert(broker.into());
            } else {
                state.unreachable.remove(&BrokerAddress::from(broker));
            }
        }

        pub fn subscription_group(&self, broker: &str, group: &str) -> Option<SubscriptionGroupConfig> {
            self.state
                .lock()
                .tables
                .get(&BrokerAddress::from(broker))
                .and_then(|t| t.get(group).cloned())
        }

        /// Upsert attempts that reached a broker, in call order
        pub fn upserts(&self) -> Vec<(BrokerAddress, ConsumerGroupId)> {
            self.state.lock().upserts.clone()
        }

        pub fn is_shut_down(&self) -> bool {
            self.state.lock().shutdown
        }

        fn check_reachable(state: &State, broker: &BrokerAddress) -> ConnectorResult<()> {
            if state.unreachable.contains(broker) {
                return Err(ConnectorError::transient(format!("broker {} unreachable", broker)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ClusterAdmin for FakeCluster {
        async fn list_brokers(&self, _cluster: &str) -> ConnectorResult<Vec<BrokerAddress>> {
            Ok(self.state.lock().brokers.clone())
        }

        async fn consumer_groups(&self, broker: &BrokerAddress) -> ConnectorResult<Vec<ConsumerGroupId>> {
            let state = self.state.lock();
            Self::check_reachable(&state, broker)?;
            Ok(state.consumer_groups.get(broker).cloned().unwrap_or_default())
        }

        async fn subscription_groups(
            &self,
            broker: &BrokerAddress,
        ) -> ConnectorResult<Vec<SubscriptionGroupConfig>> {
            let state = self.state.lock();
            Self::check_reachable(&state, broker)?;
            Ok(state
                .tables
                .get(broker)
                .map(|t| t.values().cloned().collect())
                .unwrap_or_default())
        }

        async fn upsert_subscription_group(
            &self,
            broker: &BrokerAddress,
            config: &SubscriptionGroupConfig,
        ) -> ConnectorResult<()> {
            let mut state = self.state.lock();
            state.upserts.push((broker.clone(), config.group_name.clone()));
            Self::check_reachable(&state, broker)?;
            state
                .tables
                .entry(broker.clone())
                .or_default()
                .insert(config.group_name.clone(), config.clone());
            Ok(())
        }

        async fn shutdown(&self) {
            self.state.lock().shutdown = true;
        }
    }
}
