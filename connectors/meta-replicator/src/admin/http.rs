//! HTTP client for a cluster's admin API.
//!
//! Endpoints, relative to the configured base URL:
//! - `GET  clusters/{cluster}/brokers` → `{"brokers": ["host:port", ...]}`
//! - `GET  brokers/{addr}/consumer-groups` → `{"groups": ["id", ...]}`
//! - `GET  brokers/{addr}/subscription-groups` → `{"subscriptionGroups": [{...}, ...]}`
//! - `PUT  brokers/{addr}/subscription-groups/{group}` with the config as body

use super::{BrokerAddress, ClusterAdmin, ConsumerGroupId, SubscriptionGroupConfig};
use crate::config::AdminEndpoint;
use async_trait::async_trait;
use replicator_connect_core::{ConnectorError, ConnectorResult};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
struct BrokersResponse {
    brokers: Vec<BrokerAddress>,
}

#[derive(Deserialize)]
struct ConsumerGroupsResponse {
    groups: Vec<ConsumerGroupId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionGroupsResponse {
    subscription_groups: Vec<SubscriptionGroupConfig>,
}

/// [`ClusterAdmin`] backed by the cluster's HTTP admin API
pub struct HttpClusterAdmin {
    client: Client,
    base_url: Url,
    credentials: Option<(String, String)>,
    request_timeout: Duration,
    table_timeout: Duration,
}

impl HttpClusterAdmin {
    /// Create a client for `endpoint`
    pub fn new(endpoint: &AdminEndpoint) -> ConnectorResult<Self> {
        let base_url = Url::parse(&endpoint.url).map_err(|e| {
            ConnectorError::config(format!("Invalid admin url '{}': {}", endpoint.url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConnectorError::config(format!(
                "Admin url '{}' cannot be used as a base url",
                endpoint.url
            )));
        }

        let client = Client::builder().build().map_err(|e| {
            ConnectorError::fatal_with_source("Failed to build admin HTTP client", e)
        })?;

        Ok(Self {
            client,
            base_url,
            credentials: endpoint
                .credentials()
                .map(|(access, secret)| (access.to_string(), secret.to_string())),
            request_timeout: endpoint.request_timeout(),
            table_timeout: endpoint.table_timeout(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in new(): the base url always has path segments
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((access, secret)) => request.basic_auth(access, Some(secret)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> ConnectorResult<reqwest::Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ConnectorError::transient_with_source(format!("{} failed", what), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ConnectorError::transient(format!(
                "{} returned {}: {}",
                what, status, body
            )));
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        timeout: Duration,
        what: &str,
    ) -> ConnectorResult<T> {
        debug!(url = %url, "Admin request");
        let response = self
            .send(self.client.get(url).timeout(timeout), what)
            .await?;

        response.json::<T>().await.map_err(|e| {
            ConnectorError::transient_with_source(format!("{}: malformed response", what), e)
        })
    }
}

#[async_trait]
impl ClusterAdmin for HttpClusterAdmin {
    async fn list_brokers(&self, cluster: &str) -> ConnectorResult<Vec<BrokerAddress>> {
        let url = self.endpoint(&["clusters", cluster, "brokers"]);
        let response: BrokersResponse = self
            .get_json(url, self.request_timeout, &format!("list brokers of {}", cluster))
            .await?;
        Ok(response.brokers)
    }

    async fn consumer_groups(&self, broker: &BrokerAddress) -> ConnectorResult<Vec<ConsumerGroupId>> {
        let url = self.endpoint(&["brokers", broker.as_str(), "consumer-groups"]);
        let response: ConsumerGroupsResponse = self
            .get_json(url, self.request_timeout, &format!("consumer groups of {}", broker))
            .await?;
        Ok(response.groups)
    }

    async fn subscription_groups(
        &self,
        broker: &BrokerAddress,
    ) -> ConnectorResult<Vec<SubscriptionGroupConfig>> {
        let url = self.endpoint(&["brokers", broker.as_str(), "subscription-groups"]);
        let response: SubscriptionGroupsResponse = self
            .get_json(
                url,
                self.table_timeout,
                &format!("subscription groups of {}", broker),
            )
            .await?;
        Ok(response.subscription_groups)
    }

    async fn upsert_subscription_group(
        &self,
        broker: &BrokerAddress,
        config: &SubscriptionGroupConfig,
    ) -> ConnectorResult<()> {
        let url = self.endpoint(&[
            "brokers",
            broker.as_str(),
            "subscription-groups",
            config.group_name.as_str(),
        ]);
        debug!(url = %url, "Admin upsert");

        let request = self
            .client
            .put(url)
            .timeout(self.request_timeout)
            .json(config);
        self.send(
            request,
            &format!("upsert of '{}' on {}", config.group_name, broker),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::{get, put},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded {
        upserts: Arc<Mutex<Vec<(String, String, Value)>>>,
        auth: Arc<Mutex<Vec<Option<String>>>>,
    }

    async fn brokers(Path(cluster): Path<String>) -> Result<Json<Value>, StatusCode> {
        if cluster != "cluster-east" {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(Json(json!({ "brokers": ["10.0.0.1:10911", "10.0.0.2:10911"] })))
    }

    async fn consumer_groups(
        State(recorded): State<Recorded>,
        headers: HeaderMap,
        Path(addr): Path<String>,
    ) -> Json<Value> {
        recorded.auth.lock().unwrap().push(
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        );
        Json(json!({ "groups": [format!("group-of-{}", addr)] }))
    }

    async fn subscription_groups(Path(_addr): Path<String>) -> Json<Value> {
        Json(json!({
            "subscriptionGroups": [
                { "groupName": "order-service-consumer", "retryMaxTimes": 16 }
            ]
        }))
    }

    async fn upsert(
        State(recorded): State<Recorded>,
        Path((addr, group)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        if addr == "10.0.0.9:10911" {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        recorded.upserts.lock().unwrap().push((addr, group, body));
        StatusCode::OK
    }

    async fn serve() -> (String, Recorded) {
        let recorded = Recorded::default();
        let app = Router::new()
            .route("/admin/clusters/{cluster}/brokers", get(brokers))
            .route("/admin/brokers/{addr}/consumer-groups", get(consumer_groups))
            .route(
                "/admin/brokers/{addr}/subscription-groups",
                get(subscription_groups),
            )
            .route(
                "/admin/brokers/{addr}/subscription-groups/{group}",
                put(upsert),
            )
            .with_state(recorded.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/admin/", addr), recorded)
    }

    fn client(url: &str, credentials: bool) -> HttpClusterAdmin {
        let mut endpoint = AdminEndpoint::new(url);
        if credentials {
            endpoint.access_key = Some("ak".to_string());
            endpoint.secret_key = Some("sk".to_string());
        }
        HttpClusterAdmin::new(&endpoint).unwrap()
    }

    #[tokio::test]
    async fn test_list_brokers_and_groups() {
        let (url, recorded) = serve().await;
        let admin = client(&url, true);

        let brokers = admin.list_brokers("cluster-east").await.unwrap();
        assert_eq!(
            brokers,
            vec![
                BrokerAddress::new("10.0.0.1:10911"),
                BrokerAddress::new("10.0.0.2:10911")
            ]
        );

        let groups = admin.consumer_groups(&brokers[0]).await.unwrap();
        assert_eq!(groups, vec!["group-of-10.0.0.1:10911".to_string()]);

        let auth = recorded.auth.lock().unwrap().clone();
        assert_eq!(auth.len(), 1);
        assert!(auth[0].as_deref().unwrap().starts_with("Basic "));
    }

    #[tokio::test]
    async fn test_unknown_cluster_is_transient() {
        let (url, _) = serve().await;
        let admin = client(&url, false);

        let err = admin.list_brokers("cluster-unknown").await.unwrap_err();
        assert!(matches!(err, ConnectorError::TransientCluster { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_subscription_table_and_upsert() {
        let (url, recorded) = serve().await;
        let admin = client(&url, false);
        let broker = BrokerAddress::new("10.0.0.1:10911");

        let table = admin.subscription_groups(&broker).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].group_name, "order-service-consumer");

        let target = BrokerAddress::new("10.0.0.3:10911");
        admin.upsert_subscription_group(&target, &table[0]).await.unwrap();

        let upserts = recorded.upserts.lock().unwrap().clone();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].0, "10.0.0.3:10911");
        assert_eq!(upserts[0].1, "order-service-consumer");
        assert_eq!(upserts[0].2["retryMaxTimes"], 16);
        assert_eq!(upserts[0].2["groupName"], "order-service-consumer");
    }

    #[tokio::test]
    async fn test_rejected_upsert_is_transient() {
        let (url, _) = serve().await;
        let admin = client(&url, false);

        let err = admin
            .upsert_subscription_group(
                &BrokerAddress::new("10.0.0.9:10911"),
                &SubscriptionGroupConfig::new("order-service-consumer"),
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_admin_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let admin = client(&format!("http://{}", addr), false);
        let err = admin.list_brokers("cluster-east").await.unwrap_err();
        assert!(matches!(err, ConnectorError::TransientCluster { .. }));
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let admin = client("http://admin.local/api", false);
        let url = admin.endpoint(&["brokers", "b 1", "subscription-groups", "a/b"]);
        assert_eq!(
            url.as_str(),
            "http://admin.local/api/brokers/b%201/subscription-groups/a%2Fb"
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = HttpClusterAdmin::new(&AdminEndpoint::new("not a url"));
        assert!(matches!(result, Err(ConnectorError::Configuration(_))));
    }
}
