//! Configuration for the Meta Replicator Connector

use replicator_connect_core::{ConnectorConfig, ConnectorError, ConnectorResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Unified configuration for the Meta Replicator Connector
///
/// Core connector settings live at the root of the file, replication settings
/// under `[replicator]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaReplicatorConfig {
    /// Core connector configuration (flattened at root level)
    #[serde(flatten)]
    pub core: ConnectorConfig,

    /// Replication settings
    pub replicator: ReplicatorConfig,
}

impl MetaReplicatorConfig {
    /// Load configuration from a single TOML file with optional ENV overrides
    ///
    /// Priority: TOML file → Environment variables
    ///
    /// # Example
    ///
    /// ```toml
    /// connector_name = "meta-replicator"
    ///
    /// [replicator]
    /// source_cluster = "cluster-east"
    /// target_cluster = "cluster-west"
    /// whitelist = ["order-.*", "payment-.*"]
    ///
    /// [replicator.source_admin]
    /// url = "http://east-admin:8080"
    ///
    /// [replicator.target_admin]
    /// url = "http://west-admin:8080"
    /// ```
    pub fn load() -> ConnectorResult<Self> {
        let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
            Self::from_file(&config_file)?
        } else {
            Self::from_env()?
        };

        config.core.apply_env_overrides();
        config.replicator.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> ConnectorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ConnectorError::config(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> ConnectorResult<Self> {
        toml::from_str(content).map_err(|e| ConnectorError::config(e.to_string()))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> ConnectorResult<Self> {
        Ok(Self {
            core: ConnectorConfig::from_env()?,
            replicator: ReplicatorConfig::from_env()?,
        })
    }

    /// Validate all configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        self.core.validate()?;
        self.replicator.validate()?;
        Ok(())
    }
}

/// Replication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Cluster whose groups are discovered and copied
    pub source_cluster: String,

    /// Cluster that receives the subscription-group configuration
    pub target_cluster: String,

    /// Admin plane of the source cluster
    pub source_admin: AdminEndpoint,

    /// Admin plane of the target cluster
    pub target_admin: AdminEndpoint,

    /// Seconds between discovery and sync cycles
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Regular expressions a group id must fully match to be replicated
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// Connection settings for one cluster's admin plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminEndpoint {
    /// Base URL of the admin API
    pub url: String,

    pub access_key: Option<String>,

    pub secret_key: Option<String>,

    /// Timeout for per-broker queries in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for subscription table fetches in milliseconds
    #[serde(default = "default_table_timeout_ms")]
    pub table_timeout_ms: u64,
}

fn default_refresh_interval_secs() -> u64 {
    3
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_table_timeout_ms() -> u64 {
    10_000
}

impl AdminEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_key: None,
            secret_key: None,
            request_timeout_ms: default_request_timeout_ms(),
            table_timeout_ms: default_table_timeout_ms(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn table_timeout(&self) -> Duration {
        Duration::from_millis(self.table_timeout_ms)
    }

    /// Credentials, when both halves are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) {
        if let Ok(val) = env::var(format!("{}_ADMIN_URL", prefix)) {
            self.url = val;
        }
        if let Ok(val) = env::var(format!("{}_ACCESS_KEY", prefix)) {
            self.access_key = Some(val);
        }
        if let Ok(val) = env::var(format!("{}_SECRET_KEY", prefix)) {
            self.secret_key = Some(val);
        }
    }

    fn validate(&self, side: &str) -> ConnectorResult<()> {
        if self.url.is_empty() {
            return Err(ConnectorError::config(format!(
                "replicator.{}_admin.url cannot be empty",
                side
            )));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConnectorError::config(format!(
                "replicator.{}_admin.url must start with http:// or https://, got '{}'",
                side, self.url
            )));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(ConnectorError::config(format!(
                "replicator.{}_admin requires both access_key and secret_key, or neither",
                side
            )));
        }
        if self.request_timeout_ms == 0 || self.table_timeout_ms == 0 {
            return Err(ConnectorError::config(format!(
                "replicator.{}_admin timeouts must be > 0",
                side
            )));
        }
        Ok(())
    }
}

impl ReplicatorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SOURCE_CLUSTER`: Required, source cluster name
    /// - `TARGET_CLUSTER`: Required, target cluster name
    /// - `SOURCE_ADMIN_URL`: Required, source admin API base URL
    /// - `TARGET_ADMIN_URL`: Required, target admin API base URL
    /// - `SOURCE_ACCESS_KEY` / `SOURCE_SECRET_KEY`: Optional source credentials
    /// - `TARGET_ACCESS_KEY` / `TARGET_SECRET_KEY`: Optional target credentials
    /// - `REFRESH_INTERVAL_SECS`: Optional, cycle interval (default: 3)
    /// - `GROUP_WHITELIST`: Required, comma-separated group id patterns
    pub fn from_env() -> ConnectorResult<Self> {
        let source_cluster = required_env("SOURCE_CLUSTER")?;
        let target_cluster = required_env("TARGET_CLUSTER")?;

        let mut source_admin = AdminEndpoint::new(required_env("SOURCE_ADMIN_URL")?);
        source_admin.apply_env_overrides("SOURCE");
        let mut target_admin = AdminEndpoint::new(required_env("TARGET_ADMIN_URL")?);
        target_admin.apply_env_overrides("TARGET");

        let refresh_interval_secs = env::var("REFRESH_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_refresh_interval_secs);

        let whitelist = parse_whitelist(&required_env("GROUP_WHITELIST")?);

        Ok(Self {
            source_cluster,
            target_cluster,
            source_admin,
            target_admin,
            refresh_interval_secs,
            whitelist,
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SOURCE_CLUSTER") {
            self.source_cluster = val;
        }
        if let Ok(val) = env::var("TARGET_CLUSTER") {
            self.target_cluster = val;
        }
        self.source_admin.apply_env_overrides("SOURCE");
        self.target_admin.apply_env_overrides("TARGET");
        if let Ok(val) = env::var("REFRESH_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                self.refresh_interval_secs = n;
            }
        }
        if let Ok(val) = env::var("GROUP_WHITELIST") {
            self.whitelist = parse_whitelist(&val);
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Validate replication settings
    ///
    /// Pattern syntax is checked when the whitelist filter is compiled.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.source_cluster.is_empty() {
            return Err(ConnectorError::config("replicator.source_cluster cannot be empty"));
        }
        if self.target_cluster.is_empty() {
            return Err(ConnectorError::config("replicator.target_cluster cannot be empty"));
        }
        self.source_admin.validate("source")?;
        self.target_admin.validate("target")?;

        if self.refresh_interval_secs == 0 {
            return Err(ConnectorError::config(
                "replicator.refresh_interval_secs must be > 0",
            ));
        }
        if self.whitelist.is_empty() {
            return Err(ConnectorError::config(
                "replicator.whitelist must contain at least one pattern",
            ));
        }
        Ok(())
    }
}

fn required_env(key: &str) -> ConnectorResult<String> {
    env::var(key).map_err(|_| ConnectorError::config(format!("{} is required", key)))
}

fn parse_whitelist(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
