//! Configuration management for connectors.

use crate::{ConnectorError, ConnectorResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for connectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name (must be unique)
    pub connector_name: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound on the number of task bundles handed out on reconfiguration
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,

    /// Position store settings
    #[serde(default)]
    pub position_store: PositionStoreSettings,
}

/// Settings for the durable, peer-synchronized position table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionStoreSettings {
    /// Directory holding this node's position file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Identity of this node among its peers
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Interval between background persists in milliseconds
    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,

    /// Interval between peer synchronizations in milliseconds
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Shared directory used to exchange snapshots with peer nodes
    #[serde(default)]
    pub peer_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_tasks() -> usize {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/positions")
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Node ids name a file in the shared peer directory, so they must be usable
/// as a file stem unchanged
pub(crate) fn is_valid_node_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn default_persist_interval_ms() -> u64 {
    10_000
}

fn default_sync_interval_ms() -> u64 {
    10_000
}

impl PositionStoreSettings {
    /// Path of this node's position file
    pub fn position_file(&self) -> PathBuf {
        self.data_dir.join("positions.json")
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("POSITION_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("NODE_ID") {
            self.node_id = val;
        }
        if let Ok(val) = env::var("POSITION_PERSIST_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.persist_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("POSITION_SYNC_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.sync_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("POSITION_PEER_DIR") {
            self.peer_dir = Some(PathBuf::from(val));
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.node_id.is_empty() {
            return Err(ConnectorError::config("position_store.node_id cannot be empty"));
        }
        if !is_valid_node_id(&self.node_id) {
            return Err(ConnectorError::config(format!(
                "position_store.node_id '{}' may only contain ASCII letters, digits, '-', '_' and '.'",
                self.node_id
            )));
        }
        if self.persist_interval_ms == 0 {
            return Err(ConnectorError::config(
                "position_store.persist_interval_ms must be > 0",
            ));
        }
        if self.sync_interval_ms == 0 {
            return Err(ConnectorError::config(
                "position_store.sync_interval_ms must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for PositionStoreSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            node_id: default_node_id(),
            persist_interval_ms: default_persist_interval_ms(),
            sync_interval_ms: default_sync_interval_ms(),
            peer_dir: None,
        }
    }
}

impl ConnectorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CONNECTOR_NAME`: Required, unique connector name
    /// - `LOG_LEVEL`: Log level (default: info)
    /// - `MAX_TASKS`: Maximum task bundles (default: 1)
    /// - `POSITION_DATA_DIR`: Position file directory (default: data/positions)
    /// - `NODE_ID`: Node identity among peers (default: random UUID)
    /// - `POSITION_PERSIST_INTERVAL_MS`: Persist interval (default: 10000)
    /// - `POSITION_SYNC_INTERVAL_MS`: Peer sync interval (default: 10000)
    /// - `POSITION_PEER_DIR`: Shared directory for peer exchange (default: none)
    pub fn from_env() -> ConnectorResult<Self> {
        let connector_name = env::var("CONNECTOR_NAME")
            .map_err(|_| ConnectorError::config("CONNECTOR_NAME is required"))?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level());

        let max_tasks = env::var("MAX_TASKS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_max_tasks);

        let mut position_store = PositionStoreSettings::default();
        position_store.apply_env_overrides();

        Ok(Self {
            connector_name,
            log_level,
            max_tasks,
            position_store,
        })
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

    /// Apply environment variable overrides to core configuration
    ///
    /// Connectors call this after loading from TOML so deployments can patch
    /// single values without editing the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CONNECTOR_NAME") {
            self.connector_name = val;
        }
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = env::var("MAX_TASKS") {
            if let Ok(n) = val.parse() {
                self.max_tasks = n;
            }
        }
        self.position_store.apply_env_overrides();
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.connector_name.is_empty() {
            return Err(ConnectorError::config("connector_name cannot be empty"));
        }

        if self.max_tasks == 0 {
            return Err(ConnectorError::config("max_tasks must be > 0"));
        }

        self.position_store.validate()
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connector_name: "default-connector".to_string(),
            log_level: default_log_level(),
            max_tasks: default_max_tasks(),
            position_store: PositionStoreSettings::default(),
        }
    }
}
