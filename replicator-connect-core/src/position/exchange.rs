//! Snapshot exchange between nodes sharing the position table.

use super::file::{read_snapshot, write_snapshot, PositionSnapshot};
use crate::config::is_valid_node_id;
use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Transport used by [`super::PositionStore::synchronize`]
#[async_trait]
pub trait PeerExchange: Send + Sync {
    /// Make this node's snapshot visible to its peers
    async fn publish(&self, snapshot: &PositionSnapshot) -> ConnectorResult<()>;

    /// Fetch the latest snapshot of every peer except `local_node`
    async fn collect(&self, local_node: &str) -> ConnectorResult<Vec<PositionSnapshot>>;
}

/// Exchange through a directory every node can read and write
///
/// Each node owns `<dir>/<node_id>.json` and reads everybody else's file. Files
/// are replaced atomically, so readers never observe a half-written snapshot.
#[derive(Debug, Clone)]
pub struct SharedDirExchange {
    dir: PathBuf,
}

impl SharedDirExchange {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File owned by `node_id`; ids are never rewritten, so two nodes can only
    /// share a file by sharing an id
    fn node_path(&self, node_id: &str) -> ConnectorResult<PathBuf> {
        if !is_valid_node_id(node_id) {
            return Err(ConnectorError::config(format!(
                "node id '{}' cannot be used as a peer file name",
                node_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", node_id)))
    }

    fn is_snapshot_file(path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("json")
    }
}

#[async_trait]
impl PeerExchange for SharedDirExchange {
    async fn publish(&self, snapshot: &PositionSnapshot) -> ConnectorResult<()> {
        write_snapshot(&self.node_path(&snapshot.node_id)?, snapshot).await
    }

    async fn collect(&self, local_node: &str) -> ConnectorResult<Vec<PositionSnapshot>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            ConnectorError::transient_with_source(
                format!("failed to list peer directory {:?}", self.dir),
                e,
            )
        })?;

        let mut snapshots = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopped listing peer directory early: {}", e);
                    break;
                }
            };

            let path = entry.path();
            if !Self::is_snapshot_file(&path) {
                continue;
            }

            match read_snapshot(&path).await {
                Ok(Some(snapshot)) if snapshot.node_id != local_node => {
                    debug!(peer = %snapshot.node_id, positions = snapshot.positions.len(), "Collected peer snapshot");
                    snapshots.push(snapshot);
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), "Failed to read peer snapshot: {}", e),
            }
        }

        Ok(snapshots)
    }
}
