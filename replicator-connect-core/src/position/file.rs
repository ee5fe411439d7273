//! On-disk format of position snapshots.
//!
//! Writes go to a sibling `.tmp` file which is synced and then renamed over the
//! destination, so a concurrent reader sees either the previous document or the
//! new one, never a partial file.

use crate::{ConnectorError, ConnectorResult, PositionEntry, RecordOffset, RecordPartition};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Serialized form of one node's position table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub node_id: String,
    pub updated_at_ms: i64,
    pub positions: Vec<PersistedPosition>,
}

/// One row of a [`PositionSnapshot`]; a row without an offset is a removal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedPosition {
    pub partition: RecordPartition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<RecordOffset>,
    pub version: u64,
}

impl PositionSnapshot {
    pub fn new(node_id: impl Into<String>, positions: Vec<PersistedPosition>) -> Self {
        Self {
            node_id: node_id.into(),
            updated_at_ms: chrono::Utc::now().timestamp_millis(),
            positions,
        }
    }

    /// Consume the snapshot into mergeable table entries
    pub fn into_entries(self) -> impl Iterator<Item = (RecordPartition, PositionEntry)> {
        self.positions
            .into_iter()
            .map(|p| {
                let entry = PositionEntry {
                    offset: p.offset,
                    version: p.version,
                };
                (p.partition, entry)
            })
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

/// Atomically replace `path` with the serialized snapshot
pub async fn write_snapshot(path: &Path, snapshot: &PositionSnapshot) -> ConnectorResult<()> {
    let data = serde_json::to_vec_pretty(snapshot)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            ConnectorError::persistence_with_source(
                format!("failed to create directory {:?}", parent),
                e,
            )
        })?;
    }

    let tmp = tmp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await.map_err(|e| {
        ConnectorError::persistence_with_source(format!("failed to create {:?}", tmp), e)
    })?;
    file.write_all(&data).await.map_err(|e| {
        ConnectorError::persistence_with_source(format!("failed to write {:?}", tmp), e)
    })?;
    file.sync_all().await.map_err(|e| {
        ConnectorError::persistence_with_source(format!("failed to sync {:?}", tmp), e)
    })?;
    drop(file);

    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        ConnectorError::persistence_with_source(
            format!("failed to rename {:?} -> {:?}", tmp, path),
            e,
        )
    })?;

    debug!(path = %path.display(), positions = snapshot.positions.len(), "Position snapshot written");
    Ok(())
}

/// Read a snapshot, `None` if the file does not exist yet
pub async fn read_snapshot(path: &Path) -> ConnectorResult<Option<PositionSnapshot>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConnectorError::persistence_with_source(
                format!("failed to read {:?}", path),
                e,
            ))
        }
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| ConnectorError::persistence_with_source(format!("failed to parse {:?}", path), e))
}
