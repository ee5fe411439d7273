//! Position record types.
//!
//! These are the keys and values of the position table that execution tasks use
//! to remember how far they have progressed through each source partition.

use crate::{ConnectorError, ConnectorResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identity of a tracked source partition (topic + broker + queue)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordPartition {
    /// Topic the queue belongs to
    pub topic: String,
    /// Name of the broker hosting the queue
    pub broker_name: String,
    /// Queue index on that broker
    pub queue_id: u32,
}

impl RecordPartition {
    pub fn new(topic: impl Into<String>, broker_name: impl Into<String>, queue_id: u32) -> Self {
        Self {
            topic: topic.into(),
            broker_name: broker_name.into(),
            queue_id,
        }
    }
}

impl fmt::Display for RecordPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.topic, self.broker_name, self.queue_id)
    }
}

/// Opaque progress marker for a [`RecordPartition`]
///
/// The store never interprets the fields; tasks put whatever they need to resume
/// (queue offset, timestamps, ...) and read it back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordOffset {
    fields: BTreeMap<String, serde_json::Value>,
}

impl RecordOffset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an offset holding a single `"offset"` field
    pub fn from_offset(offset: u64) -> Self {
        Self::new().with_field("offset", offset)
    }

    /// Build an offset from any JSON-serializable object's fields
    pub fn from_json<T: Serialize>(data: &T) -> ConnectorResult<Self> {
        match serde_json::to_value(data)? {
            serde_json::Value::Object(map) => Ok(Self {
                fields: map.into_iter().collect(),
            }),
            other => Err(ConnectorError::Serialization(format!(
                "Record offset must be a JSON object, got: {}",
                other
            ))),
        }
    }

    /// Add a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Convenience accessor for the `"offset"` field
    pub fn offset(&self) -> Option<u64> {
        self.fields.get("offset").and_then(|v| v.as_u64())
    }

    /// Deserialize the fields into a typed struct
    pub fn to_json<T: DeserializeOwned>(&self) -> ConnectorResult<T> {
        let value = serde_json::to_value(&self.fields)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Number of low bits of a version reserved for the logical counter
pub const LOGICAL_BITS: u32 = 20;

/// A stored offset, or the tombstone of a removed one, with its version
///
/// Versions are hybrid logical clock stamps: wall-clock milliseconds in the high
/// bits, a logical counter in the low [`LOGICAL_BITS`]. Every node issues stamps
/// above anything it has written or merged, so versions from different nodes
/// compare by write time. Merges only replace an entry whose version is strictly
/// lower, so a stale copy can never move a partition backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    /// `None` marks a removed partition
    pub offset: Option<RecordOffset>,
    pub version: u64,
}

impl PositionEntry {
    pub fn new(offset: RecordOffset, version: u64) -> Self {
        Self {
            offset: Some(offset),
            version,
        }
    }

    pub fn tombstone(version: u64) -> Self {
        Self {
            offset: None,
            version,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.offset.is_none()
    }

    /// Whether `incoming` should replace this entry
    pub fn is_superseded_by(&self, incoming: &PositionEntry) -> bool {
        incoming.version > self.version
    }
}

/// Version of a write made at `now_ms` by a node whose clock is at `last`
pub fn next_version(last: u64, now_ms: i64) -> u64 {
    let physical = (now_ms.max(0) as u64) << LOGICAL_BITS;
    physical.max(last.saturating_add(1))
}

/// Immutable point-in-time copy of the position table
pub type PositionTable = HashMap<RecordPartition, RecordOffset>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[test]
    fn test_partition_display_and_ordering() {
        let a = RecordPartition::new("orders", "broker-a", 0);
        let b = RecordPartition::new("orders", "broker-a", 1);
        assert_eq!(a.to_string(), "orders@broker-a#0");
        assert!(a < b);
    }

    #[test]
    fn test_offset_fields() {
        let offset = RecordOffset::from_offset(42).with_field("timestamp", 1700000000000u64);
        assert_eq!(offset.offset(), Some(42));
        assert_eq!(offset.get("timestamp"), Some(&serde_json::json!(1700000000000u64)));
        assert!(offset.get("missing").is_none());
        assert!(!offset.is_empty());
        assert!(RecordOffset::new().is_empty());
    }

    #[test]
    fn test_offset_typed_json() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct QueuePosition {
            offset: u64,
            store_host: String,
        }

        let pos = QueuePosition {
            offset: 7,
            store_host: "10.0.0.1:10911".to_string(),
        };
        let offset = RecordOffset::from_json(&pos).unwrap();
        assert_eq!(offset.offset(), Some(7));

        let decoded: QueuePosition = offset.to_json().unwrap();
        assert_eq!(decoded, pos);
    }

    #[test]
    fn test_offset_from_non_object_rejected() {
        assert!(RecordOffset::from_json(&5u64).is_err());
    }

    #[test]
    fn test_entry_supersede_only_when_newer() {
        let held = PositionEntry::new(RecordOffset::from_offset(20), 2);
        let older = PositionEntry::new(RecordOffset::from_offset(10), 1);
        let same = PositionEntry::new(RecordOffset::from_offset(99), 2);
        let newer = PositionEntry::new(RecordOffset::from_offset(30), 3);

        assert!(!held.is_superseded_by(&older));
        assert!(!held.is_superseded_by(&same));
        assert!(held.is_superseded_by(&newer));

        let removed = PositionEntry::tombstone(4);
        assert!(removed.is_tombstone());
        assert!(held.is_superseded_by(&removed));
        assert!(!removed.is_superseded_by(&newer));
    }

    #[test]
    fn test_next_version_follows_wall_clock_and_never_goes_back() {
        let at_1000 = next_version(0, 1_000);
        assert_eq!(at_1000, 1_000 << LOGICAL_BITS);

        // Same millisecond: logical counter advances
        assert_eq!(next_version(at_1000, 1_000), at_1000 + 1);

        // Later millisecond beats any number of earlier writes
        assert!(next_version(0, 1_001) > at_1000 + 1_000);

        // Clock skew backwards still moves forward
        assert_eq!(next_version(at_1000, 500), at_1000 + 1);
    }
}
