//! Position store shared by execution tasks.
//!
//! The store keeps the partition → offset table in memory behind a short-held
//! lock. Durability and peer synchronization always work on a point-in-time copy
//! taken under that lock, so disk and peer I/O never block `get`/`put`.
//!
//! Every write is stamped with a hybrid logical clock version that orders writes
//! across nodes. Removals leave a versioned tombstone, so a peer still holding
//! the old offset cannot bring the partition back.
//!
//! Lifecycle: `Unstarted → Loaded → Running → Stopped`.
//!
//! ```text
//! load()   read the position file, merge it into memory
//! start()  schedule periodic persist and peer synchronization
//! stop()   cancel timers, drain in-flight work, persist one last time
//! ```

mod exchange;
mod file;

pub use exchange::{PeerExchange, SharedDirExchange};
pub use file::{PersistedPosition, PositionSnapshot};

use crate::record::next_version;
use crate::{
    ConnectorError, ConnectorMetrics, ConnectorResult, PeriodicScheduler, PositionEntry,
    PositionStoreSettings, PositionTable, PositionUpdateListener, RecordOffset, RecordPartition,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`PositionStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStoreState {
    Unstarted,
    Loaded,
    Running,
    Stopped,
}

/// Durable, peer-synchronized partition → offset table
///
/// Cloning is cheap and every clone refers to the same table.
#[derive(Clone)]
pub struct PositionStore {
    inner: Arc<Inner>,
}

/// Entries, tombstones included, and the clock that stamps local writes
#[derive(Default)]
struct Table {
    entries: HashMap<RecordPartition, PositionEntry>,
    clock: u64,
}

impl Table {
    fn next_version(&mut self) -> u64 {
        self.clock = next_version(self.clock, chrono::Utc::now().timestamp_millis());
        self.clock
    }

    fn observe(&mut self, version: u64) {
        self.clock = self.clock.max(version);
    }

    fn live(&self, partition: &RecordPartition) -> Option<&PositionEntry> {
        self.entries.get(partition).filter(|entry| !entry.is_tombstone())
    }

    fn live_len(&self) -> usize {
        self.entries.values().filter(|entry| !entry.is_tombstone()).count()
    }
}

struct Inner {
    node_id: String,
    file: PathBuf,
    persist_interval: Duration,
    sync_interval: Duration,
    table: Mutex<Table>,
    state: Mutex<PositionStoreState>,
    listeners: RwLock<Vec<Arc<dyn PositionUpdateListener>>>,
    dirty: AtomicBool,
    persist_lock: tokio::sync::Mutex<()>,
    exchange: Option<Arc<dyn PeerExchange>>,
    scheduler: Mutex<Option<PeriodicScheduler>>,
    metrics: ConnectorMetrics,
}

impl PositionStore {
    /// Create a store from settings; a configured `peer_dir` enables peer exchange
    pub fn new(settings: &PositionStoreSettings, metrics: ConnectorMetrics) -> Self {
        let exchange = settings
            .peer_dir
            .as_ref()
            .map(|dir| Arc::new(SharedDirExchange::new(dir)) as Arc<dyn PeerExchange>);
        Self::with_exchange(settings, exchange, metrics)
    }

    /// Create a store with an explicit peer exchange (or none)
    pub fn with_exchange(
        settings: &PositionStoreSettings,
        exchange: Option<Arc<dyn PeerExchange>>,
        metrics: ConnectorMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                node_id: settings.node_id.clone(),
                file: settings.position_file(),
                persist_interval: settings.persist_interval(),
                sync_interval: settings.sync_interval(),
                table: Mutex::new(Table::default()),
                state: Mutex::new(PositionStoreState::Unstarted),
                listeners: RwLock::new(Vec::new()),
                dirty: AtomicBool::new(false),
                persist_lock: tokio::sync::Mutex::new(()),
                exchange,
                scheduler: Mutex::new(None),
                metrics,
            }),
        }
    }

    pub fn state(&self) -> PositionStoreState {
        *self.inner.state.lock()
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Read the position file into memory (`Unstarted → Loaded`)
    ///
    /// A missing file means a fresh node and loads nothing. Entries already held
    /// in memory are only replaced by strictly newer versions, and the write clock
    /// resumes above every loaded version.
    pub async fn load(&self) -> ConnectorResult<()> {
        self.expect_state(PositionStoreState::Unstarted, "load")?;

        let applied = match file::read_snapshot(&self.inner.file).await? {
            Some(snapshot) => self.merge(snapshot.into_entries()),
            None => {
                info!(path = %self.inner.file.display(), "No position file found, starting empty");
                0
            }
        };

        *self.inner.state.lock() = PositionStoreState::Loaded;
        self.inner.metrics.set_position_count(self.len());
        info!(
            path = %self.inner.file.display(),
            loaded = applied,
            "Position table loaded"
        );
        Ok(())
    }

    /// Start periodic persistence and peer synchronization (`Loaded → Running`)
    pub fn start(&self) -> ConnectorResult<()> {
        self.expect_state(PositionStoreState::Loaded, "start")?;

        let mut scheduler = PeriodicScheduler::new(format!("position-store-{}", self.inner.node_id));

        let store = self.clone();
        scheduler.schedule_at_fixed_rate(
            "position-persist",
            self.inner.persist_interval,
            self.inner.persist_interval,
            move || {
                let store = store.clone();
                async move { store.flush().await }
            },
        );

        if self.inner.exchange.is_some() {
            let store = self.clone();
            scheduler.schedule_at_fixed_rate(
                "position-sync",
                self.inner.sync_interval,
                self.inner.sync_interval,
                move || {
                    let store = store.clone();
                    async move {
                        if let Err(e) = store.synchronize().await {
                            warn!("Position synchronization failed, retrying next tick: {}", e);
                        }
                    }
                },
            );
        }

        *self.inner.scheduler.lock() = Some(scheduler);
        *self.inner.state.lock() = PositionStoreState::Running;
        info!(node_id = %self.inner.node_id, "Position store started");
        Ok(())
    }

    /// Stop timers, wait for in-flight work, then persist one final time
    pub async fn stop(&self) -> ConnectorResult<()> {
        let state = self.state();
        if matches!(state, PositionStoreState::Unstarted | PositionStoreState::Stopped) {
            return Ok(());
        }

        let scheduler = self.inner.scheduler.lock().take();
        if let Some(mut scheduler) = scheduler {
            scheduler.shutdown().await;
        }

        *self.inner.state.lock() = PositionStoreState::Stopped;

        let result = self.persist().await;
        match &result {
            Ok(()) => info!(node_id = %self.inner.node_id, "Position store stopped"),
            Err(e) => error!("Final position persist failed: {}", e),
        }
        result
    }

    /// Current offset of a partition
    pub fn get(&self, partition: &RecordPartition) -> Option<RecordOffset> {
        self.inner
            .table
            .lock()
            .live(partition)
            .and_then(|entry| entry.offset.clone())
    }

    /// Current offset and version of a partition; removed partitions read as `None`
    pub fn get_entry(&self, partition: &RecordPartition) -> Option<PositionEntry> {
        self.inner.table.lock().live(partition).cloned()
    }

    /// Point-in-time copy of the whole table
    pub fn get_all(&self) -> PositionTable {
        self.inner
            .table
            .lock()
            .entries
            .iter()
            .filter_map(|(partition, entry)| {
                entry.offset.clone().map(|offset| (partition.clone(), offset))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.table.lock().live_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the offset of one partition
    pub fn put(&self, partition: RecordPartition, offset: RecordOffset) {
        self.put_all(std::iter::once((partition, offset)));
    }

    /// Overwrite several offsets; listeners are notified once for the batch
    pub fn put_all<I>(&self, positions: I)
    where
        I: IntoIterator<Item = (RecordPartition, RecordOffset)>,
    {
        let written = {
            let mut table = self.inner.table.lock();
            let mut written = 0usize;
            for (partition, offset) in positions {
                let version = table.next_version();
                table.entries.insert(partition, PositionEntry::new(offset, version));
                written += 1;
            }
            written
        };

        if written > 0 {
            self.mark_changed();
        }
    }

    /// Remove partitions, e.g. after they were unassigned from this node
    ///
    /// Each removed partition keeps a tombstone with a fresh version, which wins
    /// over any older copy a peer may still publish.
    pub fn remove(&self, partitions: &[RecordPartition]) {
        let removed = {
            let mut table = self.inner.table.lock();
            let mut removed = 0usize;
            for partition in partitions {
                if table.live(partition).is_none() {
                    continue;
                }
                let version = table.next_version();
                table
                    .entries
                    .insert(partition.clone(), PositionEntry::tombstone(version));
                removed += 1;
            }
            removed
        };

        if removed > 0 {
            debug!(removed, "Positions removed");
            self.mark_changed();
        }
    }

    /// Register a listener called after every change to the table
    pub fn register_listener(&self, listener: Arc<dyn PositionUpdateListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Durably write the full table
    ///
    /// Safe to call concurrently with reads, writes and other persists. On failure
    /// the table stays dirty so the next scheduled flush retries.
    pub async fn persist(&self) -> ConnectorResult<()> {
        let _guard = self.inner.persist_lock.lock().await;

        // Cleared before the snapshot so writes racing with it re-mark the table
        self.inner.dirty.store(false, Ordering::SeqCst);
        let snapshot = self.snapshot();
        let count = snapshot.positions.len();

        match file::write_snapshot(&self.inner.file, &snapshot).await {
            Ok(()) => {
                self.inner.metrics.record_persist(true);
                debug!(positions = count, "Position table persisted");
                Ok(())
            }
            Err(e) => {
                self.inner.dirty.store(true, Ordering::SeqCst);
                self.inner.metrics.record_persist(false);
                Err(e)
            }
        }
    }

    /// Persist only if something changed since the last successful persist
    pub async fn flush(&self) {
        if !self.inner.dirty.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.persist().await {
            error!("Failed to persist positions, retrying next tick: {}", e);
        }
    }

    /// Exchange snapshots with peers and merge theirs
    ///
    /// A peer's entry is applied only when its version is strictly newer than the
    /// local one. Returns the number of entries applied.
    pub async fn synchronize(&self) -> ConnectorResult<usize> {
        let Some(exchange) = self.inner.exchange.clone() else {
            return Ok(0);
        };

        let snapshot = self.snapshot();
        let result = async {
            exchange.publish(&snapshot).await?;
            let peers = exchange.collect(&self.inner.node_id).await?;

            let mut applied = 0;
            for peer in peers {
                let peer_id = peer.node_id.clone();
                let n = self.merge(peer.into_entries());
                if n > 0 {
                    debug!(peer = %peer_id, applied = n, "Merged newer positions from peer");
                }
                applied += n;
            }
            Ok::<usize, ConnectorError>(applied)
        }
        .await;

        match result {
            Ok(applied) => {
                self.inner.metrics.record_peer_sync(true, applied);
                if applied > 0 {
                    self.mark_changed();
                }
                Ok(applied)
            }
            Err(e) => {
                self.inner.metrics.record_peer_sync(false, 0);
                Err(e)
            }
        }
    }

    fn snapshot(&self) -> PositionSnapshot {
        let positions = self
            .inner
            .table
            .lock()
            .entries
            .iter()
            .map(|(partition, entry)| PersistedPosition {
                partition: partition.clone(),
                offset: entry.offset.clone(),
                version: entry.version,
            })
            .collect();
        PositionSnapshot::new(self.inner.node_id.clone(), positions)
    }

    fn merge<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (RecordPartition, PositionEntry)>,
    {
        let mut table = self.inner.table.lock();
        let mut applied = 0;
        for (partition, incoming) in entries {
            table.observe(incoming.version);
            let newer = table
                .entries
                .get(&partition)
                .map_or(true, |held| held.is_superseded_by(&incoming));
            if newer {
                table.entries.insert(partition, incoming);
                applied += 1;
            }
        }
        applied
    }

    fn mark_changed(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
        self.inner.metrics.set_position_count(self.len());

        let listeners: Vec<_> = self.inner.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.on_position_update();
        }
    }

    fn expect_state(&self, expected: PositionStoreState, operation: &str) -> ConnectorResult<()> {
        let state = self.state();
        if state != expected {
            return Err(ConnectorError::invalid_state(format!(
                "position store cannot {} in state {:?} (expected {:?})",
                operation, state, expected
            )));
        }
        Ok(())
    }
}
