use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use cluso_core::{
    config::DatabaseConfig,
    error::{Error, Result},
    metrics::Metrics,
    traits::KeyValueStore,
    types::{Direction, Edge, EdgeId, GraphStats, Node, NodeId, Properties},
    utils::now_secs,
    value::{Value, ValueType},
};

use crate::edge::{
    AdjacencyStore, EdgeCacheStats, EdgeCompressionStats, EdgeStore, MemoryAdjacency,
};
use crate::engine::{LsmConfig, LsmEngine, LsmStats};
use crate::shard::ShardLockManager;
use crate::wal::{WalConfig, WalStats, WalSubscription, WriteAheadLog};
use crate::workers::Ticker;

use super::batch::Batch;
use super::index::{GraphIndexes, IndexStatistics};
use super::mutation::Mutation;
use super::snapshot::{self, SnapshotInfo};
use super::validate::Overlay;

/// Entities whose IDs route to one lock shard.
#[derive(Default)]
pub(super) struct Shard {
    pub nodes: HashMap<NodeId, Node>,
    pub edges: HashMap<EdgeId, Edge>,
    /// Committed entities that were later deleted. IDs are never reused.
    pub deleted_nodes: HashSet<NodeId>,
    pub deleted_edges: HashSet<EdgeId>,
}

/// State shared between the handle and its background snapshot ticker.
pub(super) struct GraphInner {
    pub config: DatabaseConfig,
    pub shards: ShardLockManager<Shard>,
    /// Never locked while a shard lock is held, nor the other way round.
    pub indexes: RwLock<GraphIndexes>,
    pub adjacency: Arc<dyn AdjacencyStore>,
    pub lsm: Option<Arc<LsmEngine>>,
    pub wal: WriteAheadLog,
    /// Next ID to hand out. Every ID below it has been allocated at some point.
    pub next_node_id: AtomicU64,
    pub next_edge_id: AtomicU64,
    pub node_count: AtomicU64,
    pub edge_count: AtomicU64,
    pub bulk_import: AtomicBool,
    pub last_snapshot_lsn: AtomicU64,
    pub snapshot_lock: Mutex<()>,
    pub closed: AtomicBool,
    pub metrics: Metrics,
}

/// Handle to an open graph database.
///
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │                        GraphStorage                          │
/// │                                                              │
/// │  write ─▶ write lock ─▶ validate ─▶ WAL append ─▶ apply      │
/// │                                                   │          │
/// │                 ┌─────────────────┬───────────────┤          │
/// │                 ▼                 ▼               ▼          │
/// │          shards (N x RwLock)   indexes     adjacency store   │
/// │                 ▲                              (LSM / mem)   │
/// │  read ──────────┘ one shard read lock                        │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// `close` writes a final snapshot. Dropping the handle without closing it
/// releases every resource but leaves recovery to WAL replay on the next open.
pub struct GraphStorage {
    inner: Arc<GraphInner>,
    ticker: Mutex<Option<Ticker>>,
}

impl GraphStorage {
    /// Open (or create) the database under `config.data_dir`.
    ///
    /// Recovery loads the newest snapshot, then replays every WAL entry logged
    /// after it. Corruption found on the way is returned, never skipped.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir).map_err(|e| {
            Error::io(format!("Failed to create data directory {:?}", config.data_dir), e)
        })?;
        fs::create_dir_all(config.snapshot_dir())?;

        let metrics = Metrics::new();
        let (adjacency, lsm, adjacency_is_fresh) = open_adjacency(&config, &metrics)?;

        let wal_config = WalConfig {
            max_file_size: config.wal_max_file_size_mb * 1024 * 1024,
            sync_on_write: config.sync_writes,
            compression: config.wal_compression,
            group_commit_delay_us: config.group_commit_delay_us,
            ..WalConfig::default()
        };
        let wal = WriteAheadLog::open(config.wal_dir(), wal_config, metrics.clone())?;

        let shards = ShardLockManager::new(config.shard_count, config.sharding)?;
        let inner = Arc::new(GraphInner {
            shards,
            indexes: RwLock::new(GraphIndexes::default()),
            adjacency,
            lsm,
            wal,
            next_node_id: AtomicU64::new(1),
            next_edge_id: AtomicU64::new(1),
            node_count: AtomicU64::new(0),
            edge_count: AtomicU64::new(0),
            bulk_import: AtomicBool::new(config.bulk_import_mode),
            last_snapshot_lsn: AtomicU64::new(0),
            snapshot_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            metrics,
            config,
        });

        let snapshot_lsn = inner.load_latest_snapshot()?;
        if adjacency_is_fresh {
            inner.rebuild_adjacency()?;
        }
        let replayed = inner.replay_wal(snapshot_lsn)?;
        inner.wal.ensure_next_lsn(snapshot_lsn + 1);

        info!(
            "Opened graph storage at {:?}: {} node(s), {} edge(s), snapshot LSN {}, {} WAL entr(ies) replayed",
            inner.config.data_dir,
            inner.node_count.load(Ordering::Relaxed),
            inner.edge_count.load(Ordering::Relaxed),
            snapshot_lsn,
            replayed
        );

        let storage = Self {
            inner,
            ticker: Mutex::new(None),
        };
        if let Some(secs) = storage.inner.config.snapshot_interval_secs {
            storage.start_snapshot_ticker(Duration::from_secs(secs.max(1)))?;
        }
        Ok(storage)
    }

    /// Materialize `snapshot_file` into the empty data directory named by
    /// `config` and open it.
    pub fn restore(snapshot_file: impl AsRef<Path>, config: DatabaseConfig) -> Result<Self> {
        let snapshot_file = snapshot_file.as_ref();
        let data = snapshot::read_snapshot(snapshot_file)?;

        if config.wal_dir().exists() || config.lsm_dir().exists() {
            return Err(Error::InvalidArgument {
                message: format!(
                    "restore target {:?} already holds a database",
                    config.data_dir
                ),
            });
        }
        if !snapshot::list_snapshots(&config.snapshot_dir())?.is_empty() {
            return Err(Error::InvalidArgument {
                message: format!("restore target {:?} already holds snapshots", config.data_dir),
            });
        }

        let path = snapshot::write_snapshot(&config.snapshot_dir(), &data)?;
        info!(
            "Restored snapshot {:?} (LSN {}) to {:?}",
            snapshot_file, data.lsn, path
        );
        // A fresh adjacency store is rebuilt from the snapshot's edges on open.
        Self::open(config)
    }

    fn start_snapshot_ticker(&self, interval: Duration) -> Result<()> {
        let weak: Weak<GraphInner> = Arc::downgrade(&self.inner);
        let ticker = Ticker::start("cluso-snapshot", interval, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.closed.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = inner.take_snapshot() {
                error!("Periodic snapshot failed: {}", e);
            }
        })?;
        *self.ticker.lock() = Some(ticker);
        Ok(())
    }

    /// Stop background work, write a final snapshot and flush everything.
    /// Later calls are no-ops; every other operation then fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
        info!("Closing graph storage at {:?}", self.inner.config.data_dir);

        // Writers re-check `closed` under the write lock, so none lands after this.
        self.inner.take_snapshot()?;
        if let Some(lsm) = &self.inner.lsm {
            lsm.close()?;
        }
        self.inner.wal.sync()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------- nodes

    pub fn create_node<I, S>(&self, labels: I, properties: Properties) -> Result<Node>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.check_open()?;
        let id = self.inner.allocate_node_id();
        self.inner.commit(Mutation::CreateNode {
            id,
            labels: normalize_labels(labels),
            properties,
            timestamp: now_secs(),
        })?;
        self.get_node(id)
    }

    pub fn get_node(&self, id: NodeId) -> Result<Node> {
        self.inner.check_open()?;
        self.inner.node(id).ok_or(Error::NotFound { entity: "node", id })
    }

    /// Merge `properties` into node `id` and return the updated node.
    pub fn update_node(&self, id: NodeId, properties: Properties) -> Result<Node> {
        self.inner.check_open()?;
        self.inner.commit(Mutation::UpdateNode {
            id,
            properties,
            timestamp: now_secs(),
        })?;
        self.get_node(id)
    }

    /// Replace the labels of node `id`.
    pub fn set_node_labels<I, S>(&self, id: NodeId, labels: I) -> Result<Node>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.check_open()?;
        self.inner.commit(Mutation::SetNodeLabels {
            id,
            labels: normalize_labels(labels),
            timestamp: now_secs(),
        })?;
        self.get_node(id)
    }

    /// Delete node `id` together with every edge touching it.
    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        self.inner.check_open()?;
        self.inner.commit(Mutation::DeleteNode { id })
    }

    // ---------------------------------------------------------------- edges

    pub fn create_edge(
        &self,
        from: NodeId,
        to: NodeId,
        edge_type: impl Into<String>,
        properties: Properties,
        weight: f64,
    ) -> Result<Edge> {
        self.inner.check_open()?;
        let id = self.inner.allocate_edge_id();
        self.inner.commit(Mutation::CreateEdge {
            id,
            from,
            to,
            edge_type: edge_type.into(),
            properties,
            weight,
            timestamp: now_secs(),
        })?;
        self.get_edge(id)
    }

    pub fn get_edge(&self, id: EdgeId) -> Result<Edge> {
        self.inner.check_open()?;
        self.inner.edge(id).ok_or(Error::NotFound { entity: "edge", id })
    }

    /// Merge `properties` into edge `id`, replacing its weight when given.
    pub fn update_edge(
        &self,
        id: EdgeId,
        properties: Properties,
        weight: Option<f64>,
    ) -> Result<Edge> {
        self.inner.check_open()?;
        self.inner.commit(Mutation::UpdateEdge {
            id,
            properties,
            weight,
        })?;
        self.get_edge(id)
    }

    pub fn delete_edge(&self, id: EdgeId) -> Result<()> {
        self.inner.check_open()?;
        self.inner.commit(Mutation::DeleteEdge { id })
    }

    /// Edges leaving `node_id`, ordered by edge ID. Empty for an unknown node.
    pub fn get_outgoing_edges(&self, node_id: NodeId) -> Result<Vec<Edge>> {
        self.inner.check_open()?;
        self.inner.adjacent_edges(node_id, Direction::Outgoing)
    }

    /// Edges arriving at `node_id`, ordered by edge ID. Empty for an unknown node.
    pub fn get_incoming_edges(&self, node_id: NodeId) -> Result<Vec<Edge>> {
        self.inner.check_open()?;
        self.inner.adjacent_edges(node_id, Direction::Incoming)
    }

    // -------------------------------------------------------------- queries

    pub fn find_nodes_by_label(&self, label: &str) -> Result<Vec<Node>> {
        self.inner.check_open()?;
        let ids = self.inner.indexes.read().nodes_with_label(label);
        Ok(self.inner.nodes(ids))
    }

    pub fn find_edges_by_type(&self, edge_type: &str) -> Result<Vec<Edge>> {
        self.inner.check_open()?;
        let ids = self.inner.indexes.read().edges_with_type(edge_type);
        Ok(ids.into_iter().filter_map(|id| self.inner.edge(id)).collect())
    }

    /// Nodes whose `property` equals `value`. Uses a property index when one
    /// of the right type exists, otherwise scans every shard.
    pub fn find_nodes_by_property(&self, property: &str, value: &Value) -> Result<Vec<Node>> {
        self.inner.check_open()?;
        let indexed = {
            let indexes = self.inner.indexes.read();
            match indexes.property_index(property) {
                Ok(index) if index.value_type() == value.value_type() => {
                    Some(index.lookup(value)?)
                }
                _ => None,
            }
        };
        if let Some(ids) = indexed {
            return Ok(self.inner.nodes(ids));
        }

        let mut found = Vec::new();
        self.inner.shards.for_each_shard(|shard| {
            found.extend(
                shard
                    .nodes
                    .values()
                    .filter(|node| node.property(property) == Some(value))
                    .cloned(),
            );
        });
        found.sort_by_key(|node| node.id);
        Ok(found)
    }

    /// Index `property` for values of `value_type`, including existing nodes.
    pub fn create_property_index(&self, property: &str, value_type: ValueType) -> Result<()> {
        self.inner.check_open()?;
        self.inner.commit(Mutation::CreatePropertyIndex {
            property: property.to_string(),
            value_type,
        })
    }

    pub fn drop_property_index(&self, property: &str) -> Result<()> {
        self.inner.check_open()?;
        self.inner.commit(Mutation::DropPropertyIndex {
            property: property.to_string(),
        })
    }

    /// Indexed equality lookup. Fails when `property` has no index.
    pub fn lookup_property(&self, property: &str, value: &Value) -> Result<Vec<Node>> {
        self.inner.check_open()?;
        let ids = self.inner.indexes.read().property_index(property)?.lookup(value)?;
        Ok(self.inner.nodes(ids))
    }

    /// Nodes whose indexed `property` lies in `[start, end]`, in value order.
    pub fn lookup_property_range(
        &self,
        property: &str,
        start: &Value,
        end: &Value,
    ) -> Result<Vec<Node>> {
        self.inner.check_open()?;
        let ids = self
            .inner
            .indexes
            .read()
            .property_index(property)?
            .range(start, end)?;
        Ok(self.inner.nodes_in_order(ids))
    }

    /// Nodes whose indexed string `property` starts with `prefix`.
    pub fn lookup_property_prefix(&self, property: &str, prefix: &str) -> Result<Vec<Node>> {
        self.inner.check_open()?;
        let ids = self
            .inner
            .indexes
            .read()
            .property_index(property)?
            .prefix(prefix)?;
        Ok(self.inner.nodes_in_order(ids))
    }

    pub fn index_statistics(&self) -> BTreeMap<String, IndexStatistics> {
        self.inner.indexes.read().statistics()
    }

    pub fn statistics(&self) -> GraphStats {
        let inner = &self.inner;
        let indexes = inner.indexes.read();
        GraphStats {
            node_count: inner.node_count.load(Ordering::Relaxed),
            edge_count: inner.edge_count.load(Ordering::Relaxed),
            label_count: indexes.label_count(),
            edge_type_count: indexes.edge_type_count(),
            property_indexes: indexes.property_index_count(),
            current_lsn: inner.wal.last_lsn(),
            last_snapshot_lsn: inner.last_snapshot_lsn.load(Ordering::Relaxed),
            next_node_id: inner.next_node_id.load(Ordering::Relaxed),
            next_edge_id: inner.next_edge_id.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------ batches and lifecycle

    pub fn begin_batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    /// Write a snapshot of the current state and truncate the WAL behind it.
    pub fn snapshot(&self) -> Result<SnapshotInfo> {
        self.inner.check_open()?;
        self.inner.take_snapshot()
    }

    /// Stop logging mutations. Nothing written until [`Self::finish_bulk_import`]
    /// survives a crash.
    pub fn begin_bulk_import(&self) -> Result<()> {
        self.inner.check_open()?;
        let _guard = self.inner.shards.lock_writes();
        if !self.inner.bulk_import.swap(true, Ordering::AcqRel) {
            info!("Bulk import started; WAL appends are suspended");
        }
        Ok(())
    }

    /// Resume logging and make the bulk-loaded data durable with a snapshot.
    pub fn finish_bulk_import(&self) -> Result<SnapshotInfo> {
        self.inner.check_open()?;
        let info = self.inner.take_snapshot()?;
        self.inner.bulk_import.store(false, Ordering::Release);
        info!(
            "Bulk import finished: {} node(s), {} edge(s) captured at LSN {}",
            info.node_count, info.edge_count, info.lsn
        );
        Ok(info)
    }

    pub fn is_bulk_import(&self) -> bool {
        self.inner.bulk_import.load(Ordering::Acquire)
    }

    /// Change feed of committed mutations, starting at `from_lsn`. Decode
    /// entries with [`Mutation::from_entry`].
    pub fn subscribe_wal(&self, from_lsn: u64) -> Result<WalSubscription> {
        self.inner.check_open()?;
        self.inner.wal.subscribe(from_lsn)
    }

    /// LSN of the newest logged mutation.
    pub fn current_lsn(&self) -> u64 {
        self.inner.wal.last_lsn()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn edge_cache_stats(&self) -> Option<EdgeCacheStats> {
        self.inner.adjacency.cache_stats()
    }

    /// Drop every cached adjacency list. Later reads go to the engine.
    pub fn clear_edge_cache(&self) {
        self.inner.adjacency.clear_cache();
    }

    /// Sizes of the stored adjacency lists, when edge compression is on.
    pub fn edge_compression_stats(&self) -> Result<Option<EdgeCompressionStats>> {
        self.inner.check_open()?;
        self.inner.adjacency.compression_stats()
    }

    /// Entries and bytes appended to the WAL since open.
    pub fn wal_stats(&self) -> WalStats {
        self.inner.wal.stats()
    }

    /// Statistics of the adjacency LSM engine, when edge compression is on.
    pub fn lsm_stats(&self) -> Option<LsmStats> {
        self.inner.lsm.as_ref().map(|lsm| lsm.stats())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub(super) fn inner(&self) -> &GraphInner {
        &self.inner
    }
}

impl Drop for GraphStorage {
    fn drop(&mut self) {
        if let Some(mut ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(
                "Graph storage at {:?} dropped without close; WAL replay recovers it",
                self.inner.config.data_dir
            );
        }
    }
}

impl GraphInner {
    pub(super) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    pub(super) fn allocate_node_id(&self) -> NodeId {
        self.next_node_id.fetch_add(1, Ordering::AcqRel)
    }

    pub(super) fn allocate_edge_id(&self) -> EdgeId {
        self.next_edge_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Validate, log and apply one mutation under the write lock.
    ///
    /// With group commit the record is written but not synced under the lock;
    /// the caller then waits outside it for a shared fsync covering its LSN.
    pub(super) fn commit(&self, mutation: Mutation) -> Result<()> {
        let pending = {
            let _guard = self.shards.lock_writes();
            self.check_open()?;

            let is_batch = matches!(mutation, Mutation::Batch { .. });
            if let Err(e) = self.validate(&mutation, &mut Overlay::default()) {
                if is_batch {
                    self.metrics.record_batch(false);
                }
                return Err(e);
            }

            let mut pending = None;
            if !self.bulk_import.load(Ordering::Acquire) {
                let payload = mutation.encode()?;
                if self.config.wal_group_commit {
                    pending = Some(self.wal.append_deferred(mutation.op_type(), payload)?);
                } else {
                    self.wal.append(mutation.op_type(), payload)?;
                }
            }
            self.apply(&mutation)?;

            if is_batch {
                self.metrics.record_batch(true);
            }
            pending
        };

        if let Some(lsn) = pending {
            self.wal.sync_through(lsn)?;
        }
        Ok(())
    }

    pub(super) fn node(&self, id: NodeId) -> Option<Node> {
        self.shards.read(id).nodes.get(&id).cloned()
    }

    pub(super) fn edge(&self, id: EdgeId) -> Option<Edge> {
        self.shards.read(id).edges.get(&id).cloned()
    }

    pub(super) fn node_exists(&self, id: NodeId) -> bool {
        self.shards.read(id).nodes.contains_key(&id)
    }

    /// Nodes for `ids`, skipping any deleted meanwhile, sorted by ID.
    fn nodes(&self, mut ids: Vec<NodeId>) -> Vec<Node> {
        ids.sort_unstable();
        self.nodes_in_order(ids)
    }

    fn nodes_in_order(&self, ids: Vec<NodeId>) -> Vec<Node> {
        ids.into_iter().filter_map(|id| self.node(id)).collect()
    }

    fn adjacent_edges(&self, node_id: NodeId, direction: Direction) -> Result<Vec<Edge>> {
        let ids = self.adjacency.get_edges(node_id, direction)?;
        // A list may briefly name an edge whose delete is still being applied.
        Ok(ids.into_iter().filter_map(|id| self.edge(id)).collect())
    }

    /// Rewrite every adjacency list from the edges held in memory.
    pub(super) fn rebuild_adjacency(&self) -> Result<()> {
        let mut lists: HashMap<(NodeId, Direction), Vec<u64>> = HashMap::new();
        self.shards.for_each_shard(|shard| {
            for edge in shard.edges.values() {
                lists
                    .entry((edge.from, Direction::Outgoing))
                    .or_default()
                    .push(edge.id);
                lists
                    .entry((edge.to, Direction::Incoming))
                    .or_default()
                    .push(edge.id);
            }
        });

        let count = lists.len();
        for ((node_id, direction), ids) in lists {
            self.adjacency.store_edges(node_id, direction, &ids)?;
        }
        if count > 0 {
            info!("Rebuilt {} adjacency list(s)", count);
        }
        Ok(())
    }
}

/// Adjacency backend chosen by `enable_edge_compression`. The flag is true
/// when the store starts out empty and must be rebuilt from the graph.
fn open_adjacency(
    config: &DatabaseConfig,
    metrics: &Metrics,
) -> Result<(Arc<dyn AdjacencyStore>, Option<Arc<LsmEngine>>, bool)> {
    if !config.enable_edge_compression {
        return Ok((Arc::new(MemoryAdjacency::new()), None, true));
    }

    let fresh = !config.lsm_dir().exists();
    if fresh && config.wal_dir().exists() {
        warn!(
            "Adjacency store at {:?} is missing; rebuilding it from the graph",
            config.lsm_dir()
        );
    }
    let mut lsm_config = LsmConfig::from_database_config(config);
    // The graph WAL already covers every adjacency write.
    lsm_config.wal_enabled = false;
    let lsm = Arc::new(LsmEngine::open(lsm_config, metrics.clone())?);

    let engine: Arc<dyn KeyValueStore> = lsm.clone();
    let store = EdgeStore::new(engine, config.edge_cache_size, metrics.clone());
    Ok((Arc::new(store), Some(lsm), fresh))
}

fn normalize_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for label in labels {
        let label = label.into();
        if !out.contains(&label) {
            out.push(label);
        }
    }
    out
}
