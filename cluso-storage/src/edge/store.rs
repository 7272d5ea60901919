//! Disk-backed adjacency lists with an LRU cache in front.
//!
//! Each list is a [`CompressedEdgeList`] stored in the key-value engine under
//! `edges:{out|in}:{node_id}`. Reads try the cache, then the engine, and
//! populate the cache on a miss. Writes read the engine, write it, and only
//! then replace the cached copy, so a stale cached list can never be written
//! back. A miss fill that raced with a write is dropped rather than cached.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use cluso_core::{
    error::Result,
    metrics::Metrics,
    traits::KeyValueStore,
    types::{Direction, NodeId},
};

use super::compression::CompressedEdgeList;
use super::pool::EdgeCodec;
use super::{AdjacencyStore, EdgeCacheStats, EdgeCompressionStats};

const KEY_PREFIX: &[u8] = b"edges:";
const KEY_END: &[u8] = b"edges;";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub node_id: NodeId,
    pub direction: Direction,
}

impl EdgeKey {
    pub fn new(node_id: NodeId, direction: Direction) -> Self {
        Self { node_id, direction }
    }

    /// Engine key, e.g. `edges:out:42`.
    pub fn storage_key(&self) -> String {
        format!("edges:{}:{}", self.direction.as_key_segment(), self.node_id)
    }
}

pub struct EdgeStore {
    engine: Arc<dyn KeyValueStore>,
    cache: Mutex<LruCache<EdgeKey, Arc<CompressedEdgeList>>>,
    capacity: usize,
    codec: EdgeCodec,
    /// Serializes read-modify-write of a list.
    write_lock: Mutex<()>,
    /// Bumped under the cache lock by every write.
    write_epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    metrics: Metrics,
}

impl EdgeStore {
    pub fn new(engine: Arc<dyn KeyValueStore>, cache_size: usize, metrics: Metrics) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            engine,
            cache: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            codec: EdgeCodec::default(),
            write_lock: Mutex::new(()),
            write_epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn get_outgoing_edges(&self, node_id: NodeId) -> Result<Vec<u64>> {
        self.load(EdgeKey::new(node_id, Direction::Outgoing))?.decompress()
    }

    pub fn get_incoming_edges(&self, node_id: NodeId) -> Result<Vec<u64>> {
        self.load(EdgeKey::new(node_id, Direction::Incoming))?.decompress()
    }

    /// The cached or stored list. A node without a stored list has an empty one.
    pub fn load(&self, key: EdgeKey) -> Result<Arc<CompressedEdgeList>> {
        if let Some(list) = self.cache.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_edge_cache(true);
            return Ok(Arc::clone(list));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_edge_cache(false);

        let epoch = self.write_epoch.load(Ordering::Acquire);
        let Some(list) = self.fetch(key)? else {
            return Ok(Arc::new(CompressedEdgeList::empty()));
        };
        let list = Arc::new(list);
        let mut cache = self.cache.lock();
        // A write since `epoch` may have replaced what we read.
        if self.write_epoch.load(Ordering::Acquire) == epoch {
            self.push_locked(&mut cache, key, Arc::clone(&list));
        }
        Ok(list)
    }

    /// The stored list, bypassing the cache.
    fn fetch(&self, key: EdgeKey) -> Result<Option<CompressedEdgeList>> {
        match self.engine.get(key.storage_key().as_bytes())? {
            Some(data) => CompressedEdgeList::from_bytes(&data).map(Some),
            None => Ok(None),
        }
    }

    pub fn add_edge(&self, node_id: NodeId, direction: Direction, id: u64) -> Result<()> {
        let key = EdgeKey::new(node_id, direction);
        let _guard = self.write_lock.lock();
        let current = self.fetch(key)?.unwrap_or_else(CompressedEdgeList::empty);
        if current.contains(id)? {
            return Ok(());
        }
        let updated = self.codec.insert(&current, id)?;
        self.write(key, updated)
    }

    pub fn remove_edge(&self, node_id: NodeId, direction: Direction, id: u64) -> Result<()> {
        let key = EdgeKey::new(node_id, direction);
        let _guard = self.write_lock.lock();
        let Some(current) = self.fetch(key)? else {
            return Ok(());
        };
        if !current.contains(id)? {
            return Ok(());
        }
        let updated = self.codec.remove(&current, id)?;
        if updated.is_empty() {
            return self.delete(key);
        }
        self.write(key, updated)
    }

    /// Replace the whole list.
    pub fn store_edges(&self, node_id: NodeId, direction: Direction, ids: &[u64]) -> Result<()> {
        let key = EdgeKey::new(node_id, direction);
        let _guard = self.write_lock.lock();
        if ids.is_empty() {
            return self.delete(key);
        }
        let list = self.codec.compress(ids)?;
        self.write(key, list)
    }

    pub fn delete_edges(&self, node_id: NodeId, direction: Direction) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.delete(EdgeKey::new(node_id, direction))
    }

    fn write(&self, key: EdgeKey, list: CompressedEdgeList) -> Result<()> {
        self.engine.put(key.storage_key().as_bytes(), &list.to_bytes())?;
        let mut cache = self.cache.lock();
        self.write_epoch.fetch_add(1, Ordering::AcqRel);
        self.push_locked(&mut cache, key, Arc::new(list));
        Ok(())
    }

    fn delete(&self, key: EdgeKey) -> Result<()> {
        self.engine.delete(key.storage_key().as_bytes())?;
        let mut cache = self.cache.lock();
        self.write_epoch.fetch_add(1, Ordering::AcqRel);
        cache.pop(&key);
        Ok(())
    }

    fn push_locked(
        &self,
        cache: &mut LruCache<EdgeKey, Arc<CompressedEdgeList>>,
        key: EdgeKey,
        list: Arc<CompressedEdgeList>,
    ) {
        if let Some((evicted, _)) = cache.push(key, list) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_edge_cache_eviction();
            }
        }
    }

    /// Size of every stored list against plain `u64` arrays. Reads the
    /// engine, not the cache.
    pub fn compression_stats(&self) -> Result<EdgeCompressionStats> {
        let mut stats = EdgeCompressionStats::default();
        for (_, data) in self.engine.scan(KEY_PREFIX, KEY_END)? {
            stats.add(&CompressedEdgeList::from_bytes(&data)?);
        }
        Ok(stats)
    }

    pub fn cache_stats(&self) -> EdgeCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        EdgeCacheStats {
            entries: self.cache.lock().len(),
            capacity: self.capacity,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
        }
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock();
        debug!("Clearing {} cached edge list(s)", cache.len());
        cache.clear();
    }

    /// Whether `key` is currently cached, without touching its recency.
    pub fn is_cached(&self, key: &EdgeKey) -> bool {
        self.cache.lock().contains(key)
    }
}

impl AdjacencyStore for EdgeStore {
    fn get_edges(&self, node_id: NodeId, direction: Direction) -> Result<Vec<u64>> {
        self.load(EdgeKey::new(node_id, direction))?.decompress()
    }

    fn add_edge(&self, node_id: NodeId, direction: Direction, id: u64) -> Result<()> {
        EdgeStore::add_edge(self, node_id, direction, id)
    }

    fn remove_edge(&self, node_id: NodeId, direction: Direction, id: u64) -> Result<()> {
        EdgeStore::remove_edge(self, node_id, direction, id)
    }

    fn store_edges(&self, node_id: NodeId, direction: Direction, ids: &[u64]) -> Result<()> {
        EdgeStore::store_edges(self, node_id, direction, ids)
    }

    fn delete_edges(&self, node_id: NodeId, direction: Direction) -> Result<()> {
        EdgeStore::delete_edges(self, node_id, direction)
    }

    fn flush(&self) -> Result<()> {
        self.engine.flush()
    }

    fn cache_stats(&self) -> Option<EdgeCacheStats> {
        Some(EdgeStore::cache_stats(self))
    }

    fn clear_cache(&self) {
        EdgeStore::clear_cache(self)
    }

    fn compression_stats(&self) -> Result<Option<EdgeCompressionStats>> {
        EdgeStore::compression_stats(self).map(Some)
    }
}
