//! # Metrics and Monitoring
//!
//! Lock-free counters shared by the WAL, the LSM engine and the graph layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // WAL
    wal_appends: AtomicU64,
    wal_bytes: AtomicU64,
    wal_syncs: AtomicU64,
    wal_replayed: AtomicU64,

    // LSM
    memtable_rotations: AtomicU64,
    memtable_flushes: AtomicU64,
    compactions: AtomicU64,
    compaction_failures: AtomicU64,
    block_cache_hits: AtomicU64,
    block_cache_misses: AtomicU64,
    bloom_negatives: AtomicU64,

    // Edge store
    edge_cache_hits: AtomicU64,
    edge_cache_misses: AtomicU64,
    edge_cache_evictions: AtomicU64,

    // Graph
    nodes_created: AtomicU64,
    nodes_deleted: AtomicU64,
    edges_created: AtomicU64,
    edges_deleted: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    snapshots: AtomicU64,
}

/// Plain copy of every counter at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub wal_appends: u64,
    pub wal_bytes: u64,
    pub wal_syncs: u64,
    pub wal_replayed: u64,
    pub memtable_rotations: u64,
    pub memtable_flushes: u64,
    pub compactions: u64,
    pub compaction_failures: u64,
    pub block_cache_hits: u64,
    pub block_cache_misses: u64,
    pub bloom_negatives: u64,
    pub edge_cache_hits: u64,
    pub edge_cache_misses: u64,
    pub edge_cache_evictions: u64,
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub edges_created: u64,
    pub edges_deleted: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub snapshots: u64,
}

macro_rules! bump {
    ($counter:expr) => {
        $counter.fetch_add(1, Ordering::Relaxed)
    };
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a WAL append of `count` records totalling `bytes`.
    pub fn record_wal_append(&self, count: u64, bytes: u64) {
        self.inner.wal_appends.fetch_add(count, Ordering::Relaxed);
        self.inner.wal_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_wal_sync(&self) {
        bump!(self.inner.wal_syncs);
    }

    pub fn record_wal_replayed(&self, count: u64) {
        self.inner.wal_replayed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_memtable_rotation(&self) {
        bump!(self.inner.memtable_rotations);
    }

    /// Record memtable flush
    pub fn record_flush(&self) {
        bump!(self.inner.memtable_flushes);
    }

    /// Record compaction
    pub fn record_compaction(&self) {
        bump!(self.inner.compactions);
    }

    pub fn record_compaction_failure(&self) {
        bump!(self.inner.compaction_failures);
    }

    pub fn record_block_cache(&self, hit: bool) {
        if hit {
            bump!(self.inner.block_cache_hits);
        } else {
            bump!(self.inner.block_cache_misses);
        }
    }

    pub fn record_bloom_negative(&self) {
        bump!(self.inner.bloom_negatives);
    }

    pub fn record_edge_cache(&self, hit: bool) {
        if hit {
            bump!(self.inner.edge_cache_hits);
        } else {
            bump!(self.inner.edge_cache_misses);
        }
    }

    pub fn record_edge_cache_eviction(&self) {
        bump!(self.inner.edge_cache_evictions);
    }

    pub fn record_node_created(&self) {
        bump!(self.inner.nodes_created);
    }

    pub fn record_node_deleted(&self) {
        bump!(self.inner.nodes_deleted);
    }

    pub fn record_edge_created(&self) {
        bump!(self.inner.edges_created);
    }

    pub fn record_edge_deleted(&self) {
        bump!(self.inner.edges_deleted);
    }

    pub fn record_batch(&self, committed: bool) {
        if committed {
            bump!(self.inner.batches_committed);
        } else {
            bump!(self.inner.batches_failed);
        }
    }

    pub fn record_snapshot(&self) {
        bump!(self.inner.snapshots);
    }

    /// Get metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let i = &self.inner;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            wal_appends: load(&i.wal_appends),
            wal_bytes: load(&i.wal_bytes),
            wal_syncs: load(&i.wal_syncs),
            wal_replayed: load(&i.wal_replayed),
            memtable_rotations: load(&i.memtable_rotations),
            memtable_flushes: load(&i.memtable_flushes),
            compactions: load(&i.compactions),
            compaction_failures: load(&i.compaction_failures),
            block_cache_hits: load(&i.block_cache_hits),
            block_cache_misses: load(&i.block_cache_misses),
            bloom_negatives: load(&i.bloom_negatives),
            edge_cache_hits: load(&i.edge_cache_hits),
            edge_cache_misses: load(&i.edge_cache_misses),
            edge_cache_evictions: load(&i.edge_cache_evictions),
            nodes_created: load(&i.nodes_created),
            nodes_deleted: load(&i.nodes_deleted),
            edges_created: load(&i.edges_created),
            edges_deleted: load(&i.edges_deleted),
            batches_committed: load(&i.batches_committed),
            batches_failed: load(&i.batches_failed),
            snapshots: load(&i.snapshots),
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Metrics").field(&self.snapshot()).finish()
    }
}
