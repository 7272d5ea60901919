use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::info;

use cluso_core::{error::Result, metrics::Metrics};

use super::table::MemTable;
use super::types::{MemTableConfig, MemTableManagerStats};
use crate::record::Record;

pub struct MemTableManager {
    active: RwLock<Arc<MemTable>>, // Active MemTable for writes
    immutable: RwLock<VecDeque<Arc<MemTable>>>, // Frozen tables awaiting flush, oldest first
    next_id: AtomicU64,
    config: MemTableConfig,
    metrics: Metrics,
}

impl MemTableManager {
    pub fn new(config: MemTableConfig, metrics: Metrics) -> Self {
        Self {
            active: RwLock::new(Arc::new(MemTable::new(1, config.clone()))),
            immutable: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(2),
            config,
            metrics,
        }
    }

    /// Write into the active table. Returns `true` when this write filled the
    /// table and it was rotated into the immutable queue.
    pub fn insert(&self, key: Bytes, record: Record) -> Result<bool> {
        let active = Arc::clone(&self.active.read());
        active.insert(key, record)?;

        if active.should_flush() {
            return Ok(self.rotate().is_some());
        }
        Ok(false)
    }

    /// Newest record for `key` across the active and immutable tables.
    pub fn get(&self, key: &[u8]) -> Option<Record> {
        if let Some(record) = self.active.read().get(key) {
            return Some(record);
        }

        self.immutable
            .read()
            .iter()
            .rev()
            .find_map(|table| table.get(key))
    }

    /// Freeze the active table and queue it for flushing. Returns `None` when
    /// the active table is empty.
    pub fn rotate(&self) -> Option<Arc<MemTable>> {
        let mut active = self.active.write();
        if active.is_empty() {
            return None;
        }

        active.set_read_only();
        let frozen = Arc::clone(&active);
        self.immutable.write().push_back(Arc::clone(&frozen));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *active = Arc::new(MemTable::new(id, self.config.clone()));

        info!(
            "Rotated MemTable {} ({} entries, {} bytes)",
            frozen.id(),
            frozen.len(),
            frozen.size_bytes()
        );
        self.metrics.record_memtable_rotation();
        Some(frozen)
    }

    /// Oldest frozen table. It stays visible to readers until [`Self::remove_flushed`].
    pub fn oldest_immutable(&self) -> Option<Arc<MemTable>> {
        self.immutable.read().front().cloned()
    }

    /// Drop a flushed table from the queue once its SSTable is installed.
    pub fn remove_flushed(&self, id: u64) {
        self.immutable.write().retain(|t| t.id() != id);
    }

    pub fn immutable_count(&self) -> usize {
        self.immutable.read().len()
    }

    /// Whether the immutable queue has outgrown its bound and writers must flush inline.
    pub fn needs_inline_flush(&self) -> bool {
        self.immutable_count() > self.config.max_immutable
    }

    /// Every table, newest first. Readers take this once so a concurrent rotation
    /// or flush cannot hide entries from them.
    pub fn tables(&self) -> Vec<Arc<MemTable>> {
        let active = Arc::clone(&self.active.read());
        let immutable = self.immutable.read();
        std::iter::once(active)
            .chain(immutable.iter().rev().cloned())
            .collect()
    }

    pub fn stats(&self) -> MemTableManagerStats {
        MemTableManagerStats {
            active: self.active.read().stats(),
            immutable: self.immutable.read().iter().map(|t| t.stats()).collect(),
        }
    }
}
