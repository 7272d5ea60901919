//! # Open Table Pool
//!
//! LRU pool of open SSTable readers. Every reader holds a memory mapping plus its
//! parsed index and bloom filter; the pool bounds how many stay resident so a
//! store with thousands of tables does not exhaust mappings or memory.
//! Evicted readers are reopened on their next use.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use cluso_core::error::Result;

use crate::cache::BlockCache;
use crate::sstable::SSTableReader;

#[derive(Debug, Clone)]
pub struct FdConfig {
    /// Max SSTable readers to keep open
    pub max_open_sstables: usize,
}

impl Default for FdConfig {
    fn default() -> Self {
        Self {
            max_open_sstables: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdStats {
    pub open_sstables: usize,
    pub capacity: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
}

/// LRU pool for SSTable readers, keyed by table id.
pub struct SSTablePool {
    cache: Mutex<LruCache<u64, Arc<SSTableReader>>>,
    block_cache: Option<Arc<BlockCache>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SSTablePool {
    pub fn new(config: FdConfig, block_cache: Option<Arc<BlockCache>>) -> Self {
        let capacity = NonZeroUsize::new(config.max_open_sstables).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            block_cache,
            capacity: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get or open the reader for table `id`.
    pub fn get(&self, id: u64, path: &Path) -> Result<Arc<SSTableReader>> {
        if let Some(reader) = self.cache.lock().get(&id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(reader));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Opened outside the lock; a racing open of the same table is harmless.
        let reader = Arc::new(SSTableReader::open(id, path, self.block_cache.clone())?);

        let mut cache = self.cache.lock();
        if let Some(existing) = cache.get(&id) {
            return Ok(Arc::clone(existing));
        }
        if let Some((evicted, _)) = cache.push(id, Arc::clone(&reader)) {
            if evicted != id {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted SSTable {} from reader pool", evicted);
            }
        }
        Ok(reader)
    }

    /// Forget a table, e.g. after compaction deletes it.
    pub fn remove(&self, id: u64) {
        if self.cache.lock().pop(&id).is_some() {
            debug!("Removed SSTable {} from reader pool", id);
        }
        if let Some(block_cache) = &self.block_cache {
            block_cache.remove_file(id);
        }
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> FdStats {
        FdStats {
            open_sstables: self.cache.lock().len(),
            capacity: self.capacity,
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
