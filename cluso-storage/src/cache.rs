//! # Block Cache
//!
//! Bounded LRU cache of SSTable blocks keyed by `(table id, block offset)`,
//! shared by every reader of an engine. Capacity is counted in blocks.
//!
//! With one shard eviction is strictly least-recently-used. More shards cut lock
//! contention under parallel readers; each shard is an independent LRU holding
//! an equal slice of the capacity.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::sstable::Block;

/// Cached form of a parsed data block.
pub type SharedBlock = Arc<Block>;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub file_id: u64,
    pub block_offset: u64,
}

impl CacheKey {
    pub fn new(file_id: u64, block_offset: u64) -> Self {
        Self {
            file_id,
            block_offset,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

pub struct BlockCache<V: Clone = SharedBlock> {
    shards: Vec<Mutex<LruCache<CacheKey, V>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> BlockCache<V> {
    /// Single-shard cache with strict LRU eviction.
    pub fn new(capacity_blocks: usize) -> Self {
        Self::with_shards(capacity_blocks, 1)
    }

    pub fn with_shards(capacity_blocks: usize, shard_count: usize) -> Self {
        let shard_count = shard_count.clamp(1, capacity_blocks.max(1));
        let per_shard = capacity_blocks.max(1).div_ceil(shard_count);
        let per_shard = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);

        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
            capacity: per_shard.get() * shard_count,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let found = self.shard(key).lock().get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert or refresh `key`, evicting the least recently used block of the shard when full.
    pub fn insert(&self, key: CacheKey, value: V) {
        let mut shard = self.shard(&key).lock();
        if let Some((evicted, _)) = shard.push(key, value) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.shard(key).lock().contains(key)
    }

    /// Drop every block of a table, used when compaction deletes it.
    pub fn remove_file(&self, file_id: u64) {
        for shard in &self.shards {
            let mut shard = shard.lock();
            let stale: Vec<CacheKey> = shard
                .iter()
                .filter(|(k, _)| k.file_id == file_id)
                .map(|(k, _)| *k)
                .collect();
            for key in stale {
                shard.pop(&key);
            }
        }
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<LruCache<CacheKey, V>> {
        if self.shards.len() == 1 {
            return &self.shards[0];
        }
        let mixed = key
            .file_id
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .rotate_left(17)
            ^ (key.block_offset >> 4);
        &self.shards[(mixed % self.shards.len() as u64) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharded_capacity_is_split() {
        let cache: BlockCache<u32> = BlockCache::with_shards(64, 8);
        assert_eq!(cache.capacity(), 64);
        for i in 0..1000u64 {
            cache.insert(CacheKey::new(i, 0), i as u32);
        }
        assert!(cache.len() <= 64);
    }

    #[test]
    fn test_remove_file_drops_only_that_table() {
        let cache: BlockCache<u32> = BlockCache::new(10);
        cache.insert(CacheKey::new(1, 0), 1);
        cache.insert(CacheKey::new(1, 4096), 2);
        cache.insert(CacheKey::new(2, 0), 3);
        cache.remove_file(1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&CacheKey::new(2, 0)));
    }
}
