use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use tracing::debug;

use cluso_core::error::{Error, Result};

use super::types::{MemTableConfig, MemTableStats};
use crate::record::{Record, RECORD_OVERHEAD};

/// Per-entry bookkeeping charged on top of key and value bytes.
const ENTRY_OVERHEAD: usize = 32;

pub struct MemTable {
    id: u64,
    data: SkipMap<Bytes, Record>,
    size_bytes: AtomicUsize,
    tombstones: AtomicUsize,
    max_sequence: AtomicU64,
    created_at: Instant,
    config: MemTableConfig,
    read_only: AtomicBool,
}

impl MemTable {
    pub fn new(id: u64, config: MemTableConfig) -> Self {
        Self {
            id,
            data: SkipMap::new(),
            size_bytes: AtomicUsize::new(0),
            tombstones: AtomicUsize::new(0),
            max_sequence: AtomicU64::new(0),
            created_at: Instant::now(),
            config,
            read_only: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn put(&self, key: Bytes, value: Bytes, sequence: u64) -> Result<()> {
        self.insert(key, Record::put(sequence, value))
    }

    pub fn delete(&self, key: Bytes, sequence: u64) -> Result<()> {
        self.insert(key, Record::tombstone(sequence))
    }

    /// Insert a record. The caller serializes writers; readers may run concurrently.
    pub fn insert(&self, key: Bytes, record: Record) -> Result<()> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(Error::MemTable {
                message: "MemTable is read-only (being flushed)".to_string(),
            });
        }

        let added = Self::entry_size(&key, &record);
        let tombstone = record.is_tombstone();
        self.max_sequence.fetch_max(record.sequence, Ordering::AcqRel);

        if let Some(previous) = self.data.get(&key) {
            let removed = Self::entry_size(previous.key(), previous.value());
            if previous.value().is_tombstone() {
                self.tombstones.fetch_sub(1, Ordering::Relaxed);
            }
            self.size_bytes.fetch_sub(removed.min(self.size_bytes()), Ordering::Relaxed);
        }

        self.data.insert(key, record);
        self.size_bytes.fetch_add(added, Ordering::Relaxed);
        if tombstone {
            self.tombstones.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Newest record for `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<Record> {
        self.data.get(key).map(|e| e.value().clone())
    }

    /// Records with `start <= key < end`; an empty `end` means unbounded.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Vec<(Bytes, Record)> {
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };
        self.data
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Every record in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Bytes, Record)> + '_ {
        self.data.iter().map(|e| (e.key().clone(), e.value().clone()))
    }

    pub fn should_flush(&self) -> bool {
        self.size_bytes() >= self.config.max_size
    }

    pub fn set_read_only(&self) {
        self.read_only.store(true, Ordering::Release);
        debug!(
            "MemTable {} marked as read-only (size: {} bytes, entries: {})",
            self.id,
            self.size_bytes(),
            self.len()
        );
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Highest sequence written into this table, 0 while empty.
    pub fn max_sequence(&self) -> u64 {
        self.max_sequence.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> MemTableStats {
        MemTableStats {
            id: self.id,
            entry_count: self.len(),
            size_bytes: self.size_bytes(),
            tombstones: self.tombstones.load(Ordering::Relaxed),
            max_sequence: self.max_sequence(),
            age: self.created_at.elapsed(),
        }
    }

    fn entry_size(key: &Bytes, record: &Record) -> usize {
        ENTRY_OVERHEAD + key.len() + RECORD_OVERHEAD + record.value.as_ref().map_or(0, Bytes::len)
    }
}
