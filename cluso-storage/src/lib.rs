//! # Cluso Storage Engine
//!
//! Embedded storage core of the Cluso graph database: a write-ahead log, an
//! LSM key-value engine, compressed adjacency lists and the graph layer that
//! ties them together.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  Mutation ──> write lock ──> WAL ──> shards + indexes       │
//! │                               │            │                │
//! │                               ▼            ▼                │
//! │                          Snapshots    EdgeStore (LRU)       │
//! │                                            │                │
//! │                                            ▼                │
//! │                          LSM: MemTable ──> SSTables         │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                              │
//! │                                                             │
//! │  GetNode ──> shard read lock (id & (N-1))                   │
//! │  Adjacency ──> LRU ──> MemTables ──> SSTables (newest first)│
//! │                                        │                    │
//! │                                   Bloom filter,             │
//! │                                   sparse index, mmap        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod compaction;
pub mod edge;
pub mod engine;
pub mod fd;
pub mod graph;
pub mod manifest;
pub mod memtable;
pub mod merge;
pub mod record;
pub mod shard;
pub mod sstable;
pub mod wal;
pub mod workers;

pub use cache::{BlockCache, CacheKey, CacheStats};
pub use compaction::{CompactionConfig, CompactionTask, Compactor};
pub use edge::{
    AdjacencyStore, CompressedEdgeList, EdgeCacheStats, EdgeCodec, EdgeCompressionStats, EdgeKey,
    EdgeStore, MemoryAdjacency,
};
pub use engine::{LsmConfig, LsmEngine, LsmStats};
pub use fd::{FdConfig, FdStats, SSTablePool};
pub use graph::{Batch, GraphStorage, Mutation, SnapshotInfo, TemporalEdge};
pub use memtable::{MemTable, MemTableManager};
pub use shard::{GlobalWriteLock, ShardLockManager, ShardRouter, WriteLock};
pub use wal::{OpType, WalConfig, WalEntry, WalStats, WalSubscription, WriteAheadLog};
pub use workers::{Ticker, WorkerPool};
