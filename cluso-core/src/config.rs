//! # Configuration Management
//!
//! The recognized configuration surface of a database instance. Component crates
//! derive their own tuning structs (WAL, memtable, SSTable, compaction) from this.
//!
//! Every field has a default, so a JSON file only needs the options it changes:
//!
//! ```json
//! { "data_dir": "/var/lib/cluso", "memtable_size_mb": 128, "bulk_import_mode": true }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::utils::is_power_of_two;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Root directory of the instance (WAL, LSM tables, snapshots).
    pub data_dir: PathBuf,
    /// MemTable flush threshold.
    pub memtable_size_mb: usize,
    /// Block cache budget, converted to a block count when `block_cache_blocks` is unset.
    pub cache_size_mb: usize,
    /// Explicit block cache capacity in blocks.
    pub block_cache_blocks: Option<usize>,
    /// Store adjacency as delta-encoded lists in the LSM engine instead of plain vectors.
    pub enable_edge_compression: bool,
    /// Edge store LRU capacity in adjacency lists.
    pub edge_cache_size: usize,
    /// Skip the WAL; durability comes from the snapshot taken when the load finishes.
    pub bulk_import_mode: bool,
    /// Background compaction threads.
    pub compaction_workers: usize,
    /// fsync the WAL on every append.
    pub sync_writes: bool,
    /// Number of read-lock shards.
    pub shard_count: usize,
    pub sharding: ShardingStrategy,
    pub flush_interval_ms: u64,
    pub compaction_interval_ms: u64,
    /// Number of level-0 tables that triggers a compaction.
    pub l0_compaction_trigger: usize,
    /// Take a snapshot on this period. `None` disables periodic snapshots.
    pub snapshot_interval_secs: Option<u64>,
    pub snapshots_to_keep: usize,
    pub wal_max_file_size_mb: u64,
    /// Snappy-compress WAL payloads in newly created segments.
    pub wal_compression: bool,
    /// Let concurrent commits share one fsync. A commit becomes visible to
    /// readers when applied and returns once its record is durable.
    pub wal_group_commit: bool,
    /// How long a group commit leader waits for followers before syncing.
    pub group_commit_delay_us: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            memtable_size_mb: 64,
            cache_size_mb: 64,
            block_cache_blocks: None,
            enable_edge_compression: true,
            edge_cache_size: 10_000,
            bulk_import_mode: false,
            compaction_workers: 2,
            sync_writes: true,
            shard_count: 256,
            sharding: ShardingStrategy::Modulo,
            flush_interval_ms: 1_000,
            compaction_interval_ms: 5_000,
            l0_compaction_trigger: 4,
            snapshot_interval_secs: None,
            snapshots_to_keep: 2,
            wal_max_file_size_mb: 64,
            wal_compression: false,
            wal_group_commit: false,
            group_commit_delay_us: 200,
        }
    }
}

/// How entity IDs are mapped onto lock shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ShardingStrategy {
    /// `id & (shard_count - 1)`. Requires a power-of-two shard count.
    Modulo,
    /// Hash ring with `virtual_nodes` points per shard.
    ConsistentHash { virtual_nodes: usize },
}

/// Size of an SSTable data block, used to turn `cache_size_mb` into a block count.
pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

impl DatabaseConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Failed to read config {:?}", path), e))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| Error::Configuration {
            message: format!("{:?}: {}", path, e),
        })?;
        config.validate()?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memtable_size_mb == 0 {
            return Err(config_error("memtable_size_mb must be greater than zero"));
        }
        if self.edge_cache_size == 0 {
            return Err(config_error("edge_cache_size must be greater than zero"));
        }
        if self.compaction_workers == 0 {
            return Err(config_error("compaction_workers must be at least 1"));
        }
        if self.shard_count == 0 {
            return Err(config_error("shard_count must be greater than zero"));
        }
        if self.l0_compaction_trigger < 2 {
            return Err(config_error("l0_compaction_trigger must be at least 2"));
        }
        if self.wal_max_file_size_mb == 0 {
            return Err(config_error("wal_max_file_size_mb must be greater than zero"));
        }
        match self.sharding {
            ShardingStrategy::Modulo if !is_power_of_two(self.shard_count as u64) => {
                return Err(config_error(&format!(
                    "shard_count {} must be a power of two for modulo sharding",
                    self.shard_count
                )));
            }
            ShardingStrategy::ConsistentHash { virtual_nodes: 0 } => {
                return Err(config_error("virtual_nodes must be greater than zero"));
            }
            _ => {}
        }
        if self.block_cache_capacity() == 0 {
            return Err(config_error("block cache capacity must be at least one block"));
        }
        Ok(())
    }

    pub fn memtable_size_bytes(&self) -> usize {
        self.memtable_size_mb * 1024 * 1024
    }

    /// Block cache capacity in blocks.
    pub fn block_cache_capacity(&self) -> usize {
        self.block_cache_blocks
            .unwrap_or_else(|| self.cache_size_mb * 1024 * 1024 / DEFAULT_BLOCK_SIZE)
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    pub fn lsm_dir(&self) -> PathBuf {
        self.data_dir.join("lsm")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

fn config_error(message: &str) -> Error {
    Error::Configuration {
        message: message.to_string(),
    }
}
