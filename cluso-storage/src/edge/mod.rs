//! # Adjacency Storage
//!
//! Per-node lists of incident edge IDs, one list per direction. Two backends
//! implement [`AdjacencyStore`]:
//!
//! - [`EdgeStore`]: delta/varint compressed lists persisted in the LSM engine
//!   behind a strict LRU cache.
//! - [`MemoryAdjacency`]: plain sorted vectors in memory.

pub mod compression;
pub mod memory;
pub mod pool;
pub mod store;

pub use compression::CompressedEdgeList;
pub use memory::MemoryAdjacency;
pub use pool::{BufferPool, EdgeCodec};
pub use store::{EdgeKey, EdgeStore};

use cluso_core::{
    error::Result,
    types::{Direction, NodeId},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// Totals over stored adjacency lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeCompressionStats {
    pub total_lists: usize,
    pub total_edges: usize,
    pub compressed_bytes: usize,
    pub uncompressed_bytes: usize,
}

impl EdgeCompressionStats {
    pub fn add(&mut self, list: &CompressedEdgeList) {
        self.total_lists += 1;
        self.total_edges += list.len();
        self.compressed_bytes += list.size();
        self.uncompressed_bytes += list.uncompressed_size();
    }

    /// Uncompressed over compressed bytes; 0.0 with nothing stored.
    pub fn ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 0.0;
        }
        self.uncompressed_bytes as f64 / self.compressed_bytes as f64
    }
}

/// Adjacency lists keyed by node and direction. Adding a present ID and
/// removing an absent one are no-ops, which makes WAL replay idempotent.
pub trait AdjacencyStore: Send + Sync {
    /// Edge IDs in ascending order; empty for an unknown node.
    fn get_edges(&self, node_id: NodeId, direction: Direction) -> Result<Vec<u64>>;

    fn add_edge(&self, node_id: NodeId, direction: Direction, id: u64) -> Result<()>;

    fn remove_edge(&self, node_id: NodeId, direction: Direction, id: u64) -> Result<()>;

    fn store_edges(&self, node_id: NodeId, direction: Direction, ids: &[u64]) -> Result<()>;

    fn delete_edges(&self, node_id: NodeId, direction: Direction) -> Result<()>;

    /// Make every write so far durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn cache_stats(&self) -> Option<EdgeCacheStats> {
        None
    }

    fn clear_cache(&self) {}

    /// `None` for backends that keep lists uncompressed.
    fn compression_stats(&self) -> Result<Option<EdgeCompressionStats>> {
        Ok(None)
    }
}
