use dashmap::DashMap;

use cluso_core::{
    error::Result,
    types::{Direction, NodeId},
};

use super::store::EdgeKey;
use super::AdjacencyStore;

/// Uncompressed adjacency held entirely in memory, used when edge compression
/// is disabled. Lists are kept sorted and rebuilt from the graph on open.
#[derive(Default)]
pub struct MemoryAdjacency {
    lists: DashMap<EdgeKey, Vec<u64>>,
}

impl MemoryAdjacency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn clear(&self) {
        self.lists.clear();
    }
}

impl AdjacencyStore for MemoryAdjacency {
    fn get_edges(&self, node_id: NodeId, direction: Direction) -> Result<Vec<u64>> {
        Ok(self
            .lists
            .get(&EdgeKey::new(node_id, direction))
            .map(|ids| ids.value().clone())
            .unwrap_or_default())
    }

    fn add_edge(&self, node_id: NodeId, direction: Direction, id: u64) -> Result<()> {
        let mut ids = self.lists.entry(EdgeKey::new(node_id, direction)).or_default();
        if let Err(pos) = ids.binary_search(&id) {
            ids.insert(pos, id);
        }
        Ok(())
    }

    fn remove_edge(&self, node_id: NodeId, direction: Direction, id: u64) -> Result<()> {
        let key = EdgeKey::new(node_id, direction);
        if let Some(mut ids) = self.lists.get_mut(&key) {
            if let Ok(pos) = ids.binary_search(&id) {
                ids.remove(pos);
            }
        }
        self.lists.remove_if(&key, |_, ids| ids.is_empty());
        Ok(())
    }

    fn store_edges(&self, node_id: NodeId, direction: Direction, ids: &[u64]) -> Result<()> {
        let key = EdgeKey::new(node_id, direction);
        if ids.is_empty() {
            self.lists.remove(&key);
            return Ok(());
        }
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.lists.insert(key, sorted);
        Ok(())
    }

    fn delete_edges(&self, node_id: NodeId, direction: Direction) -> Result<()> {
        self.lists.remove(&EdgeKey::new(node_id, direction));
        Ok(())
    }
}
