//! Applying validated mutations to memory, indexes and adjacency.
//!
//! Every step tolerates work already done: creating an entity that exists or
//! was deleted, or updating and deleting one that is gone, is a no-op. Live writes pass
//! validation first so these paths never trigger for them; WAL replay relies
//! on them when an entry's effect is already captured in the snapshot.

use std::sync::atomic::Ordering;

use tracing::debug;

use cluso_core::{
    error::Result,
    types::{Direction, Edge, EdgeId, Node, NodeId, Properties},
    value::ValueType,
};

use super::index::PropertyIndex;
use super::mutation::Mutation;
use super::storage::GraphInner;

impl GraphInner {
    pub(super) fn apply(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::CreateNode {
                id,
                labels,
                properties,
                timestamp,
            } => {
                self.apply_create_node(*id, labels, properties, *timestamp);
                Ok(())
            }
            Mutation::UpdateNode {
                id,
                properties,
                timestamp,
            } => {
                self.modify_node(*id, |node| {
                    for (key, value) in properties {
                        node.properties.insert(key.clone(), value.clone());
                    }
                    node.updated_at = *timestamp;
                });
                Ok(())
            }
            Mutation::SetNodeLabels {
                id,
                labels,
                timestamp,
            } => {
                self.modify_node(*id, |node| {
                    node.labels = labels.clone();
                    node.updated_at = *timestamp;
                });
                Ok(())
            }
            Mutation::DeleteNode { id } => self.apply_delete_node(*id),
            Mutation::CreateEdge {
                id,
                from,
                to,
                edge_type,
                properties,
                weight,
                timestamp,
            } => self.apply_create_edge(Edge {
                id: *id,
                from: *from,
                to: *to,
                edge_type: edge_type.clone(),
                properties: properties.clone(),
                weight: *weight,
                created_at: *timestamp,
            }),
            Mutation::UpdateEdge {
                id,
                properties,
                weight,
            } => {
                self.apply_update_edge(*id, properties, *weight);
                Ok(())
            }
            Mutation::DeleteEdge { id } => self.apply_delete_edge(*id),
            Mutation::CreatePropertyIndex {
                property,
                value_type,
            } => self.apply_create_index(property, *value_type),
            Mutation::DropPropertyIndex { property } => {
                if self.indexes.write().drop_property_index(property) {
                    debug!("Dropped property index on {:?}", property);
                }
                Ok(())
            }
            Mutation::Batch { ops } => ops.iter().try_for_each(|op| self.apply(op)),
        }
    }

    fn apply_create_node(
        &self,
        id: NodeId,
        labels: &[String],
        properties: &Properties,
        timestamp: i64,
    ) {
        self.next_node_id.fetch_max(id + 1, Ordering::AcqRel);

        let node = Node {
            id,
            labels: labels.to_vec(),
            properties: properties.clone(),
            created_at: timestamp,
            updated_at: timestamp,
        };
        {
            let mut shard = self.shards.write(id);
            if shard.nodes.contains_key(&id) || shard.deleted_nodes.contains(&id) {
                return;
            }
            shard.nodes.insert(id, node.clone());
        }
        self.indexes.write().insert_node(&node);
        self.node_count.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_node_created();
    }

    /// Edit a node in place and move its index entries along.
    fn modify_node(&self, id: NodeId, edit: impl FnOnce(&mut Node)) {
        let (before, after) = {
            let mut shard = self.shards.write(id);
            let Some(node) = shard.nodes.get_mut(&id) else {
                return;
            };
            let before = node.clone();
            edit(node);
            (before, node.clone())
        };
        self.indexes.write().replace_node(&before, &after);
    }

    fn apply_delete_node(&self, id: NodeId) -> Result<()> {
        if !self.node_exists(id) {
            return Ok(());
        }

        let mut incident = self.adjacency.get_edges(id, Direction::Outgoing)?;
        incident.extend(self.adjacency.get_edges(id, Direction::Incoming)?);
        incident.sort_unstable();
        incident.dedup();
        for edge_id in incident {
            self.apply_delete_edge(edge_id)?;
        }
        self.adjacency.delete_edges(id, Direction::Outgoing)?;
        self.adjacency.delete_edges(id, Direction::Incoming)?;

        let removed = {
            let mut shard = self.shards.write(id);
            shard.deleted_nodes.insert(id);
            shard.nodes.remove(&id)
        };
        if let Some(node) = removed {
            self.indexes.write().remove_node(&node);
            self.node_count.fetch_sub(1, Ordering::Relaxed);
            self.metrics.record_node_deleted();
        }
        Ok(())
    }

    fn apply_create_edge(&self, edge: Edge) -> Result<()> {
        self.next_edge_id.fetch_max(edge.id + 1, Ordering::AcqRel);

        if !self.node_exists(edge.from) || !self.node_exists(edge.to) {
            debug!(
                "Skipping edge {}: endpoint {} or {} no longer exists",
                edge.id, edge.from, edge.to
            );
            return Ok(());
        }
        {
            let mut shard = self.shards.write(edge.id);
            if shard.edges.contains_key(&edge.id) || shard.deleted_edges.contains(&edge.id) {
                return Ok(());
            }
            shard.edges.insert(edge.id, edge.clone());
        }
        self.indexes.write().insert_edge(&edge);
        self.adjacency
            .add_edge(edge.from, Direction::Outgoing, edge.id)?;
        self.adjacency.add_edge(edge.to, Direction::Incoming, edge.id)?;
        self.edge_count.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_edge_created();
        Ok(())
    }

    fn apply_update_edge(&self, id: EdgeId, properties: &Properties, weight: Option<f64>) {
        let mut shard = self.shards.write(id);
        if let Some(edge) = shard.edges.get_mut(&id) {
            for (key, value) in properties {
                edge.properties.insert(key.clone(), value.clone());
            }
            if let Some(weight) = weight {
                edge.weight = weight;
            }
        }
    }

    fn apply_delete_edge(&self, id: EdgeId) -> Result<()> {
        let removed = {
            let mut shard = self.shards.write(id);
            let removed = shard.edges.remove(&id);
            if removed.is_some() {
                shard.deleted_edges.insert(id);
            }
            removed
        };
        let Some(edge) = removed else {
            return Ok(());
        };
        self.indexes.write().remove_edge(&edge);
        self.adjacency
            .remove_edge(edge.from, Direction::Outgoing, edge.id)?;
        self.adjacency.remove_edge(edge.to, Direction::Incoming, edge.id)?;
        self.edge_count.fetch_sub(1, Ordering::Relaxed);
        self.metrics.record_edge_deleted();
        Ok(())
    }

    pub(super) fn apply_create_index(&self, property: &str, value_type: ValueType) -> Result<()> {
        if self.indexes.read().has_property_index(property) {
            return Ok(());
        }

        let mut index = PropertyIndex::new(property, value_type)?;
        let mut existing = Vec::new();
        self.shards.for_each_shard(|shard| {
            existing.extend(shard.nodes.values().filter_map(|node| {
                node.property(property)
                    .filter(|value| value.value_type() == value_type)
                    .map(|value| (node.id, value.clone()))
            }));
        });
        for (id, value) in &existing {
            index.insert(*id, value)?;
        }

        debug!(
            "Built property index on {:?} over {} node(s)",
            property,
            existing.len()
        );
        self.indexes.write().add_property_index(index);
        Ok(())
    }
}
