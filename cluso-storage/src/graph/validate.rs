//! Precondition checks run under the write lock before anything is logged.
//!
//! A batch is checked operation by operation against an [`Overlay`] of the
//! effects of the operations before it, so a batch can reference nodes it
//! creates itself and sees the nodes it deletes as gone. Nothing is applied
//! until the whole batch has passed.

use std::collections::{HashMap, HashSet};

use cluso_core::{
    error::{Error, Result},
    types::{EdgeId, NodeId},
};

use super::index::PropertyIndex;
use super::mutation::Mutation;
use super::storage::GraphInner;

/// Effects of the operations of a batch checked so far.
#[derive(Default)]
pub(super) struct Overlay {
    created_nodes: HashSet<NodeId>,
    deleted_nodes: HashSet<NodeId>,
    created_edges: HashMap<EdgeId, (NodeId, NodeId)>,
    deleted_edges: HashSet<EdgeId>,
    created_indexes: HashSet<String>,
    dropped_indexes: HashSet<String>,
}

impl GraphInner {
    pub(super) fn validate(&self, mutation: &Mutation, overlay: &mut Overlay) -> Result<()> {
        mutation.check_encodable()?;
        match mutation {
            Mutation::CreateNode { id, .. } => {
                if overlay.created_nodes.contains(id) || self.node_exists(*id) {
                    return Err(Error::WriteConflict {
                        message: format!("node {} already exists", id),
                    });
                }
                overlay.deleted_nodes.remove(id);
                overlay.created_nodes.insert(*id);
            }
            Mutation::UpdateNode { id, .. } | Mutation::SetNodeLabels { id, .. } => {
                self.check_node(*id, overlay)?;
            }
            Mutation::DeleteNode { id } => {
                self.check_node(*id, overlay)?;
                overlay.created_nodes.remove(id);
                overlay.deleted_nodes.insert(*id);
            }
            Mutation::CreateEdge { id, from, to, .. } => {
                self.check_node(*from, overlay)?;
                self.check_node(*to, overlay)?;
                if overlay.created_edges.contains_key(id) || self.edge(*id).is_some() {
                    return Err(Error::WriteConflict {
                        message: format!("edge {} already exists", id),
                    });
                }
                overlay.created_edges.insert(*id, (*from, *to));
            }
            Mutation::UpdateEdge { id, .. } => {
                self.check_edge(*id, overlay)?;
            }
            Mutation::DeleteEdge { id } => {
                self.check_edge(*id, overlay)?;
                overlay.created_edges.remove(id);
                overlay.deleted_edges.insert(*id);
            }
            Mutation::CreatePropertyIndex {
                property,
                value_type,
            } => {
                // Reject list and map types before anything is logged.
                PropertyIndex::new(property.as_str(), *value_type)?;
                if self.has_index(property, overlay) {
                    return Err(Error::InvalidArgument {
                        message: format!("property {:?} is already indexed", property),
                    });
                }
                overlay.dropped_indexes.remove(property);
                overlay.created_indexes.insert(property.clone());
            }
            Mutation::DropPropertyIndex { property } => {
                if !self.has_index(property, overlay) {
                    return Err(Error::IndexNotFound {
                        property: property.clone(),
                    });
                }
                overlay.created_indexes.remove(property);
                overlay.dropped_indexes.insert(property.clone());
            }
            Mutation::Batch { ops } => {
                for (index, op) in ops.iter().enumerate() {
                    let checked = match op {
                        Mutation::Batch { .. } => Err(Error::InvalidArgument {
                            message: "batches cannot be nested".to_string(),
                        }),
                        op => self.validate(op, overlay),
                    };
                    checked.map_err(|source| Error::BatchFailed {
                        index,
                        source: Box::new(source),
                    })?;
                }
            }
        }
        Ok(())
    }

    fn check_node(&self, id: NodeId, overlay: &Overlay) -> Result<()> {
        if overlay.deleted_nodes.contains(&id) {
            return Err(Error::StaleReference { entity: "node", id });
        }
        if overlay.created_nodes.contains(&id) || self.node_exists(id) {
            return Ok(());
        }
        Err(self.missing_node(id))
    }

    fn check_edge(&self, id: EdgeId, overlay: &Overlay) -> Result<()> {
        if overlay.deleted_edges.contains(&id) {
            return Err(Error::StaleReference { entity: "edge", id });
        }
        let endpoints = match overlay.created_edges.get(&id) {
            Some(endpoints) => Some(*endpoints),
            None => self.edge(id).map(|edge| (edge.from, edge.to)),
        };
        match endpoints {
            // Deleting an endpoint earlier in the batch took the edge with it.
            Some((from, to))
                if overlay.deleted_nodes.contains(&from) || overlay.deleted_nodes.contains(&to) =>
            {
                Err(Error::StaleReference { entity: "edge", id })
            }
            Some(_) => Ok(()),
            None => Err(self.missing_edge(id)),
        }
    }

    fn has_index(&self, property: &str, overlay: &Overlay) -> bool {
        if overlay.created_indexes.contains(property) {
            return true;
        }
        !overlay.dropped_indexes.contains(property)
            && self.indexes.read().has_property_index(property)
    }

    /// An ID that was allocated but never committed (a dropped batch, say)
    /// is not found. Only a committed entity that was deleted is stale.
    fn missing_node(&self, id: NodeId) -> Error {
        if self.shards.read(id).deleted_nodes.contains(&id) {
            Error::StaleReference { entity: "node", id }
        } else {
            Error::NotFound { entity: "node", id }
        }
    }

    fn missing_edge(&self, id: EdgeId) -> Error {
        if self.shards.read(id).deleted_edges.contains(&id) {
            Error::StaleReference { entity: "edge", id }
        } else {
            Error::NotFound { entity: "edge", id }
        }
    }
}
