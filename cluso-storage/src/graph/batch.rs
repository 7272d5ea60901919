use cluso_core::{
    error::Result,
    types::{EdgeId, NodeId, Properties},
    utils::now_secs,
};

use super::mutation::Mutation;
use super::storage::GraphStorage;

/// Operations queued for one atomic commit.
///
/// IDs are allocated when an operation is queued, so later operations in the
/// same batch can reference nodes that do not exist yet. `commit` validates
/// every operation before applying any; on failure nothing is visible and the
/// queued IDs are simply never used.
pub struct Batch<'a> {
    storage: &'a GraphStorage,
    ops: Vec<Mutation>,
}

impl<'a> Batch<'a> {
    pub(super) fn new(storage: &'a GraphStorage) -> Self {
        Self {
            storage,
            ops: Vec::new(),
        }
    }

    /// Queue a node creation and return the ID it will have.
    pub fn add_node<I, S>(&mut self, labels: I, properties: Properties) -> Result<NodeId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = self.storage.inner();
        inner.check_open()?;
        let id = inner.allocate_node_id();
        let mut unique: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !unique.contains(&label) {
                unique.push(label);
            }
        }
        self.ops.push(Mutation::CreateNode {
            id,
            labels: unique,
            properties,
            timestamp: now_secs(),
        });
        Ok(id)
    }

    /// Queue an edge creation and return the ID it will have.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        edge_type: impl Into<String>,
        properties: Properties,
        weight: f64,
    ) -> Result<EdgeId> {
        let inner = self.storage.inner();
        inner.check_open()?;
        let id = inner.allocate_edge_id();
        self.ops.push(Mutation::CreateEdge {
            id,
            from,
            to,
            edge_type: edge_type.into(),
            properties,
            weight,
            timestamp: now_secs(),
        });
        Ok(id)
    }

    pub fn update_node(&mut self, id: NodeId, properties: Properties) {
        self.ops.push(Mutation::UpdateNode {
            id,
            properties,
            timestamp: now_secs(),
        });
    }

    pub fn delete_node(&mut self, id: NodeId) {
        self.ops.push(Mutation::DeleteNode { id });
    }

    pub fn delete_edge(&mut self, id: EdgeId) {
        self.ops.push(Mutation::DeleteEdge { id });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Apply every queued operation under one write-lock acquisition, or none.
    ///
    /// A failure is reported as `BatchFailed` naming the offending operation.
    pub fn commit(self) -> Result<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        self.storage
            .inner()
            .commit(Mutation::Batch { ops: self.ops })
    }
}
