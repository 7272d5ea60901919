//! Time-bounded edges.
//!
//! An edge is valid over `[valid_from, valid_to]` when it carries the Int
//! properties `valid_from` and optionally `valid_to`. A missing `valid_to`
//! leaves the interval open. An edge without an Int `valid_from` is valid at
//! every time.

use cluso_core::{
    error::{Error, Result},
    types::{Edge, NodeId, Properties},
    value::Value,
};

use super::storage::GraphStorage;

pub const VALID_FROM: &str = "valid_from";
pub const VALID_TO: &str = "valid_to";

/// An edge with its validity interval. `valid_from` is `None` for an edge
/// without temporal properties.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalEdge {
    pub edge: Edge,
    pub valid_from: Option<i64>,
    pub valid_to: Option<i64>,
}

impl TemporalEdge {
    pub fn from_edge(edge: Edge) -> Self {
        let valid_from = edge.property(VALID_FROM).and_then(Value::as_int);
        let valid_to = valid_from.and_then(|_| edge.property(VALID_TO).and_then(Value::as_int));
        Self {
            edge,
            valid_from,
            valid_to,
        }
    }

    pub fn is_valid_at(&self, timestamp: i64) -> bool {
        let Some(from) = self.valid_from else {
            return true;
        };
        timestamp >= from && self.valid_to.map_or(true, |to| timestamp <= to)
    }

    /// Whether the validity interval overlaps `[start, end]`.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        let Some(from) = self.valid_from else {
            return true;
        };
        from <= end && self.valid_to.map_or(true, |to| to >= start)
    }
}

impl GraphStorage {
    /// Outgoing edges of `node_id` valid at `timestamp`.
    pub fn edges_at_time(&self, node_id: NodeId, timestamp: i64) -> Result<Vec<TemporalEdge>> {
        Ok(self
            .temporal_edges(node_id)?
            .filter(|edge| edge.is_valid_at(timestamp))
            .collect())
    }

    /// Outgoing edges of `node_id` valid at some point in `[start, end]`.
    pub fn edges_in_time_range(
        &self,
        node_id: NodeId,
        start: i64,
        end: i64,
    ) -> Result<Vec<TemporalEdge>> {
        if start > end {
            return Err(Error::InvalidArgument {
                message: format!("time range start {} is after end {}", start, end),
            });
        }
        Ok(self
            .temporal_edges(node_id)?
            .filter(|edge| edge.overlaps(start, end))
            .collect())
    }

    /// Create an edge valid from `valid_from`, until `valid_to` if given.
    /// The bounds are stored as the edge's `valid_from` and `valid_to`
    /// properties, replacing any the caller passed.
    #[allow(clippy::too_many_arguments)]
    pub fn create_temporal_edge(
        &self,
        from: NodeId,
        to: NodeId,
        edge_type: impl Into<String>,
        mut properties: Properties,
        weight: f64,
        valid_from: i64,
        valid_to: Option<i64>,
    ) -> Result<TemporalEdge> {
        if let Some(valid_to) = valid_to.filter(|to| *to < valid_from) {
            return Err(Error::InvalidArgument {
                message: format!("valid_to {} is before valid_from {}", valid_to, valid_from),
            });
        }
        properties.insert(VALID_FROM.to_string(), Value::Int(valid_from));
        match valid_to {
            Some(valid_to) => properties.insert(VALID_TO.to_string(), Value::Int(valid_to)),
            None => properties.remove(VALID_TO),
        };

        let edge = self.create_edge(from, to, edge_type, properties, weight)?;
        Ok(TemporalEdge {
            edge,
            valid_from: Some(valid_from),
            valid_to,
        })
    }

    fn temporal_edges(&self, node_id: NodeId) -> Result<impl Iterator<Item = TemporalEdge>> {
        Ok(self
            .get_outgoing_edges(node_id)?
            .into_iter()
            .map(TemporalEdge::from_edge))
    }
}
