//! # Core Data Structures
//!
//! Graph entities as seen by callers of the storage layer. Entities reference each
//! other only by ID; nothing here holds a pointer into another entity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

pub type NodeId = u64;
pub type EdgeId = u64;

/// Property map of a node or edge. Ordered so serialized snapshots are deterministic.
pub type Properties = BTreeMap<String, Value>;

/// A graph vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Node {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A directed, typed, weighted graph edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub properties: Properties,
    pub weight: f64,
    pub created_at: i64,
}

impl Edge {
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// The endpoint on the far side when walking in `direction`.
    pub fn neighbor(&self, direction: Direction) -> NodeId {
        match direction {
            Direction::Outgoing => self.to,
            Direction::Incoming => self.from,
        }
    }
}

/// Adjacency direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    /// Segment used in adjacency keys (`edges:out:42`).
    pub fn as_key_segment(self) -> &'static str {
        match self {
            Direction::Outgoing => "out",
            Direction::Incoming => "in",
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key_segment())
    }
}

/// Point-in-time counters for a graph storage instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: u64,
    pub edge_count: u64,
    pub label_count: usize,
    pub edge_type_count: usize,
    pub property_indexes: usize,
    pub current_lsn: u64,
    pub last_snapshot_lsn: u64,
    pub next_node_id: NodeId,
    pub next_edge_id: EdgeId,
}
