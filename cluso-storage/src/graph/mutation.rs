//! Serializable graph mutations.
//!
//! Every change to the graph is expressed as a [`Mutation`] before it touches
//! any state. The same value is written to the WAL, applied to memory, and
//! decoded again during replay or by a change-feed subscriber.

use serde::{Deserialize, Serialize};

use cluso_core::{
    error::{Error, Result},
    types::{EdgeId, NodeId, Properties},
    value::{Value, ValueType},
};

use crate::wal::{OpType, WalEntry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CreateNode {
        id: NodeId,
        labels: Vec<String>,
        #[serde(default)]
        properties: Properties,
        timestamp: i64,
    },
    /// Merge `properties` into the node; keys not named keep their value.
    UpdateNode {
        id: NodeId,
        properties: Properties,
        timestamp: i64,
    },
    SetNodeLabels {
        id: NodeId,
        labels: Vec<String>,
        timestamp: i64,
    },
    DeleteNode {
        id: NodeId,
    },
    CreateEdge {
        id: EdgeId,
        from: NodeId,
        to: NodeId,
        edge_type: String,
        #[serde(default)]
        properties: Properties,
        weight: f64,
        timestamp: i64,
    },
    UpdateEdge {
        id: EdgeId,
        properties: Properties,
        weight: Option<f64>,
    },
    DeleteEdge {
        id: EdgeId,
    },
    CreatePropertyIndex {
        property: String,
        value_type: ValueType,
    },
    DropPropertyIndex {
        property: String,
    },
    /// Applied all-or-nothing, and logged as a single WAL record.
    Batch {
        ops: Vec<Mutation>,
    },
}

impl Mutation {
    pub fn op_type(&self) -> OpType {
        match self {
            Mutation::CreateNode { .. } => OpType::CreateNode,
            Mutation::UpdateNode { .. } | Mutation::SetNodeLabels { .. } => OpType::UpdateNode,
            Mutation::DeleteNode { .. } => OpType::DeleteNode,
            Mutation::CreateEdge { .. } => OpType::CreateEdge,
            Mutation::UpdateEdge { .. } => OpType::UpdateEdge,
            Mutation::DeleteEdge { .. } => OpType::DeleteEdge,
            Mutation::CreatePropertyIndex { .. } => OpType::CreatePropertyIndex,
            Mutation::DropPropertyIndex { .. } => OpType::DropPropertyIndex,
            Mutation::Batch { .. } => OpType::Batch,
        }
    }

    /// WAL payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(op_type: OpType, payload: &[u8]) -> Result<Self> {
        let mutation: Mutation = serde_json::from_slice(payload).map_err(|e| {
            Error::corruption(format!("{:?} payload", op_type), e.to_string())
        })?;
        if mutation.op_type() != op_type {
            return Err(Error::corruption(
                "WAL entry",
                format!(
                    "op type {:?} does not match payload {:?}",
                    op_type,
                    mutation.op_type()
                ),
            ));
        }
        Ok(mutation)
    }

    /// Decode a record read from the WAL or a change feed.
    pub fn from_entry(entry: &WalEntry) -> Result<Self> {
        Self::decode(entry.op_type, &entry.payload)
    }

    /// Operations carried, counting each batch member.
    pub fn len(&self) -> usize {
        match self {
            Mutation::Batch { ops } => ops.iter().map(Mutation::len).sum(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON cannot carry NaN or infinity, so they would not survive the WAL.
    pub(crate) fn check_encodable(&self) -> Result<()> {
        match self {
            Mutation::CreateNode { properties, .. } | Mutation::UpdateNode { properties, .. } => {
                check_properties(properties)
            }
            Mutation::CreateEdge {
                properties, weight, ..
            } => {
                check_float("weight", *weight)?;
                check_properties(properties)
            }
            Mutation::UpdateEdge {
                properties, weight, ..
            } => {
                if let Some(weight) = weight {
                    check_float("weight", *weight)?;
                }
                check_properties(properties)
            }
            _ => Ok(()),
        }
    }
}

fn check_properties(properties: &Properties) -> Result<()> {
    properties
        .iter()
        .try_for_each(|(key, value)| check_value(key, value))
}

fn check_value(key: &str, value: &Value) -> Result<()> {
    match value {
        Value::Float(x) => check_float(key, *x),
        Value::List(items) => items.iter().try_for_each(|item| check_value(key, item)),
        Value::Map(map) => map.values().try_for_each(|item| check_value(key, item)),
        Value::String(_) | Value::Int(_) | Value::Bool(_) => Ok(()),
    }
}

fn check_float(name: &str, x: f64) -> Result<()> {
    if x.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidArgument {
            message: format!("{} must be a finite number, got {}", name, x),
        })
    }
}
