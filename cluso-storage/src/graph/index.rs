//! Secondary indexes over the graph: node labels, edge types and typed
//! property values.
//!
//! A property index maps an order-preserving byte encoding of each value to
//! the set of nodes holding it, so equality, inclusive range and string prefix
//! lookups are all ordered walks over one `BTreeMap`.
//!
//! | Type   | Key bytes                                         |
//! |--------|---------------------------------------------------|
//! | String | UTF-8 bytes                                       |
//! | Int    | big-endian `i ^ (1 << 63)` (negatives sort first) |
//! | Float  | big-endian IEEE-754 bits, sign-flipped            |
//! | Bool   | `0` or `1`                                        |

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use cluso_core::{
    error::{Error, Result},
    types::{Edge, EdgeId, Node, NodeId},
    value::{Value, ValueType},
};

const SIGN_BIT: u64 = 1 << 63;

/// Order-preserving key for a scalar value. `None` for lists and maps.
pub fn encode_index_key(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Int(i) => Some(((*i as u64) ^ SIGN_BIT).to_be_bytes().to_vec()),
        Value::Float(x) => {
            // -0.0 and 0.0 compare equal, so they must share a key.
            let x = if *x == 0.0 { 0.0 } else { *x };
            let bits = x.to_bits();
            let ordered = if bits & SIGN_BIT != 0 { !bits } else { bits | SIGN_BIT };
            Some(ordered.to_be_bytes().to_vec())
        }
        Value::Bool(b) => Some(vec![u8::from(*b)]),
        Value::List(_) | Value::Map(_) => None,
    }
}

/// Definition of a property index, as persisted in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyIndexDef {
    pub property: String,
    pub value_type: ValueType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStatistics {
    pub property: String,
    pub value_type: ValueType,
    pub unique_values: usize,
    pub total_nodes: u64,
    pub avg_nodes_per_value: f64,
}

pub struct PropertyIndex {
    property: String,
    value_type: ValueType,
    entries: BTreeMap<Vec<u8>, BTreeSet<NodeId>>,
}

impl PropertyIndex {
    pub fn new(property: impl Into<String>, value_type: ValueType) -> Result<Self> {
        let property = property.into();
        if !value_type.is_scalar() {
            return Err(Error::InvalidArgument {
                message: format!(
                    "cannot index property {:?}: {} values are not ordered",
                    property, value_type
                ),
            });
        }
        Ok(Self {
            property,
            value_type,
            entries: BTreeMap::new(),
        })
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn definition(&self) -> PropertyIndexDef {
        PropertyIndexDef {
            property: self.property.clone(),
            value_type: self.value_type,
        }
    }

    fn key_for(&self, value: &Value) -> Result<Vec<u8>> {
        if value.value_type() != self.value_type {
            return Err(Error::TypeMismatch {
                property: self.property.clone(),
                expected: self.value_type,
                actual: value.value_type(),
            });
        }
        encode_index_key(value).ok_or_else(|| Error::InvalidArgument {
            message: format!("{} values cannot be indexed", value.value_type()),
        })
    }

    pub fn insert(&mut self, node_id: NodeId, value: &Value) -> Result<()> {
        let key = self.key_for(value)?;
        self.entries.entry(key).or_default().insert(node_id);
        Ok(())
    }

    pub fn remove(&mut self, node_id: NodeId, value: &Value) -> Result<()> {
        let key = self.key_for(value)?;
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(&node_id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
        Ok(())
    }

    pub fn lookup(&self, value: &Value) -> Result<Vec<NodeId>> {
        let key = self.key_for(value)?;
        Ok(self
            .entries
            .get(&key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Nodes whose value lies in `[start, end]`, in value order.
    pub fn range(&self, start: &Value, end: &Value) -> Result<Vec<NodeId>> {
        let start = self.key_for(start)?;
        let end = self.key_for(end)?;
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .entries
            .range::<Vec<u8>, _>((Bound::Included(&start), Bound::Included(&end)))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect())
    }

    /// Nodes whose string value starts with `prefix`. String indexes only.
    pub fn prefix(&self, prefix: &str) -> Result<Vec<NodeId>> {
        if self.value_type != ValueType::String {
            return Err(Error::TypeMismatch {
                property: self.property.clone(),
                expected: self.value_type,
                actual: ValueType::String,
            });
        }
        let prefix = prefix.as_bytes();
        Ok(self
            .entries
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect())
    }

    pub fn statistics(&self) -> IndexStatistics {
        let total_nodes: u64 = self.entries.values().map(|ids| ids.len() as u64).sum();
        IndexStatistics {
            property: self.property.clone(),
            value_type: self.value_type,
            unique_values: self.entries.len(),
            total_nodes,
            avg_nodes_per_value: total_nodes as f64 / self.entries.len().max(1) as f64,
        }
    }
}

/// Every index of one graph. Guarded as a unit by the storage layer.
#[derive(Default)]
pub struct GraphIndexes {
    labels: HashMap<String, BTreeSet<NodeId>>,
    edge_types: HashMap<String, BTreeSet<EdgeId>>,
    properties: HashMap<String, PropertyIndex>,
}

impl GraphIndexes {
    pub fn insert_node(&mut self, node: &Node) {
        for label in &node.labels {
            self.labels.entry(label.clone()).or_default().insert(node.id);
        }
        for (property, value) in &node.properties {
            if let Some(index) = self.properties.get_mut(property) {
                // Values of another type are simply not indexed.
                let _ = index.insert(node.id, value);
            }
        }
    }

    pub fn remove_node(&mut self, node: &Node) {
        for label in &node.labels {
            remove_member(&mut self.labels, label, node.id);
        }
        for (property, value) in &node.properties {
            if let Some(index) = self.properties.get_mut(property) {
                let _ = index.remove(node.id, value);
            }
        }
    }

    /// Move `before`'s entries over to `after` (same node, new labels or properties).
    pub fn replace_node(&mut self, before: &Node, after: &Node) {
        self.remove_node(before);
        self.insert_node(after);
    }

    pub fn insert_edge(&mut self, edge: &Edge) {
        self.edge_types
            .entry(edge.edge_type.clone())
            .or_default()
            .insert(edge.id);
    }

    pub fn remove_edge(&mut self, edge: &Edge) {
        remove_member(&mut self.edge_types, &edge.edge_type, edge.id);
    }

    pub fn nodes_with_label(&self, label: &str) -> Vec<NodeId> {
        self.labels
            .get(label)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn edges_with_type(&self, edge_type: &str) -> Vec<EdgeId> {
        self.edge_types
            .get(edge_type)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn edge_type_count(&self) -> usize {
        self.edge_types.len()
    }

    pub fn has_property_index(&self, property: &str) -> bool {
        self.properties.contains_key(property)
    }

    pub fn property_index(&self, property: &str) -> Result<&PropertyIndex> {
        self.properties
            .get(property)
            .ok_or_else(|| Error::IndexNotFound {
                property: property.to_string(),
            })
    }

    /// Install a built index, replacing any previous one on the same property.
    pub fn add_property_index(&mut self, index: PropertyIndex) {
        self.properties.insert(index.property.clone(), index);
    }

    pub fn drop_property_index(&mut self, property: &str) -> bool {
        self.properties.remove(property).is_some()
    }

    pub fn property_index_count(&self) -> usize {
        self.properties.len()
    }

    /// Definitions sorted by property name.
    pub fn property_index_defs(&self) -> Vec<PropertyIndexDef> {
        let mut defs: Vec<_> = self.properties.values().map(PropertyIndex::definition).collect();
        defs.sort_by(|a, b| a.property.cmp(&b.property));
        defs
    }

    pub fn statistics(&self) -> BTreeMap<String, IndexStatistics> {
        self.properties
            .iter()
            .map(|(property, index)| (property.clone(), index.statistics()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        self.edge_types.clear();
        self.properties.clear();
    }
}

fn remove_member(map: &mut HashMap<String, BTreeSet<u64>>, key: &str, id: u64) {
    if let Some(ids) = map.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(value_type: ValueType, values: &[(NodeId, Value)]) -> PropertyIndex {
        let mut index = PropertyIndex::new("p", value_type).unwrap();
        for (id, value) in values {
            index.insert(*id, value).unwrap();
        }
        index
    }

    #[test]
    fn test_int_keys_sort_negatives_first() {
        let values = [i64::MIN, -5, -1, 0, 1, 42, i64::MAX];
        let keys: Vec<_> = values
            .iter()
            .map(|i| encode_index_key(&Value::Int(*i)).unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_float_keys_sort_numerically() {
        let values = [f64::MIN, -2.5, -0.1, 0.0, 1e-9, 3.0, f64::MAX];
        let keys: Vec<_> = values
            .iter()
            .map(|x| encode_index_key(&Value::Float(*x)).unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            encode_index_key(&Value::Float(-0.0)),
            encode_index_key(&Value::Float(0.0))
        );
    }

    #[test]
    fn test_range_is_inclusive() {
        let index = index_with(
            ValueType::Int,
            &[(1, Value::Int(-10)), (2, Value::Int(5)), (3, Value::Int(10)), (4, Value::Int(11))],
        );
        assert_eq!(index.range(&Value::Int(-10), &Value::Int(10)).unwrap(), vec![1, 2, 3]);
        assert!(index.range(&Value::Int(10), &Value::Int(-10)).unwrap().is_empty());
    }

    #[test]
    fn test_prefix_lookup() {
        let index = index_with(
            ValueType::String,
            &[
                (1, Value::from("alice")),
                (2, Value::from("alfred")),
                (3, Value::from("bob")),
            ],
        );
        assert_eq!(index.prefix("al").unwrap(), vec![2, 1]);
        assert!(index.prefix("c").unwrap().is_empty());

        let ints = index_with(ValueType::Int, &[]);
        assert!(matches!(ints.prefix("1"), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut index = index_with(ValueType::Int, &[]);
        let err = index.insert(1, &Value::from("x")).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(PropertyIndex::new("tags", ValueType::List).is_err());
    }

    #[test]
    fn test_remove_drops_empty_values() {
        let mut index = index_with(ValueType::Bool, &[(1, Value::Bool(true)), (2, Value::Bool(true))]);
        index.remove(1, &Value::Bool(true)).unwrap();
        assert_eq!(index.statistics().unique_values, 1);
        index.remove(2, &Value::Bool(true)).unwrap();
        assert_eq!(index.statistics().unique_values, 0);
        assert_eq!(index.statistics().avg_nodes_per_value, 0.0);
    }
}
