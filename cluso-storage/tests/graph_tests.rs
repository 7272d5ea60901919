//! # Graph Storage Tests
//!
//! Node and edge CRUD, cascading deletes, label and type lookups, property
//! indexes and the NotFound / StaleReference distinction.

use std::path::Path;

use tempfile::TempDir;

use cluso_core::{
    config::DatabaseConfig,
    error::Error,
    types::Properties,
    value::{Value, ValueType},
};
use cluso_storage::graph::GraphStorage;

fn test_config(dir: &Path) -> DatabaseConfig {
    let mut config = DatabaseConfig::new(dir);
    config.sync_writes = false;
    config.memtable_size_mb = 4;
    config
}

fn open(dir: &TempDir) -> GraphStorage {
    GraphStorage::open(test_config(dir.path())).unwrap()
}

fn props(pairs: &[(&str, Value)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn ids<T>(items: &[T], id: impl Fn(&T) -> u64) -> Vec<u64> {
    items.iter().map(id).collect()
}

// ============================================================================
// Nodes
// ============================================================================

#[test]
fn test_create_and_get_node() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let alice = graph
        .create_node(
            ["Person", "Employee", "Person"],
            props(&[("name", Value::from("alice")), ("age", Value::Int(30))]),
        )
        .unwrap();

    assert_eq!(alice.id, 1, "ids start at one");
    assert_eq!(alice.labels, vec!["Person", "Employee"]);
    assert_eq!(alice.property("age"), Some(&Value::Int(30)));
    assert_eq!(alice.created_at, alice.updated_at);

    let fetched = graph.get_node(alice.id).unwrap();
    assert_eq!(fetched, alice);

    let bob = graph.create_node(["Person"], Properties::new()).unwrap();
    assert_eq!(bob.id, 2);
}

#[test]
fn test_update_node_merges_properties() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let node = graph
        .create_node(
            ["Person"],
            props(&[("name", Value::from("alice")), ("age", Value::Int(30))]),
        )
        .unwrap();

    let updated = graph
        .update_node(
            node.id,
            props(&[("age", Value::Int(31)), ("city", Value::from("Oslo"))]),
        )
        .unwrap();

    assert_eq!(updated.property("name"), Some(&Value::from("alice")));
    assert_eq!(updated.property("age"), Some(&Value::Int(31)));
    assert_eq!(updated.property("city"), Some(&Value::from("Oslo")));
    assert_eq!(updated.created_at, node.created_at);
    assert_eq!(graph.get_node(node.id).unwrap(), updated);
}

#[test]
fn test_set_node_labels_moves_label_index() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let node = graph.create_node(["Draft"], Properties::new()).unwrap();
    let relabeled = graph
        .set_node_labels(node.id, ["Published", "Article", "Article"])
        .unwrap();

    assert_eq!(relabeled.labels, vec!["Published", "Article"]);
    assert!(graph.find_nodes_by_label("Draft").unwrap().is_empty());
    assert_eq!(graph.find_nodes_by_label("Article").unwrap().len(), 1);
    assert_eq!(graph.statistics().label_count, 2);
}

#[test]
fn test_missing_node_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    assert!(matches!(
        graph.get_node(42),
        Err(Error::NotFound { entity: "node", id: 42 })
    ));
    assert!(matches!(
        graph.update_node(42, Properties::new()),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(graph.delete_node(0), Err(Error::NotFound { .. })));
}

#[test]
fn test_deleted_node_is_stale_for_writes() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let node = graph.create_node(["Person"], Properties::new()).unwrap();
    graph.delete_node(node.id).unwrap();

    assert!(matches!(graph.get_node(node.id), Err(Error::NotFound { .. })));
    assert!(matches!(
        graph.update_node(node.id, Properties::new()),
        Err(Error::StaleReference { entity: "node", .. })
    ));
    assert!(matches!(
        graph.delete_node(node.id),
        Err(Error::StaleReference { .. })
    ));

    let other = graph.create_node(["Person"], Properties::new()).unwrap();
    assert!(matches!(
        graph.create_edge(other.id, node.id, "KNOWS", Properties::new(), 1.0),
        Err(Error::StaleReference { entity: "node", .. })
    ));
}

#[test]
fn test_non_finite_floats_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let result = graph.create_node(["Sensor"], props(&[("reading", Value::Float(f64::NAN))]));
    assert!(matches!(result, Err(Error::InvalidArgument { .. })));

    let nested = Value::List(vec![Value::Float(1.0), Value::Float(f64::INFINITY)]);
    let result = graph.create_node(["Sensor"], props(&[("readings", nested)]));
    assert!(matches!(result, Err(Error::InvalidArgument { .. })));

    let a = graph.create_node(["Sensor"], Properties::new()).unwrap();
    let b = graph.create_node(["Sensor"], Properties::new()).unwrap();
    let result = graph.create_edge(a.id, b.id, "LINK", Properties::new(), f64::NAN);
    assert!(matches!(result, Err(Error::InvalidArgument { .. })));

    assert_eq!(graph.statistics().node_count, 2);
    assert_eq!(graph.statistics().edge_count, 0);
}

// ============================================================================
// Edges
// ============================================================================

#[test]
fn test_create_edge_and_adjacency() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let a = graph.create_node(["Person"], Properties::new()).unwrap();
    let b = graph.create_node(["Person"], Properties::new()).unwrap();
    let c = graph.create_node(["Company"], Properties::new()).unwrap();

    let ab = graph
        .create_edge(a.id, b.id, "KNOWS", props(&[("since", Value::Int(2019))]), 0.5)
        .unwrap();
    let ac = graph
        .create_edge(a.id, c.id, "WORKS_AT", Properties::new(), 1.0)
        .unwrap();
    let bc = graph
        .create_edge(b.id, c.id, "WORKS_AT", Properties::new(), 1.0)
        .unwrap();

    assert_eq!(ab.from, a.id);
    assert_eq!(ab.to, b.id);
    assert_eq!(ab.edge_type, "KNOWS");
    assert_eq!(ab.weight, 0.5);
    assert_eq!(graph.get_edge(ab.id).unwrap(), ab);

    let out = graph.get_outgoing_edges(a.id).unwrap();
    assert_eq!(ids(&out, |e| e.id), vec![ab.id, ac.id]);
    let into_c = graph.get_incoming_edges(c.id).unwrap();
    assert_eq!(ids(&into_c, |e| e.id), vec![ac.id, bc.id]);
    assert!(graph.get_incoming_edges(a.id).unwrap().is_empty());
    assert!(graph.get_outgoing_edges(999).unwrap().is_empty());
}

#[test]
fn test_edge_to_missing_node_fails() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let a = graph.create_node(["Person"], Properties::new()).unwrap();
    let result = graph.create_edge(a.id, 77, "KNOWS", Properties::new(), 1.0);
    assert!(matches!(result, Err(Error::NotFound { entity: "node", id: 77 })));
    assert!(graph.get_outgoing_edges(a.id).unwrap().is_empty());
    assert_eq!(graph.statistics().edge_count, 0);
}

#[test]
fn test_update_and_delete_edge() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let a = graph.create_node(["N"], Properties::new()).unwrap();
    let b = graph.create_node(["N"], Properties::new()).unwrap();
    let edge = graph
        .create_edge(a.id, b.id, "LINK", props(&[("x", Value::Int(1))]), 1.0)
        .unwrap();

    let updated = graph
        .update_edge(edge.id, props(&[("y", Value::Bool(true))]), Some(2.5))
        .unwrap();
    assert_eq!(updated.weight, 2.5);
    assert_eq!(updated.property("x"), Some(&Value::Int(1)));
    assert_eq!(updated.property("y"), Some(&Value::Bool(true)));

    let unweighted = graph.update_edge(edge.id, Properties::new(), None).unwrap();
    assert_eq!(unweighted.weight, 2.5);

    graph.delete_edge(edge.id).unwrap();
    assert!(matches!(graph.get_edge(edge.id), Err(Error::NotFound { .. })));
    assert!(matches!(
        graph.delete_edge(edge.id),
        Err(Error::StaleReference { entity: "edge", .. })
    ));
    assert!(matches!(
        graph.update_edge(500, Properties::new(), None),
        Err(Error::NotFound { entity: "edge", .. })
    ));
    assert!(graph.get_outgoing_edges(a.id).unwrap().is_empty());
    assert!(graph.get_incoming_edges(b.id).unwrap().is_empty());
    assert!(graph.find_edges_by_type("LINK").unwrap().is_empty());
}

#[test]
fn test_delete_node_cascades_to_edges() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let hub = graph.create_node(["Hub"], Properties::new()).unwrap();
    let spokes: Vec<_> = (0..5)
        .map(|_| graph.create_node(["Spoke"], Properties::new()).unwrap())
        .collect();
    for spoke in &spokes {
        graph
            .create_edge(hub.id, spoke.id, "OUT", Properties::new(), 1.0)
            .unwrap();
        graph
            .create_edge(spoke.id, hub.id, "IN", Properties::new(), 1.0)
            .unwrap();
    }
    let unrelated = graph
        .create_edge(spokes[0].id, spokes[1].id, "SIDE", Properties::new(), 1.0)
        .unwrap();
    assert_eq!(graph.statistics().edge_count, 11);

    graph.delete_node(hub.id).unwrap();

    let stats = graph.statistics();
    assert_eq!(stats.node_count, 5);
    assert_eq!(stats.edge_count, 1);
    for spoke in &spokes {
        let out = graph.get_outgoing_edges(spoke.id).unwrap();
        assert!(out.iter().all(|e| e.id == unrelated.id));
        assert!(graph
            .get_incoming_edges(spoke.id)
            .unwrap()
            .iter()
            .all(|e| e.id == unrelated.id));
    }
    assert!(graph.find_edges_by_type("OUT").unwrap().is_empty());
    assert!(graph.find_edges_by_type("IN").unwrap().is_empty());
    assert_eq!(graph.find_edges_by_type("SIDE").unwrap().len(), 1);
}

#[test]
fn test_self_loop() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let node = graph.create_node(["N"], Properties::new()).unwrap();
    let edge = graph
        .create_edge(node.id, node.id, "SELF", Properties::new(), 1.0)
        .unwrap();

    assert_eq!(ids(&graph.get_outgoing_edges(node.id).unwrap(), |e| e.id), vec![edge.id]);
    assert_eq!(ids(&graph.get_incoming_edges(node.id).unwrap(), |e| e.id), vec![edge.id]);

    graph.delete_node(node.id).unwrap();
    assert_eq!(graph.statistics().edge_count, 0);
}

#[test]
fn test_adjacency_without_edge_compression() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.enable_edge_compression = false;
    let graph = GraphStorage::open(config).unwrap();

    let a = graph.create_node(["N"], Properties::new()).unwrap();
    let b = graph.create_node(["N"], Properties::new()).unwrap();
    let e1 = graph.create_edge(a.id, b.id, "T", Properties::new(), 1.0).unwrap();
    let e2 = graph.create_edge(a.id, b.id, "T", Properties::new(), 1.0).unwrap();

    assert_eq!(ids(&graph.get_outgoing_edges(a.id).unwrap(), |e| e.id), vec![e1.id, e2.id]);
    assert!(graph.edge_cache_stats().is_none());
    assert!(graph.lsm_stats().is_none());
}

// ============================================================================
// Temporal edges
// ============================================================================

#[test]
fn test_edges_at_time_and_in_range() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);
    let a = graph.create_node(["P"], Properties::new()).unwrap();
    let b = graph.create_node(["P"], Properties::new()).unwrap();

    let early = graph
        .create_temporal_edge(a.id, b.id, "WORKED_AT", Properties::new(), 1.0, 100, Some(200))
        .unwrap();
    let current = graph
        .create_temporal_edge(a.id, b.id, "WORKS_AT", Properties::new(), 1.0, 300, None)
        .unwrap();
    let timeless = graph
        .create_edge(a.id, b.id, "KNOWS", Properties::new(), 1.0)
        .unwrap();

    assert_eq!(early.edge.property("valid_to"), Some(&Value::Int(200)));
    assert_eq!(current.edge.property("valid_to"), None);
    assert_eq!(current.edge.property("valid_from"), Some(&Value::Int(300)));

    let at = |t: i64| ids(&graph.edges_at_time(a.id, t).unwrap(), |e| e.edge.id);
    assert_eq!(at(50), vec![timeless.id]);
    assert_eq!(at(150), vec![early.edge.id, timeless.id]);
    assert_eq!(at(250), vec![timeless.id]);
    assert_eq!(at(10_000), vec![current.edge.id, timeless.id]);

    let range = |s: i64, e: i64| ids(&graph.edges_in_time_range(a.id, s, e).unwrap(), |t| t.edge.id);
    assert_eq!(range(0, 99), vec![timeless.id]);
    assert_eq!(range(200, 300), vec![early.edge.id, current.edge.id, timeless.id]);
    assert_eq!(range(201, 299), vec![timeless.id]);

    assert!(graph.edges_in_time_range(a.id, 10, 5).is_err());
    assert!(matches!(
        graph.create_temporal_edge(a.id, b.id, "T", Properties::new(), 1.0, 10, Some(5)),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(graph.edges_at_time(b.id, 150).unwrap().is_empty());
}

#[test]
fn test_edge_compression_stats_follow_the_backend() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);
    let hub = graph.create_node(["Hub"], Properties::new()).unwrap();
    for _ in 0..20 {
        let leaf = graph.create_node(["Leaf"], Properties::new()).unwrap();
        graph
            .create_edge(hub.id, leaf.id, "HAS", Properties::new(), 1.0)
            .unwrap();
    }
    let stats = graph.edge_compression_stats().unwrap().unwrap();
    // One outgoing list on the hub, one incoming list per leaf.
    assert_eq!(stats.total_lists, 21);
    assert_eq!(stats.total_edges, 40);
    assert!(stats.ratio() > 0.0);

    let other_dir = TempDir::new().unwrap();
    let mut config = test_config(other_dir.path());
    config.enable_edge_compression = false;
    let memory = GraphStorage::open(config).unwrap();
    assert_eq!(memory.edge_compression_stats().unwrap(), None);
}

// ============================================================================
// Labels, types and property scans
// ============================================================================

#[test]
fn test_find_by_label_and_type() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    let mut people = Vec::new();
    for i in 0..10 {
        let labels: &[&str] = if i % 2 == 0 { &["Person", "Even"] } else { &["Person"] };
        people.push(graph.create_node(labels.iter().copied(), Properties::new()).unwrap());
    }
    for pair in people.windows(2) {
        graph
            .create_edge(pair[0].id, pair[1].id, "NEXT", Properties::new(), 1.0)
            .unwrap();
    }

    let persons = graph.find_nodes_by_label("Person").unwrap();
    assert_eq!(persons.len(), 10);
    assert!(persons.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(graph.find_nodes_by_label("Even").unwrap().len(), 5);
    assert!(graph.find_nodes_by_label("Robot").unwrap().is_empty());

    assert_eq!(graph.find_edges_by_type("NEXT").unwrap().len(), 9);
    assert!(graph.find_edges_by_type("PREV").unwrap().is_empty());

    let stats = graph.statistics();
    assert_eq!(stats.label_count, 2);
    assert_eq!(stats.edge_type_count, 1);
}

#[test]
fn test_find_nodes_by_property_scans_without_index() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    for i in 0..20i64 {
        graph
            .create_node(["Item"], props(&[("bucket", Value::Int(i % 4))]))
            .unwrap();
    }
    graph
        .create_node(["Item"], props(&[("bucket", Value::from("1"))]))
        .unwrap();

    let found = graph.find_nodes_by_property("bucket", &Value::Int(1)).unwrap();
    assert_eq!(found.len(), 5);
    assert!(found.iter().all(|n| n.property("bucket") == Some(&Value::Int(1))));

    // No coercion between variants.
    let strings = graph.find_nodes_by_property("bucket", &Value::from("1")).unwrap();
    assert_eq!(strings.len(), 1);
    assert!(graph
        .find_nodes_by_property("missing", &Value::Int(1))
        .unwrap()
        .is_empty());
}

// ============================================================================
// Property indexes
// ============================================================================

#[test]
fn test_property_index_lookup_and_maintenance() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    // Nodes created before the index are picked up when it is built.
    let early = graph
        .create_node(["Person"], props(&[("age", Value::Int(30))]))
        .unwrap();
    graph.create_property_index("age", ValueType::Int).unwrap();
    let late = graph
        .create_node(["Person"], props(&[("age", Value::Int(30))]))
        .unwrap();
    graph
        .create_node(["Person"], props(&[("age", Value::from("thirty"))]))
        .unwrap();

    let thirty = graph.lookup_property("age", &Value::Int(30)).unwrap();
    assert_eq!(ids(&thirty, |n| n.id), vec![early.id, late.id]);

    graph
        .update_node(early.id, props(&[("age", Value::Int(31))]))
        .unwrap();
    assert_eq!(
        ids(&graph.lookup_property("age", &Value::Int(30)).unwrap(), |n| n.id),
        vec![late.id]
    );
    assert_eq!(
        ids(&graph.lookup_property("age", &Value::Int(31)).unwrap(), |n| n.id),
        vec![early.id]
    );

    graph.delete_node(late.id).unwrap();
    assert!(graph.lookup_property("age", &Value::Int(30)).unwrap().is_empty());

    // The scan path agrees with the index.
    assert_eq!(
        graph.find_nodes_by_property("age", &Value::Int(31)).unwrap(),
        graph.lookup_property("age", &Value::Int(31)).unwrap()
    );
}

#[test]
fn test_property_index_range_is_value_ordered() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);
    graph.create_property_index("score", ValueType::Int).unwrap();
    graph.create_property_index("temp", ValueType::Float).unwrap();

    for score in [50i64, -10, 7, 100, 0, -300, 42] {
        graph
            .create_node(["Run"], props(&[("score", Value::Int(score))]))
            .unwrap();
    }
    for temp in [-1.5f64, 3.25, 0.0, -40.0, 12.0] {
        graph
            .create_node(["Reading"], props(&[("temp", Value::Float(temp))]))
            .unwrap();
    }

    let hits = graph
        .lookup_property_range("score", &Value::Int(-10), &Value::Int(50))
        .unwrap();
    let scores: Vec<i64> = hits
        .iter()
        .map(|n| n.property("score").and_then(Value::as_int).unwrap())
        .collect();
    assert_eq!(scores, vec![-10, 0, 7, 42, 50]);

    let hits = graph
        .lookup_property_range("temp", &Value::Float(-2.0), &Value::Float(5.0))
        .unwrap();
    let temps: Vec<f64> = hits
        .iter()
        .map(|n| n.property("temp").and_then(Value::as_float).unwrap())
        .collect();
    assert_eq!(temps, vec![-1.5, 0.0, 3.25]);

    assert!(graph
        .lookup_property_range("score", &Value::Int(60), &Value::Int(10))
        .unwrap()
        .is_empty());
}

#[test]
fn test_property_index_prefix() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);
    graph.create_property_index("name", ValueType::String).unwrap();
    graph.create_property_index("age", ValueType::Int).unwrap();

    for name in ["alice", "alicia", "albert", "bob", "al"] {
        graph
            .create_node(["Person"], props(&[("name", Value::from(name))]))
            .unwrap();
    }

    let names: Vec<String> = graph
        .lookup_property_prefix("name", "ali")
        .unwrap()
        .iter()
        .map(|n| n.property("name").and_then(Value::as_str).unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["alice", "alicia"]);
    assert_eq!(graph.lookup_property_prefix("name", "al").unwrap().len(), 4);
    assert_eq!(graph.lookup_property_prefix("name", "").unwrap().len(), 5);

    assert!(matches!(
        graph.lookup_property_prefix("age", "1"),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_property_index_errors() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);

    assert!(matches!(
        graph.lookup_property("age", &Value::Int(1)),
        Err(Error::IndexNotFound { .. })
    ));
    assert!(matches!(
        graph.drop_property_index("age"),
        Err(Error::IndexNotFound { .. })
    ));
    assert!(matches!(
        graph.create_property_index("tags", ValueType::List),
        Err(Error::InvalidArgument { .. })
    ));

    graph.create_property_index("age", ValueType::Int).unwrap();
    assert!(matches!(
        graph.create_property_index("age", ValueType::Int),
        Err(Error::InvalidArgument { .. })
    ));
    match graph.lookup_property("age", &Value::from("old")) {
        Err(Error::TypeMismatch {
            expected, actual, ..
        }) => {
            assert_eq!(expected, ValueType::Int);
            assert_eq!(actual, ValueType::String);
        }
        other => panic!("expected a type mismatch, got {:?}", other),
    }

    graph.drop_property_index("age").unwrap();
    assert_eq!(graph.statistics().property_indexes, 0);
    assert!(matches!(
        graph.lookup_property("age", &Value::Int(1)),
        Err(Error::IndexNotFound { .. })
    ));
}

#[test]
fn test_index_statistics() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);
    graph.create_property_index("color", ValueType::String).unwrap();

    for color in ["red", "red", "red", "blue"] {
        graph
            .create_node(["Car"], props(&[("color", Value::from(color))]))
            .unwrap();
    }

    let stats = graph.index_statistics();
    let color = &stats["color"];
    assert_eq!(color.value_type, ValueType::String);
    assert_eq!(color.unique_values, 2);
    assert_eq!(color.total_nodes, 4);
    assert!((color.avg_nodes_per_value - 2.0).abs() < f64::EPSILON);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_operations_fail_after_close() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);
    let node = graph.create_node(["N"], Properties::new()).unwrap();

    graph.close().unwrap();
    assert!(graph.is_closed());
    graph.close().unwrap();

    assert!(matches!(graph.get_node(node.id), Err(Error::Closed)));
    assert!(matches!(
        graph.create_node(["N"], Properties::new()),
        Err(Error::Closed)
    ));
    assert!(matches!(graph.snapshot(), Err(Error::Closed)));
}

#[test]
fn test_statistics_track_mutations() {
    let temp_dir = TempDir::new().unwrap();
    let graph = open(&temp_dir);
    assert_eq!(graph.statistics().node_count, 0);
    assert_eq!(graph.statistics().next_node_id, 1);

    let a = graph.create_node(["A"], Properties::new()).unwrap();
    let b = graph.create_node(["B"], Properties::new()).unwrap();
    graph.create_edge(a.id, b.id, "T", Properties::new(), 1.0).unwrap();

    let stats = graph.statistics();
    assert_eq!(stats.node_count, 2);
    assert_eq!(stats.edge_count, 1);
    assert_eq!(stats.current_lsn, 3);
    assert_eq!(stats.next_node_id, 3);
    assert_eq!(stats.next_edge_id, 2);

    let metrics = graph.metrics().snapshot();
    assert_eq!(metrics.nodes_created, 2);
    assert_eq!(metrics.edges_created, 1);
}
