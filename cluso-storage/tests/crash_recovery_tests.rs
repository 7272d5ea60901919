//! # Crash Recovery Tests
//!
//! A graph dropped without `close` must come back exactly as it was, from the
//! newest snapshot plus WAL replay, with and without edge compression, and in
//! every WAL mode.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use cluso_core::{
    config::DatabaseConfig,
    error::{Error, ErrorKind},
    types::{Edge, Node, Properties},
    value::{Value, ValueType},
};
use cluso_storage::graph::GraphStorage;
use cluso_storage::wal::{ENTRY_PREFIX_SIZE, WAL_HEADER_SIZE};

fn test_config(dir: &Path, compression: bool) -> DatabaseConfig {
    let mut config = DatabaseConfig::new(dir);
    config.sync_writes = false;
    config.enable_edge_compression = compression;
    config.memtable_size_mb = 1;
    config
}

/// Everything observable about a graph, in ID order.
#[derive(Debug, PartialEq)]
struct GraphImage {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    outgoing: Vec<Vec<u64>>,
    incoming: Vec<Vec<u64>>,
    indexed: Vec<u64>,
}

fn capture(graph: &GraphStorage) -> GraphImage {
    let stats = graph.statistics();
    let nodes: Vec<Node> = (1..stats.next_node_id)
        .filter_map(|id| graph.get_node(id).ok())
        .collect();
    let edges: Vec<Edge> = (1..stats.next_edge_id)
        .filter_map(|id| graph.get_edge(id).ok())
        .collect();
    let edge_ids = |list: Vec<Edge>| list.iter().map(|e| e.id).collect::<Vec<_>>();
    let outgoing = nodes
        .iter()
        .map(|n| edge_ids(graph.get_outgoing_edges(n.id).unwrap()))
        .collect();
    let incoming = nodes
        .iter()
        .map(|n| edge_ids(graph.get_incoming_edges(n.id).unwrap()))
        .collect();
    let indexed = graph
        .lookup_property_range("rank", &Value::Int(i64::MIN), &Value::Int(i64::MAX))
        .map(|found| found.iter().map(|n| n.id).collect())
        .unwrap_or_default();
    GraphImage {
        nodes,
        edges,
        outgoing,
        incoming,
        indexed,
    }
}

/// `count` nodes in a ring, with updates and deletes mixed in.
fn populate(graph: &GraphStorage, count: u64) {
    graph.create_property_index("rank", ValueType::Int).unwrap();
    let mut ids = Vec::new();
    for i in 0..count {
        let properties = Properties::from([
            ("rank".to_string(), Value::Int(i as i64)),
            ("name".to_string(), Value::String(format!("node-{}", i))),
        ]);
        ids.push(graph.create_node(["Node"], properties).unwrap().id);
    }
    if count > 1 {
        for (i, from) in ids.iter().enumerate() {
            let to = ids[(i + 1) % ids.len()];
            graph
                .create_edge(*from, to, "NEXT", Properties::new(), i as f64)
                .unwrap();
        }
    }
    for id in ids.iter().step_by(7) {
        graph
            .update_node(*id, Properties::from([("touched".to_string(), Value::Bool(true))]))
            .unwrap();
    }
    for id in ids.iter().skip(3).step_by(11) {
        graph.delete_node(*id).unwrap();
    }
}

fn wal_segments(dir: &Path) -> Vec<PathBuf> {
    let mut segments: Vec<PathBuf> = fs::read_dir(dir.join("wal"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "wal"))
        .collect();
    segments.sort();
    segments
}

fn check_recovery(count: u64, compression: bool) {
    let temp_dir = TempDir::new().unwrap();
    let before = {
        let graph = GraphStorage::open(test_config(temp_dir.path(), compression)).unwrap();
        populate(&graph, count);
        capture(&graph)
        // Dropped without close: no final snapshot.
    };
    assert!(cluso_storage::graph::list_snapshots(&temp_dir.path().join("snapshots"))
        .unwrap()
        .is_empty());

    let graph = GraphStorage::open(test_config(temp_dir.path(), compression)).unwrap();
    let after = capture(&graph);
    assert_eq!(after, before, "{} node(s), compression {}", count, compression);
    assert_eq!(graph.statistics().node_count, before.nodes.len() as u64);
    assert_eq!(graph.statistics().edge_count, before.edges.len() as u64);
}

// ============================================================================
// Drop without close
// ============================================================================

#[test]
fn test_recover_empty_graph() {
    check_recovery(0, true);
    check_recovery(0, false);
}

#[test]
fn test_recover_single_node() {
    check_recovery(1, true);
    check_recovery(1, false);
}

#[test]
fn test_recover_thousand_nodes_compressed() {
    check_recovery(1_000, true);
}

#[test]
fn test_recover_thousand_nodes_uncompressed() {
    check_recovery(1_000, false);
}

#[test]
fn test_recover_snapshot_plus_wal_tail() {
    let temp_dir = TempDir::new().unwrap();
    let before = {
        let graph = GraphStorage::open(test_config(temp_dir.path(), true)).unwrap();
        populate(&graph, 200);
        graph.snapshot().unwrap();
        for i in 0..25 {
            graph
                .create_node(["Late"], Properties::from([("i".to_string(), Value::Int(i))]))
                .unwrap();
        }
        capture(&graph)
    };

    let graph = GraphStorage::open(test_config(temp_dir.path(), true)).unwrap();
    assert_eq!(capture(&graph), before);
    assert_eq!(graph.metrics().snapshot().wal_replayed, 25);
    assert_eq!(graph.find_nodes_by_label("Late").unwrap().len(), 25);
}

#[test]
fn test_recover_without_destructors() {
    let temp_dir = TempDir::new().unwrap();
    let before = {
        let graph = GraphStorage::open(test_config(temp_dir.path(), false)).unwrap();
        populate(&graph, 100);
        let image = capture(&graph);
        // Nothing runs on the way out, as if the process died.
        std::mem::forget(graph);
        image
    };

    let graph = GraphStorage::open(test_config(temp_dir.path(), false)).unwrap();
    assert_eq!(capture(&graph), before);
}

#[test]
fn test_rebuilds_missing_adjacency_store() {
    let temp_dir = TempDir::new().unwrap();
    let before = {
        let graph = GraphStorage::open(test_config(temp_dir.path(), true)).unwrap();
        populate(&graph, 50);
        graph.close().unwrap();
        capture_after_reopen(temp_dir.path())
    };

    fs::remove_dir_all(temp_dir.path().join("lsm")).unwrap();
    let graph = GraphStorage::open(test_config(temp_dir.path(), true)).unwrap();
    assert_eq!(capture(&graph), before);
}

fn capture_after_reopen(dir: &Path) -> GraphImage {
    let graph = GraphStorage::open(test_config(dir, true)).unwrap();
    let image = capture(&graph);
    graph.close().unwrap();
    image
}

// ============================================================================
// Damaged logs
// ============================================================================

#[test]
fn test_torn_tail_loses_only_last_mutation() {
    let temp_dir = TempDir::new().unwrap();
    {
        let graph = GraphStorage::open(test_config(temp_dir.path(), false)).unwrap();
        for i in 0..10 {
            graph
                .create_node(["N"], Properties::from([("i".to_string(), Value::Int(i))]))
                .unwrap();
        }
    }

    let segment = wal_segments(temp_dir.path()).pop().unwrap();
    let file = OpenOptions::new().write(true).open(&segment).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - 5).unwrap();
    drop(file);

    let graph = GraphStorage::open(test_config(temp_dir.path(), false)).unwrap();
    assert_eq!(graph.statistics().node_count, 9);
    assert!(graph.get_node(10).is_err());
    assert_eq!(graph.current_lsn(), 9);

    // The log keeps working after the truncated record.
    let node = graph.create_node(["N"], Properties::new()).unwrap();
    assert_eq!(graph.get_node(node.id).unwrap(), node);
}

#[test]
fn test_corrupt_record_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    {
        let graph = GraphStorage::open(test_config(temp_dir.path(), false)).unwrap();
        for _ in 0..5 {
            graph.create_node(["N"], Properties::new()).unwrap();
        }
    }

    let segment = wal_segments(temp_dir.path()).remove(0);
    let mut file = OpenOptions::new().write(true).open(&segment).unwrap();
    file.seek(SeekFrom::Start((WAL_HEADER_SIZE + ENTRY_PREFIX_SIZE + 1) as u64))
        .unwrap();
    file.write_all(b"X").unwrap();
    file.sync_all().unwrap();
    drop(file);

    let err = match GraphStorage::open(test_config(temp_dir.path(), false)) {
        Ok(_) => panic!("opening over a corrupt WAL record must fail"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), ErrorKind::Corruption);
    assert!(matches!(err, Error::ChecksumMismatch { lsn: 1, .. }));
}

// ============================================================================
// WAL modes
// ============================================================================

#[test]
fn test_recover_from_compressed_group_committed_wal() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path(), true);
    config.wal_compression = true;
    config.wal_group_commit = true;
    config.group_commit_delay_us = 50;

    let before = {
        let graph = GraphStorage::open(config.clone()).unwrap();
        populate(&graph, 300);
        let stats = graph.wal_stats();
        assert_eq!(stats.entries, graph.current_lsn());
        assert!(stats.stored_bytes > 0);
        capture(&graph)
    };

    let graph = GraphStorage::open(config.clone()).unwrap();
    assert_eq!(capture(&graph), before);
    graph.close().unwrap();

    // Segments written compressed stay readable with compression turned off.
    config.wal_compression = false;
    config.wal_group_commit = false;
    let graph = GraphStorage::open(config).unwrap();
    assert_eq!(capture(&graph), before);
}

// ============================================================================
// Deleted IDs
// ============================================================================

#[test]
fn test_deleted_ids_stay_stale_after_recovery() {
    let temp_dir = TempDir::new().unwrap();
    let (deleted, edge, survivor) = {
        let graph = GraphStorage::open(test_config(temp_dir.path(), false)).unwrap();
        let a = graph.create_node(["N"], Properties::new()).unwrap();
        let b = graph.create_node(["N"], Properties::new()).unwrap();
        let edge = graph.create_edge(a.id, b.id, "T", Properties::new(), 1.0).unwrap();
        graph.delete_node(a.id).unwrap();
        (a.id, edge.id, b.id)
    };

    let stale = |graph: &GraphStorage| {
        assert!(matches!(
            graph.update_node(deleted, Properties::new()),
            Err(Error::StaleReference { entity: "node", .. })
        ));
        assert!(matches!(
            graph.delete_edge(edge),
            Err(Error::StaleReference { entity: "edge", .. })
        ));
        assert!(matches!(
            graph.create_edge(survivor, deleted, "T", Properties::new(), 1.0),
            Err(Error::StaleReference { entity: "node", .. })
        ));
    };

    // From WAL replay alone.
    let graph = GraphStorage::open(test_config(temp_dir.path(), false)).unwrap();
    stale(&graph);
    graph.close().unwrap();

    // From the snapshot written by close.
    let graph = GraphStorage::open(test_config(temp_dir.path(), false)).unwrap();
    assert_eq!(graph.metrics().snapshot().wal_replayed, 0);
    stale(&graph);
}

// ============================================================================
// Concurrent readers
// ============================================================================

#[test]
fn test_adjacency_reads_racing_commits_lose_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path(), true);
    config.edge_cache_size = 1;

    let graph = Arc::new(GraphStorage::open(config.clone()).unwrap());
    let hubs: Vec<u64> = (0..4)
        .map(|_| graph.create_node(["Hub"], Properties::new()).unwrap().id)
        .collect();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|r| {
            let graph = Arc::clone(&graph);
            let hubs = hubs.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut i = r;
                while !done.load(Ordering::Acquire) {
                    let hub = hubs[i % hubs.len()];
                    graph.get_outgoing_edges(hub).unwrap();
                    graph.get_incoming_edges(hub).unwrap();
                    if i % 8 == 0 {
                        graph.clear_edge_cache();
                    }
                    i += 1;
                }
            })
        })
        .collect();
    let writers: Vec<_> = (0..4)
        .map(|w| {
            let graph = Arc::clone(&graph);
            let hubs = hubs.clone();
            thread::spawn(move || {
                (0..100)
                    .map(|i| {
                        let from = hubs[(w + i) % hubs.len()];
                        let to = hubs[(w + i + 1) % hubs.len()];
                        graph
                            .create_edge(from, to, "LINK", Properties::new(), 1.0)
                            .unwrap()
                            .id
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut committed: Vec<u64> = writers
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    committed.sort_unstable();
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    let adjacency = |graph: &GraphStorage| {
        graph.clear_edge_cache();
        let mut outgoing = Vec::new();
        let mut incoming = Vec::new();
        for hub in &hubs {
            outgoing.extend(graph.get_outgoing_edges(*hub).unwrap().iter().map(|e| e.id));
            incoming.extend(graph.get_incoming_edges(*hub).unwrap().iter().map(|e| e.id));
        }
        outgoing.sort_unstable();
        incoming.sort_unstable();
        (outgoing, incoming)
    };
    assert_eq!(adjacency(&graph), (committed.clone(), committed.clone()));

    // After close the WAL is truncated, so the lists must come from the
    // adjacency store itself.
    graph.close().unwrap();
    drop(graph);
    let graph = GraphStorage::open(config).unwrap();
    assert_eq!(adjacency(&graph), (committed.clone(), committed));
}
