//! Unit tests for cluso-core

use std::collections::BTreeMap;
use std::io::Write;

use proptest::prelude::*;

use cluso_core::{
    config::{DatabaseConfig, ShardingStrategy},
    error::{Error, ErrorKind, ResultExt},
    logging::init_logging,
    metrics::Metrics,
    types::{Direction, Edge, Node, Properties},
    value::{Value, ValueType},
};

mod value_tests {
    use super::*;

    #[test]
    fn test_value_type_tags() {
        assert_eq!(Value::from("x").value_type(), ValueType::String);
        assert_eq!(Value::from(1i64).value_type(), ValueType::Int);
        assert_eq!(Value::from(1.5).value_type(), ValueType::Float);
        assert_eq!(Value::from(true).value_type(), ValueType::Bool);
        assert_eq!(Value::from(vec![Value::Int(1)]).value_type(), ValueType::List);
        assert_eq!(Value::from(BTreeMap::new()).value_type(), ValueType::Map);

        assert!(ValueType::Float.is_scalar());
        assert!(!ValueType::Map.is_scalar());
        assert_eq!(ValueType::Bool.to_string(), "bool");
    }

    #[test]
    fn test_no_coercion_between_variants() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::from("1"), Value::Int(1));
        assert_eq!(Value::Int(1).as_float(), None);
        assert_eq!(Value::Float(2.5).as_float(), Some(2.5));
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
        assert_eq!(Value::Bool(false).as_bool(), Some(false));
    }

    #[test]
    fn test_tagged_json_form() {
        let json = serde_json::to_string(&Value::Int(42)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":42}"#);

        let nested = Value::Map(BTreeMap::from([(
            "tags".to_string(),
            Value::List(vec![Value::from("a"), Value::Bool(true)]),
        )]));
        let decoded: Value = serde_json::from_str(&serde_json::to_string(&nested).unwrap()).unwrap();
        assert_eq!(decoded, nested);
    }

    #[test]
    fn test_display() {
        let list = Value::List(vec![Value::Int(1), Value::from("two")]);
        assert_eq!(list.to_string(), r#"[1, "two"]"#);
    }
}

mod types_tests {
    use super::*;

    fn edge() -> Edge {
        Edge {
            id: 9,
            from: 1,
            to: 2,
            edge_type: "KNOWS".to_string(),
            properties: Properties::new(),
            weight: 1.0,
            created_at: 0,
        }
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::Outgoing.as_key_segment(), "out");
        assert_eq!(Direction::Incoming.to_string(), "in");
        assert_eq!(Direction::Outgoing.reverse(), Direction::Incoming);

        let edge = edge();
        assert_eq!(edge.neighbor(Direction::Outgoing), 2);
        assert_eq!(edge.neighbor(Direction::Incoming), 1);
    }

    #[test]
    fn test_edge_type_serializes_as_type() {
        let json = serde_json::to_value(edge()).unwrap();
        assert_eq!(json["type"], "KNOWS");
    }

    #[test]
    fn test_node_accessors() {
        let node = Node {
            id: 1,
            labels: vec!["Person".to_string()],
            properties: Properties::from([("age".to_string(), Value::Int(3))]),
            created_at: 10,
            updated_at: 10,
        };
        assert!(node.has_label("Person"));
        assert!(!node.has_label("person"));
        assert_eq!(node.property("age"), Some(&Value::Int(3)));
        assert_eq!(node.property("name"), None);
    }
}

mod error_tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let not_found = Error::NotFound { entity: "node", id: 3 };
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert!(not_found.is_recoverable());

        let checksum = Error::ChecksumMismatch {
            lsn: 7,
            expected: 1,
            actual: 2,
        };
        assert_eq!(checksum.kind(), ErrorKind::Corruption);
        assert!(!checksum.is_recoverable());
        assert_eq!(checksum.error_code(), "CHECKSUM_MISMATCH");

        let stale = Error::StaleReference { entity: "edge", id: 4 };
        assert_eq!(stale.kind(), ErrorKind::WriteConflict);

        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.kind(), ErrorKind::IoFailure);
        assert!(!Error::Closed.is_recoverable());
    }

    #[test]
    fn test_batch_failure_takes_kind_of_cause() {
        let err = Error::BatchFailed {
            index: 12,
            source: Box::new(Error::NotFound { entity: "node", id: 99 }),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.error_code(), "BATCH_FAILED");
        assert!(err.to_string().contains("#12"));
    }

    #[test]
    fn test_context_keeps_classification() {
        let result: cluso_core::Result<()> = Err(Error::NotFound { entity: "node", id: 1 });
        let err = result.with_context(|| "loading".to_string()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let result: cluso_core::Result<()> = Err(Error::corruption("block 3", "bad magic"));
        match result.with_context(|| "table 7".to_string()) {
            Err(Error::Corruption { context, .. }) => assert_eq!(context, "table 7: block 3"),
            other => panic!("unexpected {:?}", other),
        }
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DatabaseConfig::new("/tmp/cluso");
        config.validate().unwrap();
        assert_eq!(config.shard_count, 256);
        assert!(config.enable_edge_compression);
        assert_eq!(config.edge_cache_size, 10_000);
        assert_eq!(config.block_cache_capacity(), 64 * 1024 * 1024 / 16 / 1024);
        assert_eq!(config.wal_dir(), std::path::Path::new("/tmp/cluso/wal"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = DatabaseConfig::default();
        config.shard_count = 100;
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));

        config.sharding = ShardingStrategy::ConsistentHash { virtual_nodes: 32 };
        config.validate().unwrap();

        config.sharding = ShardingStrategy::ConsistentHash { virtual_nodes: 0 };
        assert!(config.validate().is_err());

        let mut config = DatabaseConfig::default();
        config.memtable_size_mb = 0;
        assert!(config.validate().is_err());

        let mut config = DatabaseConfig::default();
        config.l0_compaction_trigger = 1;
        assert!(config.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_modulo_accepts_only_powers_of_two(shards in 1usize..100_000) {
            let mut config = DatabaseConfig::default();
            config.shard_count = shards;
            prop_assert_eq!(config.validate().is_ok(), shards.is_power_of_two());
        }
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "data_dir": "/data/g", "memtable_size_mb": 8, "sharding": {{ "strategy": "consistent_hash", "virtual_nodes": 16 }}, "shard_count": 10 }}"#
        )
        .unwrap();

        let config = DatabaseConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.memtable_size_mb, 8);
        assert_eq!(config.shard_count, 10);
        assert_eq!(config.sharding, ShardingStrategy::ConsistentHash { virtual_nodes: 16 });
        assert_eq!(config.cache_size_mb, 64);
        assert!(config.sync_writes);
    }

    #[test]
    fn test_from_json_file_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "memtable_size_mb": "lots" }}"#).unwrap();
        assert!(matches!(
            DatabaseConfig::from_json_file(file.path()),
            Err(Error::Configuration { .. })
        ));

        assert!(matches!(
            DatabaseConfig::from_json_file("/definitely/not/here.json"),
            Err(Error::Io { .. })
        ));
    }
}

mod metrics_tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_wal_append(3, 120);
        metrics.record_batch(true);
        metrics.record_batch(false);
        clone.record_edge_cache(true);
        clone.record_edge_cache(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.wal_appends, 3);
        assert_eq!(snapshot.wal_bytes, 120);
        assert_eq!(snapshot.batches_committed, 1);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.edge_cache_hits, 1);
        assert_eq!(snapshot.edge_cache_misses, 1);
    }
}

mod logging_tests {
    use super::*;

    #[test]
    fn test_init_logging_only_once() {
        let _ = init_logging("warn");
        // A global subscriber is installed by now.
        assert!(!init_logging("debug"));
    }
}
