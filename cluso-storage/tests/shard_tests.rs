//! Shard lock manager: routing, reader concurrency and the coarse write lock

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use cluso_core::config::ShardingStrategy;
use cluso_storage::shard::{ShardLockManager, ShardRouter};

type Shards = ShardLockManager<HashMap<u64, String>>;

fn populated(count: u64) -> Shards {
    let shards = Shards::new(256, ShardingStrategy::Modulo).unwrap();
    {
        let _guard = shards.lock_writes();
        for id in 0..count {
            shards.write(id).insert(id, format!("entity-{}", id));
        }
    }
    shards
}

#[test]
fn test_modulo_routing_uses_low_bits() {
    let router = ShardRouter::new(ShardingStrategy::Modulo, 256).unwrap();
    assert_eq!(router.shard_for(0), 0);
    assert_eq!(router.shard_for(255), 255);
    assert_eq!(router.shard_for(256), 0);
    assert_eq!(router.shard_for(1_000_003), (1_000_003 & 255) as usize);
}

#[test]
fn test_modulo_requires_power_of_two() {
    assert!(ShardRouter::new(ShardingStrategy::Modulo, 100).is_err());
    assert!(ShardRouter::new(ShardingStrategy::Modulo, 0).is_err());
    assert!(Shards::new(3, ShardingStrategy::Modulo).is_err());
}

#[test]
fn test_consistent_hash_is_stable_and_spread() {
    let strategy = ShardingStrategy::ConsistentHash { virtual_nodes: 64 };
    let router = ShardRouter::new(strategy, 16).unwrap();
    let again = ShardRouter::new(strategy, 16).unwrap();

    let mut counts = vec![0usize; 16];
    for id in 0..16_000u64 {
        let shard = router.shard_for(id);
        assert_eq!(shard, again.shard_for(id));
        counts[shard] += 1;
    }
    assert!(counts.iter().all(|&c| c > 0), "every shard receives ids: {:?}", counts);

    // Adding a shard moves only a fraction of the ids.
    let grown = ShardRouter::new(strategy, 17).unwrap();
    let moved = (0..16_000u64)
        .filter(|&id| router.shard_for(id) != grown.shard_for(id))
        .count();
    assert!(moved < 16_000 / 4, "{} of 16000 ids moved", moved);
}

#[test]
fn test_reads_route_to_owning_shard() {
    let shards = populated(1_000);
    for id in (0..1_000).step_by(7) {
        assert_eq!(shards.read(id).get(&id).unwrap(), &format!("entity-{}", id));
    }
    let mut total = 0;
    shards.for_each_shard(|shard| total += shard.len());
    assert_eq!(total, 1_000);
}

#[test]
fn test_concurrent_readers_do_not_block_each_other() {
    let shards = Arc::new(populated(10_000));
    let reads = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let shards = Arc::clone(&shards);
            let reads = Arc::clone(&reads);
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    let id = (i * 31 + t) % 10_000;
                    assert!(shards.read(id).contains_key(&id));
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(reads.load(Ordering::Relaxed), 80_000);
}

#[test]
fn test_readers_proceed_while_write_lock_is_held() {
    let shards = Arc::new(populated(512));
    let barrier = Arc::new(Barrier::new(2));
    let writer_done = Arc::new(AtomicBool::new(false));

    let writer = {
        let shards = Arc::clone(&shards);
        let barrier = Arc::clone(&barrier);
        let writer_done = Arc::clone(&writer_done);
        thread::spawn(move || {
            let _guard = shards.lock_writes();
            barrier.wait();
            thread::sleep(Duration::from_millis(200));
            shards.write(1).insert(1, "updated".to_string());
            writer_done.store(true, Ordering::Release);
        })
    };

    barrier.wait();
    let start = Instant::now();
    for id in 0..512 {
        assert!(shards.read(id).contains_key(&id));
    }
    assert!(
        start.elapsed() < Duration::from_millis(150) || writer_done.load(Ordering::Acquire),
        "readers waited on the coarse write lock"
    );
    writer.join().unwrap();
    assert_eq!(shards.read(1).get(&1).unwrap(), "updated");
}

#[test]
fn test_write_lock_serializes_writers() {
    let shards = Arc::new(Shards::new(16, ShardingStrategy::Modulo).unwrap());

    let held = shards.lock_writes();
    assert!(shards.try_lock_writes(Duration::from_millis(20)).is_none());
    drop(held);
    assert!(shards.try_lock_writes(Duration::from_millis(20)).is_some());

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let shards = Arc::clone(&shards);
            thread::spawn(move || {
                for i in 0..500u64 {
                    let _guard = shards.lock_writes();
                    // Read-modify-write of a shared counter key.
                    let next = shards
                        .read(0)
                        .get(&0)
                        .map_or(0, |v| v.parse::<u64>().unwrap())
                        + 1;
                    shards.write(0).insert(0, next.to_string());
                    shards.write(t * 1_000 + i + 1).insert(t * 1_000 + i + 1, String::new());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(shards.read(0).get(&0).unwrap(), "2000");
}
