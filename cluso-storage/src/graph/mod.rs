//! # Graph Storage Layer
//!
//! Nodes, edges and their indexes on top of the WAL, the shard lock manager
//! and an adjacency store.
//!
//! ## Write path
//!
//! 1. Take the write lock (one for the whole graph).
//! 2. Validate the [`Mutation`] against current state; a batch is validated
//!    in full before anything else happens.
//! 3. Append it to the WAL (skipped during bulk import). A batch is one record.
//! 4. Apply it to the shard maps, the indexes and the adjacency store.
//!
//! With `wal_group_commit`, step 3 writes the record without syncing it. The
//! commit releases the write lock and then waits for an fsync it may share
//! with other commits.
//!
//! ## Recovery
//!
//! `Startup → LoadLatestSnapshot → ReplayWAL(from = snapshot_lsn + 1) → Ready`.
//! Applying a mutation whose effect is already present is a no-op, so entries
//! overlapping the snapshot cannot duplicate anything.

mod apply;
mod batch;
mod index;
mod mutation;
mod replay;
mod snapshot;
mod storage;
mod temporal;
mod validate;

pub use batch::Batch;
pub use index::{encode_index_key, IndexStatistics, PropertyIndex, PropertyIndexDef};
pub use mutation::Mutation;
pub use snapshot::{list_snapshots, read_snapshot, snapshot_path, SnapshotData, SnapshotInfo};
pub use storage::GraphStorage;
pub use temporal::{TemporalEdge, VALID_FROM, VALID_TO};
