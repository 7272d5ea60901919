//! Point-in-time JSON snapshots of the whole graph.
//!
//! A snapshot named `snapshot-{lsn:020}.json` holds every node, edge and
//! property index definition as of WAL position `lsn`, plus the IDs of
//! entities deleted before it. Files are written to a
//! temporary name, fsynced and renamed, so a crash never leaves a truncated
//! snapshot under a final name. Once a snapshot is durable the WAL segments it
//! covers are deleted.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cluso_core::{
    error::{Error, Result},
    types::{Edge, EdgeId, Node, NodeId},
    utils::now_secs,
    FORMAT_VERSION,
};

use crate::manifest::sync_dir;

use super::index::PropertyIndexDef;
use super::storage::GraphInner;

const SNAPSHOT_PREFIX: &str = "snapshot-";
const SNAPSHOT_SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub format_version: u32,
    /// Every WAL entry up to and including this LSN is reflected here.
    pub lsn: u64,
    pub created_at: i64,
    pub next_node_id: NodeId,
    pub next_edge_id: EdgeId,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub property_indexes: Vec<PropertyIndexDef>,
    #[serde(default)]
    pub deleted_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub deleted_edge_ids: Vec<EdgeId>,
}

/// Outcome of a completed snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    pub lsn: u64,
    pub path: PathBuf,
    pub node_count: usize,
    pub edge_count: usize,
}

pub fn snapshot_path(dir: &Path, lsn: u64) -> PathBuf {
    dir.join(format!("{}{:020}{}", SNAPSHOT_PREFIX, lsn, SNAPSHOT_SUFFIX))
}

fn parse_snapshot_name(name: &str) -> Option<u64> {
    name.strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?
        .parse()
        .ok()
}

/// Complete snapshots in `dir`, oldest first.
pub fn list_snapshots(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut snapshots = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(lsn) = name.to_str().and_then(parse_snapshot_name) {
            snapshots.push((lsn, entry.path()));
        }
    }
    snapshots.sort();
    Ok(snapshots)
}

pub fn write_snapshot(dir: &Path, data: &SnapshotData) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::io(format!("Failed to create snapshot directory {:?}", dir), e))?;

    let path = snapshot_path(dir, data.lsn);
    let mut tmp = path.clone().into_os_string();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    let file =
        File::create(&tmp).map_err(|e| Error::io(format!("Failed to create {:?}", tmp), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, data)?;
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| Error::io(format!("Failed to write {:?}", tmp), e.into_error()))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, &path)
        .map_err(|e| Error::io(format!("Failed to install snapshot {:?}", path), e))?;
    sync_dir(dir)?;
    Ok(path)
}

pub fn read_snapshot(path: &Path) -> Result<SnapshotData> {
    let file = File::open(path).map_err(|e| Error::io(format!("Failed to open {:?}", path), e))?;
    let data: SnapshotData = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::corruption(format!("snapshot {:?}", path), e.to_string()))?;
    if data.format_version != FORMAT_VERSION {
        return Err(Error::corruption(
            format!("snapshot {:?}", path),
            format!(
                "format version {} is not supported (expected {})",
                data.format_version, FORMAT_VERSION
            ),
        ));
    }
    Ok(data)
}

/// Delete all but the newest `keep` snapshots. Returns how many were deleted.
pub fn prune_snapshots(dir: &Path, keep: usize) -> Result<usize> {
    let snapshots = list_snapshots(dir)?;
    let excess = snapshots.len().saturating_sub(keep.max(1));
    for (_, path) in &snapshots[..excess] {
        fs::remove_file(path)
            .map_err(|e| Error::io(format!("Failed to delete snapshot {:?}", path), e))?;
    }
    Ok(excess)
}

fn remove_partial_snapshots(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(TMP_SUFFIX));
        if is_partial {
            warn!("Removing partial snapshot {:?}", path);
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

impl GraphInner {
    /// Capture the graph, write it out, then drop the WAL segments it covers.
    pub(super) fn take_snapshot(&self) -> Result<SnapshotInfo> {
        let _serial = self.snapshot_lock.lock();
        let dir = self.config.snapshot_dir();

        let data = {
            let _guard = self.shards.lock_writes();
            let mut nodes = Vec::new();
            let mut edges = Vec::new();
            let mut deleted_node_ids = Vec::new();
            let mut deleted_edge_ids = Vec::new();
            self.shards.for_each_shard(|shard| {
                nodes.extend(shard.nodes.values().cloned());
                edges.extend(shard.edges.values().cloned());
                deleted_node_ids.extend(shard.deleted_nodes.iter().copied());
                deleted_edge_ids.extend(shard.deleted_edges.iter().copied());
            });
            nodes.sort_by_key(|node| node.id);
            edges.sort_by_key(|edge| edge.id);
            deleted_node_ids.sort_unstable();
            deleted_edge_ids.sort_unstable();

            // Adjacency written so far must be on disk before the WAL behind it goes.
            self.adjacency.flush()?;

            SnapshotData {
                format_version: FORMAT_VERSION,
                lsn: self.wal.last_lsn(),
                created_at: now_secs(),
                next_node_id: self.next_node_id.load(Ordering::Acquire),
                next_edge_id: self.next_edge_id.load(Ordering::Acquire),
                nodes,
                edges,
                property_indexes: self.indexes.read().property_index_defs(),
                deleted_node_ids,
                deleted_edge_ids,
            }
        };

        let path = write_snapshot(&dir, &data)?;
        self.last_snapshot_lsn.store(data.lsn, Ordering::Release);
        self.metrics.record_snapshot();

        let pruned = prune_snapshots(&dir, self.config.snapshots_to_keep)?;
        self.wal.rotate()?;
        let truncated = self.wal.truncate(data.lsn)?;

        info!(
            "Snapshot at LSN {}: {} node(s), {} edge(s); {} old snapshot(s) and {} WAL segment(s) removed",
            data.lsn,
            data.nodes.len(),
            data.edges.len(),
            pruned,
            truncated
        );
        Ok(SnapshotInfo {
            lsn: data.lsn,
            path,
            node_count: data.nodes.len(),
            edge_count: data.edges.len(),
        })
    }

    /// Install the newest snapshot, if any. Returns its LSN, or 0.
    pub(super) fn load_latest_snapshot(&self) -> Result<u64> {
        let dir = self.config.snapshot_dir();
        remove_partial_snapshots(&dir)?;

        let Some((_, path)) = list_snapshots(&dir)?.pop() else {
            debug!("No snapshot in {:?}; starting from the WAL alone", dir);
            return Ok(0);
        };
        let data = read_snapshot(&path)?;
        let lsn = data.lsn;
        self.install_snapshot(data)?;
        self.last_snapshot_lsn.store(lsn, Ordering::Release);

        info!(
            "Loaded snapshot {:?}: {} node(s), {} edge(s)",
            path,
            self.node_count.load(Ordering::Relaxed),
            self.edge_count.load(Ordering::Relaxed)
        );
        Ok(lsn)
    }

    /// Load snapshot contents into empty state. Adjacency is left alone.
    fn install_snapshot(&self, data: SnapshotData) -> Result<()> {
        let mut next_node_id = data.next_node_id.max(1);
        let mut next_edge_id = data.next_edge_id.max(1);
        let node_count = data.nodes.len() as u64;
        let edge_count = data.edges.len() as u64;

        {
            let mut indexes = self.indexes.write();
            indexes.clear();
            for node in &data.nodes {
                indexes.insert_node(node);
            }
            for edge in &data.edges {
                indexes.insert_edge(edge);
            }
        }
        for node in data.nodes {
            next_node_id = next_node_id.max(node.id + 1);
            self.shards.write(node.id).nodes.insert(node.id, node);
        }
        for edge in data.edges {
            next_edge_id = next_edge_id.max(edge.id + 1);
            self.shards.write(edge.id).edges.insert(edge.id, edge);
        }
        for id in data.deleted_node_ids {
            next_node_id = next_node_id.max(id + 1);
            self.shards.write(id).deleted_nodes.insert(id);
        }
        for id in data.deleted_edge_ids {
            next_edge_id = next_edge_id.max(id + 1);
            self.shards.write(id).deleted_edges.insert(id);
        }
        for def in &data.property_indexes {
            self.apply_create_index(&def.property, def.value_type)?;
        }

        self.next_node_id.store(next_node_id, Ordering::Release);
        self.next_edge_id.store(next_edge_id, Ordering::Release);
        self.node_count.store(node_count, Ordering::Relaxed);
        self.edge_count.store(edge_count, Ordering::Relaxed);
        Ok(())
    }
}
