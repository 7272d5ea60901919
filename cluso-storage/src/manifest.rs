//! # Manifest - SSTable Metadata Management
//!
//! The manifest is the authoritative list of live tables. It is a JSON file
//! (`MANIFEST`) replaced atomically: written to `MANIFEST.tmp`, fsynced, then
//! renamed over the old copy. A table file not named in the manifest is garbage
//! left by an interrupted flush or compaction.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use cluso_core::error::{Error, Result};

use crate::sstable::SSTableInfo;

pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP: &str = "MANIFEST.tmp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub id: u64,
    pub level: u32,
    #[serde(flatten)]
    pub info: SSTableInfo,
}

impl TableMeta {
    pub fn file_name(&self) -> Option<&str> {
        self.info.path.file_name().and_then(|n| n.to_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Bumped on every save.
    pub version: u64,
    pub tables: Vec<TableMeta>,
    /// Every record with a sequence at or below this is in some table.
    pub flushed_sequence: u64,
    pub next_table_id: u64,
    /// Highest sequence ever assigned, so a reopened engine never reuses one.
    pub last_sequence: u64,
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            next_table_id: 1,
            ..Default::default()
        }
    }

    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }

        let data = fs::read(&path)
            .map_err(|e| Error::io(format!("Failed to read manifest {:?}", path), e))?;
        let manifest: Manifest = serde_json::from_slice(&data).map_err(|e| {
            Error::corruption(format!("manifest {:?}", path), e.to_string())
        })?;

        info!(
            "Loaded manifest v{}: {} table(s), flushed through sequence {}",
            manifest.version,
            manifest.tables.len(),
            manifest.flushed_sequence
        );
        Ok(manifest)
    }

    /// Atomically replace the on-disk manifest.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        self.version += 1;
        let tmp = dir.join(MANIFEST_TMP);
        let data = serde_json::to_vec_pretty(self)?;

        let mut file = File::create(&tmp)
            .map_err(|e| Error::io(format!("Failed to create {:?}", tmp), e))?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        sync_dir(dir)?;
        Ok(())
    }

    pub fn allocate_table_id(&mut self) -> u64 {
        let id = self.next_table_id.max(1);
        self.next_table_id = id + 1;
        id
    }

    pub fn add(&mut self, table: TableMeta) {
        self.tables.push(table);
    }

    pub fn remove(&mut self, ids: &[u64]) {
        self.tables.retain(|t| !ids.contains(&t.id));
    }

    pub fn level(&self, level: u32) -> impl Iterator<Item = &TableMeta> {
        self.tables.iter().filter(move |t| t.level == level)
    }

    pub fn max_level(&self) -> u32 {
        self.tables.iter().map(|t| t.level).max().unwrap_or(0)
    }
}

/// Table file name for `id`.
pub fn table_file_name(id: u64) -> String {
    format!("{:010}.sst", id)
}

pub fn table_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(table_file_name(id))
}

/// fsync a directory so a rename inside it is durable.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
