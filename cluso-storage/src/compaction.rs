//! # Compaction
//!
//! Leveled compaction. Level 0 holds freshly flushed tables whose key ranges may
//! overlap; every deeper level is a sorted run of non-overlapping tables, each
//! level allowed `level_multiplier` times the bytes of the one above.
//!
//! A compaction merges its input tables, keeps the highest-sequence record per
//! key and writes the result as new tables of the output level. Outputs are
//! written as `*.sst.tmp`, fsynced and renamed only after the whole merge
//! succeeded; inputs are untouched until the caller swaps the manifest. A failed
//! or cancelled compaction removes its partial outputs and changes nothing else.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use cluso_core::{
    error::{Error, Result},
    utils::format_bytes,
};

use crate::fd::SSTablePool;
use crate::manifest::{sync_dir, table_path, Manifest, TableMeta};
use crate::merge::{MergeIterator, RecordSource};
use crate::sstable::{SSTableConfig, SSTableWriter};

/// Suffix of a table that is still being written.
pub const TMP_SUFFIX: &str = "sst.tmp";

#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Level-0 table count that triggers an L0 -> L1 compaction.
    pub l0_trigger: usize,
    /// Byte budget of level 1.
    pub level_base_bytes: u64,
    pub level_multiplier: u64,
    pub max_levels: u32,
    /// Outputs are split once they reach this size.
    pub target_file_size: u64,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            l0_trigger: 4,
            level_base_bytes: 256 * 1024 * 1024, // 256MB
            level_multiplier: 10,
            max_levels: 7,
            target_file_size: 64 * 1024 * 1024, // 64MB
            max_retries: 5,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

impl CompactionConfig {
    pub fn level_budget(&self, level: u32) -> u64 {
        let exp = level.saturating_sub(1);
        self.level_base_bytes
            .saturating_mul(self.level_multiplier.saturating_pow(exp))
    }
}

#[derive(Debug, Clone)]
pub struct CompactionTask {
    pub inputs: Vec<TableMeta>,
    pub output_level: u32,
    /// Safe only when no deeper level may hold an older version of an output key.
    pub drop_tombstones: bool,
}

impl CompactionTask {
    pub fn input_ids(&self) -> Vec<u64> {
        self.inputs.iter().map(|t| t.id).collect()
    }

    pub fn input_bytes(&self) -> u64 {
        self.inputs.iter().map(|t| t.info.file_size).sum()
    }
}

/// Choose the next compaction, skipping tables another compaction holds.
pub fn pick_compaction(
    manifest: &Manifest,
    config: &CompactionConfig,
    busy: &HashSet<u64>,
) -> Option<CompactionTask> {
    let level0: Vec<&TableMeta> = manifest.level(0).collect();
    if level0.len() >= config.l0_trigger && level0.iter().all(|t| !busy.contains(&t.id)) {
        if let Some(task) = with_overlaps(manifest, level0, 1, busy) {
            return Some(task);
        }
    }

    for level in 1..config.max_levels.saturating_sub(1) {
        let tables: Vec<&TableMeta> = manifest.level(level).collect();
        let bytes: u64 = tables.iter().map(|t| t.info.file_size).sum();
        if bytes <= config.level_budget(level) {
            continue;
        }

        // Oldest table first so every part of the key space gets its turn.
        let mut candidates: Vec<&TableMeta> =
            tables.into_iter().filter(|t| !busy.contains(&t.id)).collect();
        candidates.sort_by_key(|t| t.id);
        for candidate in candidates {
            if let Some(task) = with_overlaps(manifest, vec![candidate], level + 1, busy) {
                return Some(task);
            }
        }
    }
    None
}

/// Every table in the manifest merged into one bottom-level run.
pub fn full_compaction(manifest: &Manifest) -> Option<CompactionTask> {
    if manifest.tables.is_empty() {
        return None;
    }
    Some(CompactionTask {
        inputs: manifest.tables.clone(),
        output_level: manifest.max_level().max(1),
        drop_tombstones: true,
    })
}

fn with_overlaps(
    manifest: &Manifest,
    upper: Vec<&TableMeta>,
    output_level: u32,
    busy: &HashSet<u64>,
) -> Option<CompactionTask> {
    let (min_key, max_key) = key_range(upper.iter().copied())?;

    let lower: Vec<&TableMeta> = manifest
        .level(output_level)
        .filter(|t| overlaps(t, &min_key, &max_key))
        .collect();
    if lower.iter().any(|t| busy.contains(&t.id)) {
        return None;
    }

    let inputs: Vec<TableMeta> = upper.into_iter().chain(lower).cloned().collect();
    let (min_key, max_key) = key_range(inputs.iter())?;
    let deeper_overlap = manifest
        .tables
        .iter()
        .any(|t| t.level > output_level && overlaps(t, &min_key, &max_key));

    Some(CompactionTask {
        inputs,
        output_level,
        drop_tombstones: !deeper_overlap,
    })
}

fn key_range<'a>(tables: impl Iterator<Item = &'a TableMeta>) -> Option<(Vec<u8>, Vec<u8>)> {
    tables.fold(None, |range, t| match range {
        None => Some((t.info.min_key.clone(), t.info.max_key.clone())),
        Some((lo, hi)) => Some((
            lo.min(t.info.min_key.clone()),
            hi.max(t.info.max_key.clone()),
        )),
    })
}

fn overlaps(table: &TableMeta, min_key: &[u8], max_key: &[u8]) -> bool {
    table.info.min_key.as_slice() <= max_key && table.info.max_key.as_slice() >= min_key
}

/// Runs one compaction task, producing renamed, durable output tables.
pub struct Compactor<'a> {
    pub dir: &'a Path,
    pub sstable_config: &'a SSTableConfig,
    pub target_file_size: u64,
    pub pool: &'a SSTablePool,
    /// Checked between entries; set to abandon the merge during shutdown.
    pub cancel: &'a AtomicBool,
}

impl Compactor<'_> {
    /// Merge the task inputs. `allocate_id` hands out table ids for the outputs.
    pub fn run(
        &self,
        task: &CompactionTask,
        mut allocate_id: impl FnMut() -> u64,
    ) -> Result<Vec<TableMeta>> {
        info!(
            "Compacting {} table(s) ({}) into level {}",
            task.inputs.len(),
            format_bytes(task.input_bytes()),
            task.output_level
        );

        let mut finished: Vec<(u64, PathBuf)> = Vec::new();
        let result = self.merge_into(task, &mut allocate_id, &mut finished);

        match result {
            Ok(outputs) => Ok(outputs),
            Err(e) => {
                for (_, tmp) in &finished {
                    let _ = std::fs::remove_file(tmp);
                    let _ = std::fs::remove_file(tmp.with_extension(""));
                }
                Err(e)
            }
        }
    }

    fn merge_into(
        &self,
        task: &CompactionTask,
        allocate_id: &mut impl FnMut() -> u64,
        finished: &mut Vec<(u64, PathBuf)>,
    ) -> Result<Vec<TableMeta>> {
        let mut sources: Vec<RecordSource> = Vec::with_capacity(task.inputs.len());
        for table in &task.inputs {
            let reader = self.pool.get(table.id, &table.info.path)?;
            sources.push(Box::new(reader.iter().without_cache_fill()));
        }

        let mut infos = Vec::new();
        let mut writer: Option<(u64, SSTableWriter)> = None;
        let mut dropped = 0u64;

        for (n, item) in MergeIterator::new(sources).enumerate() {
            if n % 1024 == 0 && self.cancel.load(Ordering::Acquire) {
                if let Some((_, w)) = writer.take() {
                    w.abandon()?;
                }
                return Err(Error::Compaction {
                    reason: "cancelled by shutdown".to_string(),
                });
            }

            let (key, record) = match item {
                Ok(entry) => entry,
                Err(e) => {
                    if let Some((_, w)) = writer.take() {
                        w.abandon()?;
                    }
                    return Err(e);
                }
            };

            if task.drop_tombstones && record.is_tombstone() {
                dropped += 1;
                continue;
            }

            if writer.is_none() {
                let id = allocate_id();
                let path = tmp_path(self.dir, id);
                writer = Some((id, SSTableWriter::create(&path, self.sstable_config.clone())?));
            }

            if let Some((_, w)) = writer.as_mut() {
                if let Err(e) = w.add(&key, &record) {
                    if let Some((_, w)) = writer.take() {
                        w.abandon()?;
                    }
                    return Err(e);
                }
                if w.estimated_size() >= self.target_file_size {
                    if let Some((id, w)) = writer.take() {
                        let path = w.path().to_path_buf();
                        infos.push((id, w.finish()?));
                        finished.push((id, path));
                    }
                }
            }
        }

        if let Some((id, w)) = writer.take() {
            let path = w.path().to_path_buf();
            infos.push((id, w.finish()?));
            finished.push((id, path));
        }

        // Every output is complete and synced; publish them under their final names.
        let mut outputs = Vec::with_capacity(infos.len());
        for (id, mut info) in infos {
            let final_path = table_path(self.dir, id);
            std::fs::rename(&info.path, &final_path)?;
            info.path = final_path;
            outputs.push(TableMeta {
                id,
                level: task.output_level,
                info,
            });
        }
        sync_dir(self.dir)?;

        debug!(
            "Compaction wrote {} table(s), dropped {} tombstone(s)",
            outputs.len(),
            dropped
        );
        Ok(outputs)
    }
}

pub fn tmp_path(dir: &Path, id: u64) -> PathBuf {
    table_path(dir, id).with_extension(TMP_SUFFIX)
}

/// Delete leftovers of interrupted flushes and compactions: temp files and
/// tables the manifest does not reference. Returns how many files were removed.
pub fn remove_orphans(dir: &Path, manifest: &Manifest) -> Result<usize> {
    let live: HashSet<PathBuf> = manifest.tables.iter().map(|t| t.info.path.clone()).collect();
    let live_names: HashSet<String> = manifest
        .tables
        .iter()
        .filter_map(|t| t.file_name().map(str::to_string))
        .collect();

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_tmp = name.ends_with(".sst.tmp");
        let is_orphan =
            name.ends_with(".sst") && !live.contains(&path) && !live_names.contains(name);
        if is_tmp || is_orphan {
            info!("Removing leftover table file {:?}", path);
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::SSTableInfo;

    fn meta(id: u64, level: u32, min: &str, max: &str, size: u64) -> TableMeta {
        TableMeta {
            id,
            level,
            info: SSTableInfo {
                path: PathBuf::from(format!("{}.sst", id)),
                file_size: size,
                entry_count: 1,
                min_key: min.as_bytes().to_vec(),
                max_key: max.as_bytes().to_vec(),
                min_sequence: id,
                max_sequence: id,
                creation_time: 0,
            },
        }
    }

    fn manifest(tables: Vec<TableMeta>) -> Manifest {
        Manifest {
            tables,
            next_table_id: 100,
            ..Manifest::new()
        }
    }

    #[test]
    fn test_l0_trigger_pulls_overlapping_l1() {
        let m = manifest(vec![
            meta(1, 0, "b", "d", 10),
            meta(2, 0, "c", "f", 10),
            meta(3, 1, "a", "c", 10),
            meta(4, 1, "x", "z", 10),
        ]);
        let config = CompactionConfig {
            l0_trigger: 2,
            ..Default::default()
        };
        let task = pick_compaction(&m, &config, &HashSet::new()).unwrap();
        let mut ids = task.input_ids();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(task.output_level, 1);
        assert!(task.drop_tombstones);
    }

    #[test]
    fn test_tombstones_kept_when_deeper_level_overlaps() {
        let m = manifest(vec![
            meta(1, 0, "a", "m", 10),
            meta(2, 0, "b", "c", 10),
            meta(3, 2, "k", "p", 10),
        ]);
        let config = CompactionConfig {
            l0_trigger: 2,
            ..Default::default()
        };
        let task = pick_compaction(&m, &config, &HashSet::new()).unwrap();
        assert!(!task.drop_tombstones);
    }

    #[test]
    fn test_busy_tables_are_not_shared() {
        let m = manifest(vec![meta(1, 0, "a", "b", 10), meta(2, 0, "c", "d", 10)]);
        let config = CompactionConfig {
            l0_trigger: 2,
            ..Default::default()
        };
        let busy: HashSet<u64> = [2].into_iter().collect();
        assert!(pick_compaction(&m, &config, &busy).is_none());
    }

    #[test]
    fn test_oversized_level_compacts_downward() {
        let m = manifest(vec![
            meta(5, 1, "a", "f", 600),
            meta(6, 1, "g", "m", 600),
            meta(7, 2, "e", "h", 100),
        ]);
        let config = CompactionConfig {
            level_base_bytes: 1000,
            ..Default::default()
        };
        let task = pick_compaction(&m, &config, &HashSet::new()).unwrap();
        assert_eq!(task.output_level, 2);
        let mut ids = task.input_ids();
        ids.sort();
        assert_eq!(ids, vec![5, 7]);
    }
}
