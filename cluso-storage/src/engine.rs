//! LSM Engine
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LSM Engine                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  Write Path:                                                │
//! │  ┌─────────┐    ┌─────────┐    ┌──────────┐                 │
//! │  │ Put/Del │───>│   WAL   │───>│ MemTable │                 │
//! │  └─────────┘    │(optional)    └────┬─────┘                 │
//! │                 └─────────┘         │ Flush                 │
//! │                                     ▼                       │
//! │                          ┌─────────────────────┐            │
//! │                          │ L0 SSTables         │            │
//! │                          └──────────┬──────────┘            │
//! │                                     │ Compaction            │
//! │                                     ▼                       │
//! │                          ┌─────────────────────┐            │
//! │                          │ L1..Ln sorted runs  │            │
//! │                          └─────────────────────┘            │
//! │                                                             │
//! │  Read Path:                                                 │
//! │  ┌─────────┐    ┌──────────┐    ┌────────┐    ┌─────────┐   │
//! │  │   Get   │───>│ MemTables│───>│   L0   │───>│ L1..Ln  │   │
//! │  └─────────┘    │newest 1st│    │newest 1st   │1 per lvl│   │
//! │                 └──────────┘    └────────┘    └─────────┘   │
//! │                                                             │
//! │  Recovery Path:                                             │
//! │  ┌──────────┐    ┌─────────────┐    ┌──────────┐            │
//! │  │ Manifest │───>│ WAL Replay  │───>│ MemTable │            │
//! │  │checkpoint│    │ from seq N+1│    │ rebuilt  │            │
//! │  └──────────┘    └─────────────┘    └──────────┘            │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//!
//! Every write carries a sequence number. With the engine WAL enabled the
//! sequence is the WAL LSN; without it a counter continues from the highest
//! sequence the manifest has seen. Readers resolve each key to the record with
//! the highest sequence, so memtables and tables may hold stale versions freely.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use cluso_core::{
    config::DatabaseConfig,
    error::{Error, Result},
    metrics::Metrics,
    traits::KeyValueStore,
};

use crate::{
    cache::{BlockCache, CacheStats},
    compaction::{
        full_compaction, pick_compaction, remove_orphans, tmp_path, CompactionConfig,
        CompactionTask, Compactor,
    },
    fd::{FdConfig, FdStats, SSTablePool},
    manifest::{sync_dir, table_path, Manifest, TableMeta},
    memtable::{MemTable, MemTableConfig, MemTableManager, MemTableManagerStats},
    merge::{vec_source, MergeIterator, RecordSource},
    record::Record,
    sstable::{SSTableConfig, SSTableWriter},
    wal::{OpType, WalConfig, WriteAheadLog},
    workers::{Ticker, WorkerPool},
};

const WAL_SUBDIR: &str = "wal";

/// Attempts at a lookup whose table version was swapped out underneath it.
const VERSION_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct LsmConfig {
    pub dir: PathBuf,
    /// Log every put and delete before applying it. Disable when an outer layer
    /// owns durability.
    pub wal_enabled: bool,
    pub wal: WalConfig,
    pub memtable: MemTableConfig,
    pub sstable: SSTableConfig,
    pub compaction: CompactionConfig,
    pub fd: FdConfig,
    pub block_cache_blocks: usize,
    pub block_cache_shards: usize,
    pub compaction_workers: usize,
    /// Run flushes and compactions on background threads. Without them flushes
    /// run on the writing thread and compaction only happens through
    /// [`LsmEngine::compact`] and [`LsmEngine::compact_all`].
    pub background_work: bool,
    pub flush_interval: Duration,
    pub compaction_interval: Duration,
}

impl LsmConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            wal_enabled: true,
            wal: WalConfig::default(),
            memtable: MemTableConfig::default(),
            sstable: SSTableConfig::default(),
            compaction: CompactionConfig::default(),
            fd: FdConfig::default(),
            block_cache_blocks: 4096,
            block_cache_shards: 1,
            compaction_workers: 2,
            background_work: true,
            flush_interval: Duration::from_secs(1),
            compaction_interval: Duration::from_secs(5),
        }
    }

    pub fn from_database_config(config: &DatabaseConfig) -> Self {
        let mut lsm = Self::new(config.lsm_dir());
        lsm.wal.max_file_size = config.wal_max_file_size_mb * 1024 * 1024;
        lsm.wal.sync_on_write = config.sync_writes;
        lsm.memtable.max_size = config.memtable_size_bytes();
        lsm.compaction.l0_trigger = config.l0_compaction_trigger;
        lsm.block_cache_blocks = config.block_cache_capacity();
        lsm.block_cache_shards = 8;
        lsm.compaction_workers = config.compaction_workers;
        lsm.flush_interval = Duration::from_millis(config.flush_interval_ms.max(1));
        lsm.compaction_interval = Duration::from_millis(config.compaction_interval_ms.max(1));
        lsm
    }
}

#[derive(Debug, Clone, Default)]
pub struct LevelStats {
    pub level: u32,
    pub tables: usize,
    pub bytes: u64,
    pub entries: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LsmStats {
    pub memtables: MemTableManagerStats,
    pub levels: Vec<LevelStats>,
    pub block_cache: CacheStats,
    pub readers: FdStats,
    pub flushed_sequence: u64,
    pub last_sequence: u64,
    pub manifest_version: u64,
}

impl LsmStats {
    pub fn table_count(&self) -> usize {
        self.levels.iter().map(|l| l.tables).sum()
    }

    pub fn total_entries(&self) -> u64 {
        self.levels.iter().map(|l| l.entries).sum()
    }
}

/// Immutable view of the live tables, swapped wholesale after every flush and
/// compaction.
#[derive(Debug)]
struct Version {
    /// Level 0 newest first; deeper levels sorted by key range.
    levels: Vec<Vec<TableMeta>>,
}

impl Version {
    fn from_manifest(manifest: &Manifest) -> Self {
        let mut levels = vec![Vec::new(); manifest.max_level() as usize + 1];
        for table in &manifest.tables {
            levels[table.level as usize].push(table.clone());
        }
        levels[0].sort_by(|a, b| b.id.cmp(&a.id));
        for level in levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.info.min_key.cmp(&b.info.min_key));
        }
        Self { levels }
    }

    /// Tables that may hold `key`, in the order they must be consulted.
    fn tables_for_key<'a>(&'a self, key: &'a [u8]) -> impl Iterator<Item = &'a TableMeta> + 'a {
        let level0 = self.levels[0].iter().filter(move |t| t.info.contains_key(key));
        let deeper = self.levels.iter().skip(1).filter_map(move |level| {
            let idx = level.partition_point(|t| t.info.max_key.as_slice() < key);
            level.get(idx).filter(|t| t.info.min_key.as_slice() <= key)
        });
        level0.chain(deeper)
    }

    fn tables_in_range<'a>(
        &'a self,
        start: &'a [u8],
        end: &'a [u8],
    ) -> impl Iterator<Item = &'a TableMeta> + 'a {
        self.levels
            .iter()
            .flatten()
            .filter(move |t| t.info.overlaps_range(start, end))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Flush,
    Compact,
}

struct EngineInner {
    config: LsmConfig,
    memtables: MemTableManager,
    manifest: Mutex<Manifest>,
    version: RwLock<Arc<Version>>,
    pool: SSTablePool,
    block_cache: Arc<BlockCache>,
    wal: Option<WriteAheadLog>,
    /// Serializes sequence assignment, memtable inserts and rotation.
    write_lock: Mutex<()>,
    flush_lock: Mutex<()>,
    last_sequence: AtomicU64,
    /// Tables held by a running compaction.
    busy: Mutex<HashSet<u64>>,
    busy_released: Condvar,
    scheduler: Mutex<Option<SyncSender<Job>>>,
    flush_pending: AtomicBool,
    compact_pending: AtomicBool,
    /// Set once `close` starts; rejects writes and cancels running compactions.
    closing: AtomicBool,
    metrics: Metrics,
}

/// Ordered key-value store built from a WAL, memtables and leveled SSTables.
pub struct LsmEngine {
    inner: Arc<EngineInner>,
    workers: Mutex<Option<WorkerPool<Job>>>,
    tickers: Mutex<Vec<Ticker>>,
}

impl LsmEngine {
    pub fn open(config: LsmConfig, metrics: Metrics) -> Result<Self> {
        fs::create_dir_all(&config.dir)
            .map_err(|e| Error::io(format!("Failed to create {:?}", config.dir), e))?;

        let mut manifest = Manifest::load_or_create(&config.dir)?;
        for table in &mut manifest.tables {
            table.info.path = table_path(&config.dir, table.id);
            if !table.info.path.exists() {
                return Err(Error::corruption(
                    "manifest",
                    format!("table {:?} is listed but missing", table.info.path),
                ));
            }
        }
        let removed = remove_orphans(&config.dir, &manifest)?;
        if removed > 0 {
            warn!("Removed {} leftover table file(s) from an interrupted run", removed);
        }

        let block_cache = Arc::new(BlockCache::with_shards(
            config.block_cache_blocks,
            config.block_cache_shards,
        ));
        let pool = SSTablePool::new(config.fd.clone(), Some(Arc::clone(&block_cache)));
        let memtables = MemTableManager::new(config.memtable.clone(), metrics.clone());

        let mut last_sequence = manifest
            .tables
            .iter()
            .map(|t| t.info.max_sequence)
            .fold(manifest.last_sequence, u64::max);

        let wal = if config.wal_enabled {
            let wal =
                WriteAheadLog::open(config.dir.join(WAL_SUBDIR), config.wal.clone(), metrics.clone())?;
            wal.ensure_next_lsn(last_sequence + 1);
            let replayed = replay_wal(&wal, &memtables, manifest.flushed_sequence + 1)?;
            metrics.record_wal_replayed(replayed);
            last_sequence = last_sequence.max(wal.last_lsn());
            info!(
                "Replayed {} WAL record(s) after checkpoint {}",
                replayed, manifest.flushed_sequence
            );
            Some(wal)
        } else {
            None
        };

        info!(
            "Opening LSM engine at {:?}: {} table(s), last sequence {}",
            config.dir,
            manifest.tables.len(),
            last_sequence
        );

        let version = Version::from_manifest(&manifest);
        let inner = Arc::new(EngineInner {
            memtables,
            manifest: Mutex::new(manifest),
            version: RwLock::new(Arc::new(version)),
            pool,
            block_cache,
            wal,
            write_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
            last_sequence: AtomicU64::new(last_sequence),
            busy: Mutex::new(HashSet::new()),
            busy_released: Condvar::new(),
            scheduler: Mutex::new(None),
            flush_pending: AtomicBool::new(false),
            compact_pending: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            metrics,
            config,
        });

        // Replay may have filled more than one memtable.
        if inner.memtables.immutable_count() > 0 {
            inner.flush_immutables()?;
        }

        let engine = Self {
            inner,
            workers: Mutex::new(None),
            tickers: Mutex::new(Vec::new()),
        };
        if engine.inner.config.background_work {
            engine.start_background()?;
        }
        Ok(engine)
    }

    fn start_background(&self) -> Result<()> {
        let threads = self.inner.config.compaction_workers + 1;
        let handler_inner = Arc::clone(&self.inner);
        let pool = WorkerPool::start("cluso-lsm", threads, threads * 2, move |job| {
            handler_inner.run_job(job)
        })?;
        *self.inner.scheduler.lock() = pool.sender();
        *self.workers.lock() = Some(pool);

        let flush_inner = Arc::clone(&self.inner);
        let flush_ticker = Ticker::start(
            "cluso-lsm-flush",
            self.inner.config.flush_interval,
            move || {
                if flush_inner.memtables.immutable_count() > 0 {
                    flush_inner.schedule(Job::Flush);
                }
            },
        )?;

        let compact_inner = Arc::clone(&self.inner);
        let compaction_ticker = Ticker::start(
            "cluso-lsm-compaction",
            self.inner.config.compaction_interval,
            move || {
                if compact_inner.needs_compaction() {
                    compact_inner.schedule(Job::Compact);
                }
            },
        )?;

        self.tickers.lock().extend([flush_ticker, compaction_ticker]);
        debug!("Started {} LSM worker thread(s)", threads);
        Ok(())
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.check_open()?;
        self.inner
            .write(Bytes::copy_from_slice(key), Some(Bytes::copy_from_slice(value)))
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.check_open()?;
        self.inner.write(Bytes::copy_from_slice(key), None)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.inner.check_open()?;
        Ok(self.inner.lookup(key)?.and_then(|record| record.value))
    }

    /// Live pairs with `start <= key < end`. An empty `end` scans to the last key.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        self.inner.check_open()?;
        self.inner.scan(start, end)
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        self.scan(prefix, &prefix_end(prefix))
    }

    /// Freeze the active memtable and write every waiting memtable to level 0.
    pub fn flush(&self) -> Result<()> {
        self.inner.check_open()?;
        self.inner.rotate_active();
        self.inner.flush_immutables()?;
        if let Some(wal) = &self.inner.wal {
            wal.sync()?;
        }
        Ok(())
    }

    /// Run one compaction if any level is over its budget. Returns whether one ran.
    pub fn compact(&self) -> Result<bool> {
        self.inner.check_open()?;
        self.inner.run_compaction(false)
    }

    /// Flush, then merge every table into a single bottom-level run.
    pub fn compact_all(&self) -> Result<()> {
        self.flush()?;
        self.inner.run_compaction(true)?;
        Ok(())
    }

    pub fn table_count(&self) -> usize {
        self.inner.version.read().levels.iter().map(Vec::len).sum()
    }

    pub fn last_sequence(&self) -> u64 {
        self.inner.last_sequence.load(Ordering::Acquire)
    }

    pub fn dir(&self) -> &Path {
        &self.inner.config.dir
    }

    pub fn stats(&self) -> LsmStats {
        let version = Arc::clone(&self.inner.version.read());
        let levels = version
            .levels
            .iter()
            .enumerate()
            .map(|(level, tables)| LevelStats {
                level: level as u32,
                tables: tables.len(),
                bytes: tables.iter().map(|t| t.info.file_size).sum(),
                entries: tables.iter().map(|t| t.info.entry_count).sum(),
            })
            .collect();
        let manifest = self.inner.manifest.lock();

        LsmStats {
            memtables: self.inner.memtables.stats(),
            levels,
            block_cache: self.inner.block_cache.stats(),
            readers: self.inner.pool.stats(),
            flushed_sequence: manifest.flushed_sequence,
            last_sequence: self.last_sequence(),
            manifest_version: manifest.version,
        }
    }

    /// Stop background work, flush memtables and sync the WAL. Later calls are no-ops.
    pub fn close(&self) -> Result<()> {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing LSM engine at {:?}", self.inner.config.dir);

        // Drop the shared sender first so the pool's channel can disconnect.
        self.inner.scheduler.lock().take();
        for mut ticker in self.tickers.lock().drain(..) {
            ticker.stop();
        }
        if let Some(mut pool) = self.workers.lock().take() {
            pool.shutdown();
        }

        self.inner.rotate_active();
        self.inner.flush_immutables()?;
        if let Some(wal) = &self.inner.wal {
            wal.sync()?;
        }
        Ok(())
    }
}

impl Drop for LsmEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close LSM engine cleanly: {}", e);
        }
    }
}

impl KeyValueStore for LsmEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        LsmEngine::put(self, key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        LsmEngine::get(self, key)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        LsmEngine::delete(self, key)
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        LsmEngine::scan(self, start, end)
    }

    fn flush(&self) -> Result<()> {
        LsmEngine::flush(self)
    }
}

impl EngineInner {
    fn check_open(&self) -> Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn write(&self, key: Bytes, value: Option<Bytes>) -> Result<()> {
        let rotated = {
            let _guard = self.write_lock.lock();
            let sequence = match &self.wal {
                Some(wal) => wal.append(wal_op(&value), encode_wal_record(&key, value.as_ref()))?,
                None => self.last_sequence.load(Ordering::Acquire) + 1,
            };
            self.last_sequence.store(sequence, Ordering::Release);

            let record = match value {
                Some(value) => Record::put(sequence, value),
                None => Record::tombstone(sequence),
            };
            self.memtables.insert(key, record)?
        };

        if rotated && (self.memtables.needs_inline_flush() || !self.schedule(Job::Flush)) {
            self.flush_immutables()?;
        }
        Ok(())
    }

    fn rotate_active(&self) {
        let _guard = self.write_lock.lock();
        self.memtables.rotate();
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Record>> {
        // Memtables before the version, so a concurrent flush cannot hide a record.
        for table in self.memtables.tables() {
            if let Some(record) = table.get(key) {
                return Ok(Some(record));
            }
        }

        let mut attempt = 0;
        loop {
            let version = Arc::clone(&self.version.read());
            match self.lookup_tables(&version, key) {
                Err(e) if attempt < VERSION_RETRIES && self.version_changed(&version) => {
                    debug!("Retrying lookup after table set changed: {}", e);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn lookup_tables(&self, version: &Version, key: &[u8]) -> Result<Option<Record>> {
        for meta in version.tables_for_key(key) {
            let reader = self.pool.get(meta.id, &meta.info.path)?;
            let probe = reader.probe(key)?;
            if probe.bloom_rejected {
                self.metrics.record_bloom_negative();
                continue;
            }
            if probe.blocks_read > 0 {
                self.metrics.record_block_cache(probe.cache_hit);
            }
            if let Some(record) = probe.record {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn version_changed(&self, version: &Arc<Version>) -> bool {
        !Arc::ptr_eq(version, &self.version.read())
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let mut sources: Vec<RecordSource> = self
            .memtables
            .tables()
            .iter()
            .map(|table| vec_source(table.range(start, end)))
            .collect();

        let mut attempt = 0;
        let table_sources = loop {
            let version = Arc::clone(&self.version.read());
            match self.table_sources(&version, start, end) {
                Err(e) if attempt < VERSION_RETRIES && self.version_changed(&version) => {
                    debug!("Retrying scan after table set changed: {}", e);
                    attempt += 1;
                }
                other => break other?,
            }
        };
        sources.extend(table_sources);

        let mut results = Vec::new();
        for item in MergeIterator::new(sources) {
            let (key, record) = item?;
            if let Some(value) = record.value {
                results.push((key, value));
            }
        }
        Ok(results)
    }

    fn table_sources(&self, version: &Version, start: &[u8], end: &[u8]) -> Result<Vec<RecordSource>> {
        let mut sources: Vec<RecordSource> = Vec::new();
        for meta in version.tables_in_range(start, end) {
            let reader = self.pool.get(meta.id, &meta.info.path)?;
            let end = end.to_vec();
            sources.push(Box::new(reader.iter_from(start).take_while(move |item| {
                match item {
                    Ok((key, _)) => end.is_empty() || key.as_ref() < end.as_slice(),
                    Err(_) => true,
                }
            })));
        }
        Ok(sources)
    }

    /// Queue a background job. Returns false when no worker will pick it up.
    fn schedule(&self, job: Job) -> bool {
        let pending = match job {
            Job::Flush => &self.flush_pending,
            Job::Compact => &self.compact_pending,
        };
        let scheduler = self.scheduler.lock();
        let Some(sender) = scheduler.as_ref() else {
            return false;
        };
        if pending.swap(true, Ordering::AcqRel) {
            return true;
        }
        match sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                pending.store(false, Ordering::Release);
                false
            }
        }
    }

    fn run_job(&self, job: Job) {
        match job {
            Job::Flush => {
                self.flush_pending.store(false, Ordering::Release);
                if let Err(e) = self.flush_immutables() {
                    error!("Background flush failed: {}", e);
                }
            }
            Job::Compact => {
                self.compact_pending.store(false, Ordering::Release);
                match self.compact_with_retry() {
                    Ok(true) => {
                        if self.needs_compaction() {
                            self.schedule(Job::Compact);
                        }
                    }
                    Ok(false) => {}
                    Err(e) if self.closing.load(Ordering::Acquire) => {
                        debug!("Compaction stopped by shutdown: {}", e);
                    }
                    Err(e) => error!("Background compaction gave up: {}", e),
                }
            }
        }
    }

    /// Write every immutable memtable to level 0, oldest first.
    fn flush_immutables(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock();
        let mut flushed = 0;

        while let Some(table) = self.memtables.oldest_immutable() {
            if !table.is_empty() {
                self.write_level0(&table)?;
                flushed += 1;
            }
            self.memtables.remove_flushed(table.id());
        }

        if flushed > 0 {
            if let Some(wal) = &self.wal {
                let checkpoint = self.manifest.lock().flushed_sequence;
                let removed = wal.truncate(checkpoint)?;
                if removed > 0 {
                    debug!("Removed {} WAL segment(s) through sequence {}", removed, checkpoint);
                }
            }
            if self.needs_compaction() {
                self.schedule(Job::Compact);
            }
        }
        Ok(flushed)
    }

    fn write_level0(&self, table: &MemTable) -> Result<()> {
        let started = Instant::now();
        let dir = &self.config.dir;
        let id = self.manifest.lock().allocate_table_id();
        let tmp = tmp_path(dir, id);

        let mut writer = SSTableWriter::create(&tmp, self.config.sstable.clone())?;
        for (key, record) in table.iter() {
            if let Err(e) = writer.add(&key, &record) {
                writer.abandon()?;
                return Err(e);
            }
        }
        let mut info = writer.finish()?;

        let path = table_path(dir, id);
        fs::rename(&tmp, &path)
            .map_err(|e| Error::io(format!("Failed to publish table {:?}", path), e))?;
        sync_dir(dir)?;
        info.path = path.clone();
        let entries = info.entry_count;

        {
            let mut manifest = self.manifest.lock();
            manifest.add(TableMeta { id, level: 0, info });
            let previous_checkpoint = manifest.flushed_sequence;
            manifest.flushed_sequence = previous_checkpoint.max(table.max_sequence());
            manifest.last_sequence = manifest
                .last_sequence
                .max(self.last_sequence.load(Ordering::Acquire));
            if let Err(e) = manifest.save(dir) {
                manifest.remove(&[id]);
                manifest.flushed_sequence = previous_checkpoint;
                let _ = fs::remove_file(&path);
                return Err(e);
            }
            self.install_version(&manifest);
        }

        self.metrics.record_flush();
        info!(
            "Flushed memtable {} to table {} ({} entries) in {:?}",
            table.id(),
            id,
            entries,
            started.elapsed()
        );
        Ok(())
    }

    /// Caller holds the manifest lock.
    fn install_version(&self, manifest: &Manifest) {
        *self.version.write() = Arc::new(Version::from_manifest(manifest));
    }

    fn needs_compaction(&self) -> bool {
        let manifest = self.manifest.lock();
        let busy = self.busy.lock();
        pick_compaction(&manifest, &self.config.compaction, &busy).is_some()
    }

    fn compact_with_retry(&self) -> Result<bool> {
        let mut attempt = 0;
        loop {
            match self.run_compaction(false) {
                Ok(ran) => return Ok(ran),
                Err(e) if self.closing.load(Ordering::Acquire) => return Err(e),
                Err(e) => {
                    self.metrics.record_compaction_failure();
                    attempt += 1;
                    if attempt > self.config.compaction.max_retries {
                        return Err(e);
                    }
                    let delay = self.config.compaction.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Compaction failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt, self.config.compaction.max_retries, e, delay
                    );
                    self.sleep_unless_closing(delay);
                }
            }
        }
    }

    fn sleep_unless_closing(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.closing.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }

    /// Reserve inputs, merge them and swap the outputs into the manifest.
    fn run_compaction(&self, full: bool) -> Result<bool> {
        let task = loop {
            if full {
                // Wait without the manifest lock; running compactions need it to finish.
                let mut busy = self.busy.lock();
                while !busy.is_empty() {
                    self.busy_released.wait(&mut busy);
                }
            }

            let manifest = self.manifest.lock();
            let mut busy = self.busy.lock();
            if full && !busy.is_empty() {
                continue;
            }
            let task = if full {
                full_compaction(&manifest)
            } else {
                pick_compaction(&manifest, &self.config.compaction, &busy)
            };
            let Some(task) = task else {
                return Ok(false);
            };
            busy.extend(task.input_ids());
            break task;
        };

        let result = self.execute(&task);

        {
            let mut busy = self.busy.lock();
            for id in task.input_ids() {
                busy.remove(&id);
            }
        }
        self.busy_released.notify_all();

        result.map(|()| true)
    }

    fn execute(&self, task: &CompactionTask) -> Result<()> {
        let started = Instant::now();
        let dir = &self.config.dir;
        let compactor = Compactor {
            dir,
            sstable_config: &self.config.sstable,
            target_file_size: self.config.compaction.target_file_size,
            pool: &self.pool,
            cancel: &self.closing,
        };
        let outputs = compactor.run(task, || self.manifest.lock().allocate_table_id())?;

        let input_ids = task.input_ids();
        {
            let mut manifest = self.manifest.lock();
            manifest.remove(&input_ids);
            for output in &outputs {
                manifest.add(output.clone());
            }
            if let Err(e) = manifest.save(dir) {
                let output_ids: Vec<u64> = outputs.iter().map(|t| t.id).collect();
                manifest.remove(&output_ids);
                for input in &task.inputs {
                    manifest.add(input.clone());
                }
                for output in &outputs {
                    let _ = fs::remove_file(&output.info.path);
                }
                return Err(e);
            }
            self.install_version(&manifest);
        }

        for input in &task.inputs {
            self.pool.remove(input.id);
            if let Err(e) = fs::remove_file(&input.info.path) {
                warn!("Failed to delete compacted table {:?}: {}", input.info.path, e);
            }
        }

        self.metrics.record_compaction();
        info!(
            "Compacted {} table(s) into {} at level {} in {:?}",
            input_ids.len(),
            outputs.len(),
            task.output_level,
            started.elapsed()
        );
        Ok(())
    }
}

fn wal_op(value: &Option<Bytes>) -> OpType {
    if value.is_some() {
        OpType::Put
    } else {
        OpType::Delete
    }
}

/// Put: `[key_len u32][key][value]`. Delete: `[key]`.
fn encode_wal_record(key: &[u8], value: Option<&Bytes>) -> Bytes {
    match value {
        Some(value) => {
            let mut buf = BytesMut::with_capacity(4 + key.len() + value.len());
            buf.put_u32_le(key.len() as u32);
            buf.put_slice(key);
            buf.put_slice(value);
            buf.freeze()
        }
        None => Bytes::copy_from_slice(key),
    }
}

fn decode_put(lsn: u64, payload: &Bytes) -> Result<(Bytes, Bytes)> {
    let mut buf = payload.clone();
    if buf.remaining() < 4 {
        return Err(Error::corruption("engine WAL", format!("short put record at LSN {}", lsn)));
    }
    let key_len = buf.get_u32_le() as usize;
    if buf.remaining() < key_len {
        return Err(Error::corruption("engine WAL", format!("truncated key at LSN {}", lsn)));
    }
    let key = buf.split_to(key_len);
    Ok((key, buf))
}

fn replay_wal(wal: &WriteAheadLog, memtables: &MemTableManager, from_lsn: u64) -> Result<u64> {
    let mut replayed = 0;
    for entry in wal.replay(from_lsn)? {
        let entry = entry?;
        let (key, record) = match entry.op_type {
            OpType::Put => {
                let (key, value) = decode_put(entry.lsn, &entry.payload)?;
                (key, Record::put(entry.lsn, value))
            }
            OpType::Delete => (entry.payload.clone(), Record::tombstone(entry.lsn)),
            other => {
                return Err(Error::corruption(
                    "engine WAL",
                    format!("unexpected {:?} record at LSN {}", other, entry.lsn),
                ))
            }
        };
        memtables.insert(key, record)?;
        replayed += 1;
    }
    Ok(replayed)
}

/// Smallest key greater than every key starting with `prefix`. Empty when the
/// prefix is all `0xff` bytes, meaning unbounded.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    Vec::new()
}
