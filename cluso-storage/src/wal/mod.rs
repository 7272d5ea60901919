//! Write-Ahead Log (WAL): append-only, checksummed, segmented.
//!
//! Every acknowledged mutation is in the log before the caller sees success.
//! Appends are serialized by one mutex; `sync_on_write` makes each append
//! (or each batch) cost exactly one fsync. Under group commit, writers use
//! `append_deferred` and then `sync_through`, and concurrent writers share one fsync.
//!
//! A segment created with `compression` on stores snappy-compressed payloads and
//! says so in its header flags; the entry framing is the same either way.
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WAL Segment Layout                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Header (32 bytes)                                          │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │ Magic Number (8 bytes): "CLUSOWAL"                  │    │
//! │  │ Version (4 bytes)                                   │    │
//! │  │ Creation Time (8 bytes)                             │    │
//! │  │ First LSN (8 bytes)                                 │    │
//! │  │ Flags (4 bytes): bit 0 = snappy payloads            │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Entry 1..N                                                 │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │ LSN (8) | OpType (1) | PayloadLen (4)               │    │
//! │  │ Payload (PayloadLen bytes)                          │    │
//! │  │ CRC32 over OpType+Payload (4) | Timestamp ms (8)    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!
//! Segments are named `{first_lsn:020}.wal`; every LSN in a segment is below the
//! first LSN of the next one, which is what `truncate` and `replay` rely on.

mod file;
mod iterator;
mod types;

pub use iterator::WalEntryIterator;
pub use types::{
    entry_checksum, OpType, WalConfig, WalEntry, WalStats, ENTRY_PREFIX_SIZE, ENTRY_SUFFIX_SIZE,
    SEGMENT_FLAG_SNAPPY, WAL_HEADER_SIZE,
};

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use cluso_core::{
    error::{Error, Result},
    metrics::Metrics,
    utils::now_millis,
};

use file::{create_file, encode_payload, recover_file, segment_path, write_entries_batch, WalFile};

/// Segmented log handle. Cheap to share behind an `Arc`; every method takes `&self`.
pub struct WriteAheadLog {
    wal_dir: PathBuf,
    config: WalConfig,
    inner: Mutex<WalInner>,
    /// Newest LSN known to be synced. Read without `inner` on the group commit fast path.
    durable_lsn: AtomicU64,
    /// Held by the group commit leader for the length of its fsync.
    sync_lock: Mutex<()>,
    metrics: Metrics,
}

struct WalInner {
    current: WalFile,
    next_lsn: u64,
    subscribers: Vec<Subscriber>,
    /// Deferred entries written but not yet synced; published once they are.
    unpublished: Vec<WalEntry>,
    stats: WalStats,
    /// Set after a failed write; the segment tail is unknown so no further appends are accepted.
    failed: bool,
}

struct Subscriber {
    sender: SyncSender<WalEntry>,
    from_lsn: u64,
    lagged: Arc<AtomicBool>,
}

impl WriteAheadLog {
    /// Create or recover a WAL in the given directory.
    pub fn open(wal_dir: impl AsRef<Path>, config: WalConfig, metrics: Metrics) -> Result<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| Error::io(format!("Failed to create WAL directory: {:?}", wal_dir), e))?;

        let mut segments = list_segments(&wal_dir)?;

        // A crash while creating a segment can leave a file shorter than its header.
        while let Some((first_lsn, path)) = segments.last() {
            let len = std::fs::metadata(path)?.len();
            if len >= WAL_HEADER_SIZE as u64 {
                break;
            }
            warn!(
                "Removing WAL segment {:?} with incomplete header (first LSN {})",
                path, first_lsn
            );
            std::fs::remove_file(path)?;
            segments.pop();
        }

        let (current, next_lsn) = match segments.last() {
            Some((_, path)) => {
                let current = recover_file(path, &config)?;
                let next_lsn = current.last_lsn.max(current.first_lsn.saturating_sub(1)) + 1;
                (current, next_lsn)
            }
            None => (create_file(&wal_dir, 1, &config)?, 1),
        };

        info!(
            "Opened WAL at {:?}: {} segment(s), next LSN {}, compression {}",
            wal_dir,
            segments.len().max(1),
            next_lsn,
            config.compression
        );

        Ok(Self {
            wal_dir,
            config,
            inner: Mutex::new(WalInner {
                current,
                next_lsn,
                subscribers: Vec::new(),
                unpublished: Vec::new(),
                stats: WalStats::default(),
                failed: false,
            }),
            durable_lsn: AtomicU64::new(next_lsn - 1),
            sync_lock: Mutex::new(()),
            metrics,
        })
    }

    /// Append one record. Returns its LSN once it is durable.
    pub fn append(&self, op_type: OpType, payload: impl Into<Bytes>) -> Result<u64> {
        let records = [(op_type, payload.into())];
        let mut inner = self.inner.lock();
        let lsns = self.write_locked(&mut inner, &records, true)?;
        Ok(lsns[0])
    }

    /// Append several records with a single write and a single fsync.
    /// Returns the assigned LSNs in order.
    pub fn append_batch(&self, records: &[(OpType, Bytes)]) -> Result<Vec<u64>> {
        if records.is_empty() {
            return Ok(vec![]);
        }
        let mut inner = self.inner.lock();
        self.write_locked(&mut inner, records, true)
    }

    /// Append one record without syncing it. The record is written to the OS but
    /// is not durable, nor visible to subscribers, until [`sync_through`] covers it.
    ///
    /// [`sync_through`]: WriteAheadLog::sync_through
    pub fn append_deferred(&self, op_type: OpType, payload: impl Into<Bytes>) -> Result<u64> {
        let records = [(op_type, payload.into())];
        let mut inner = self.inner.lock();
        let lsns = self.write_locked(&mut inner, &records, false)?;
        Ok(lsns[0])
    }

    /// Block until every record up to `lsn` is durable.
    ///
    /// Group commit: the first caller to find `lsn` unsynced becomes the leader,
    /// waits `group_commit_delay_us` for more deferred appends, then syncs all of
    /// them at once. Callers queued behind it usually find their LSN covered.
    pub fn sync_through(&self, lsn: u64) -> Result<()> {
        if self.durable_lsn.load(Ordering::Acquire) >= lsn {
            return Ok(());
        }
        let _leader = self.sync_lock.lock();
        if self.durable_lsn.load(Ordering::Acquire) >= lsn {
            return Ok(());
        }
        if self.config.group_commit_delay_us > 0 {
            std::thread::sleep(Duration::from_micros(self.config.group_commit_delay_us));
        }

        // Sync a duplicate handle so appends can continue while the fsync runs.
        let (file, target) = {
            let mut inner = self.inner.lock();
            inner.check_usable()?;
            if let Err(e) = inner.current.file.flush() {
                inner.failed = true;
                return Err(e.into());
            }
            (inner.current.file.get_ref().try_clone()?, inner.next_lsn - 1)
        };
        if self.config.sync_on_write {
            if let Err(e) = file.sync_all() {
                self.inner.lock().failed = true;
                return Err(e.into());
            }
            self.metrics.record_wal_sync();
        }

        let mut inner = self.inner.lock();
        self.mark_durable(&mut inner, target);
        debug!("Group commit synced through LSN {}", target);
        Ok(())
    }

    /// Entries with `lsn >= from_lsn`, oldest first. Checksums are verified as the
    /// iterator advances.
    pub fn replay(&self, from_lsn: u64) -> Result<WalEntryIterator> {
        let mut inner = self.inner.lock();
        inner.current.file.flush()?;
        drop(inner);

        Ok(WalEntryIterator::new(
            segments_covering(&list_segments(&self.wal_dir)?, from_lsn),
            from_lsn,
        ))
    }

    /// Delete sealed segments whose entries are all `<= upto_lsn`. The active
    /// segment is never removed. Returns the number of segments deleted.
    pub fn truncate(&self, upto_lsn: u64) -> Result<usize> {
        let inner = self.inner.lock();
        let segments = list_segments(&self.wal_dir)?;

        let mut removed = 0;
        for pair in segments.windows(2) {
            let (_, path) = &pair[0];
            let (next_first, _) = pair[1];
            if *path == inner.current.path || next_first.saturating_sub(1) > upto_lsn {
                break;
            }
            std::fs::remove_file(path)
                .map_err(|e| Error::io(format!("Failed to delete WAL segment {:?}", path), e))?;
            removed += 1;
        }

        if removed > 0 {
            info!("Truncated WAL up to LSN {}: {} segment(s) deleted", upto_lsn, removed);
        }
        Ok(removed)
    }

    /// Seal the active segment and start a new one. A no-op while the active segment is empty.
    pub fn rotate(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_usable()?;
        if inner.current.entry_count == 0 {
            return Ok(());
        }
        self.rotate_locked(&mut inner)
    }

    /// Flush buffered bytes and fsync the active segment.
    pub fn sync(&self) -> Result<()> {
        let _leader = self.sync_lock.lock();
        let mut inner = self.inner.lock();
        inner.current.file.flush()?;
        inner.current.file.get_ref().sync_all()?;
        self.metrics.record_wal_sync();
        let target = inner.next_lsn - 1;
        self.mark_durable(&mut inner, target);
        Ok(())
    }

    /// LSN of the newest appended record, 0 for an empty log.
    pub fn last_lsn(&self) -> u64 {
        self.inner.lock().next_lsn - 1
    }

    /// Make sure the next assigned LSN is at least `next`. Used after recovery from a
    /// snapshot whose LSN is ahead of every surviving segment.
    pub fn ensure_next_lsn(&self, next: u64) {
        let mut inner = self.inner.lock();
        if inner.next_lsn < next {
            debug!("Advancing next LSN from {} to {}", inner.next_lsn, next);
            inner.next_lsn = next;
            if inner.unpublished.is_empty() {
                self.durable_lsn.fetch_max(next - 1, Ordering::AcqRel);
            }
        }
    }

    /// Change feed: the durable on-disk backlog from `from_lsn`, then every entry
    /// made durable after this call, in LSN order.
    pub fn subscribe(&self, from_lsn: u64) -> Result<WalSubscription> {
        let mut inner = self.inner.lock();
        inner.current.file.flush()?;

        // Deferred entries past the durable point arrive live once synced.
        let backlog_until = self.durable_lsn.load(Ordering::Acquire);
        let backlog = if from_lsn <= backlog_until {
            Some(WalEntryIterator::new(
                segments_covering(&list_segments(&self.wal_dir)?, from_lsn),
                from_lsn,
            ))
        } else {
            None
        };

        let (sender, receiver) = mpsc::sync_channel(self.config.subscriber_buffer.max(1));
        let lagged = Arc::new(AtomicBool::new(false));
        inner.subscribers.push(Subscriber {
            sender,
            from_lsn: from_lsn.max(backlog_until + 1),
            lagged: Arc::clone(&lagged),
        });

        Ok(WalSubscription {
            backlog,
            backlog_until,
            receiver,
            lagged,
            finished: false,
        })
    }

    pub fn stats(&self) -> WalStats {
        self.inner.lock().stats
    }

    pub fn segment_count(&self) -> Result<usize> {
        Ok(list_segments(&self.wal_dir)?.len())
    }

    pub fn dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Frame `records` into the active segment. With `sync`, the write is
    /// fsynced (when configured) and published before returning.
    fn write_locked(
        &self,
        inner: &mut WalInner,
        records: &[(OpType, Bytes)],
        sync: bool,
    ) -> Result<Vec<u64>> {
        inner.check_usable()?;

        let logical: u64 = records
            .iter()
            .map(|(_, payload)| (ENTRY_PREFIX_SIZE + payload.len() + ENTRY_SUFFIX_SIZE) as u64)
            .sum();
        if inner.current.entry_count > 0 && inner.current.size + logical > self.config.max_file_size {
            self.rotate_locked(inner)?;
        }

        let compressed = inner.current.compressed;
        let timestamp = now_millis();
        let mut stored = Vec::with_capacity(records.len());
        for (i, (op_type, payload)) in records.iter().enumerate() {
            let bytes = encode_payload(payload, compressed)?;
            stored.push(WalEntry {
                lsn: inner.next_lsn + i as u64,
                op_type: *op_type,
                checksum: entry_checksum(*op_type, &bytes),
                payload: bytes,
                timestamp,
            });
        }
        let total: u64 = stored.iter().map(|e| e.encoded_len() as u64).sum();

        if let Err(e) =
            write_entries_batch(&mut inner.current.file, &stored).and_then(|_| self.commit(inner, sync))
        {
            inner.failed = true;
            return Err(e);
        }

        let count = stored.len() as u64;
        let last = inner.next_lsn + count - 1;
        inner.current.size += total;
        inner.current.entry_count += count;
        inner.current.last_lsn = last;
        inner.next_lsn += count;

        inner.stats.entries += count;
        inner.stats.stored_bytes += stored.iter().map(|e| e.payload.len() as u64).sum::<u64>();
        inner.stats.payload_bytes += records.iter().map(|(_, p)| p.len() as u64).sum::<u64>();
        self.metrics.record_wal_append(count, total);

        let lsns = stored.iter().map(|e| e.lsn).collect();
        // Subscribers see the logical payload, not the stored bytes.
        let entries = stored.into_iter().zip(records).map(|(mut entry, (_, payload))| {
            entry.payload = payload.clone();
            entry
        });
        inner.unpublished.extend(entries);
        if sync {
            self.mark_durable(inner, last);
        }
        Ok(lsns)
    }

    /// Write buffered bytes, and fsync when `sync` and configured.
    fn commit(&self, inner: &mut WalInner, sync: bool) -> Result<()> {
        inner.current.file.flush()?;
        if sync && self.config.sync_on_write {
            inner.current.file.get_ref().sync_all()?;
            self.metrics.record_wal_sync();
        }
        Ok(())
    }

    /// Everything up to `lsn` is on disk: advance the durable point and hand
    /// the covered entries to subscribers.
    fn mark_durable(&self, inner: &mut WalInner, lsn: u64) {
        self.durable_lsn.fetch_max(lsn, Ordering::AcqRel);
        let covered = inner.unpublished.partition_point(|e| e.lsn <= lsn);
        if covered > 0 {
            let entries: Vec<WalEntry> = inner.unpublished.drain(..covered).collect();
            inner.publish(entries.into_iter());
        }
    }

    fn rotate_locked(&self, inner: &mut WalInner) -> Result<()> {
        inner.current.file.flush()?;
        inner.current.file.get_ref().sync_all()?;

        let first_lsn = inner.next_lsn;
        if segment_path(&self.wal_dir, first_lsn) == inner.current.path {
            return Ok(());
        }
        inner.current = create_file(&self.wal_dir, first_lsn, &self.config)?;
        info!("Rotated WAL segment, first LSN {}", first_lsn);
        Ok(())
    }
}

impl WalInner {
    fn check_usable(&self) -> Result<()> {
        if self.failed {
            return Err(Error::WriteAheadLog {
                message: "WAL rejected appends after an earlier write failure".to_string(),
            });
        }
        Ok(())
    }

    fn publish(&mut self, entries: impl Iterator<Item = WalEntry>) {
        if self.subscribers.is_empty() {
            return;
        }
        for entry in entries {
            self.subscribers.retain(|sub| {
                if entry.lsn < sub.from_lsn {
                    return true;
                }
                match sub.sender.try_send(entry.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!("WAL subscriber fell behind at LSN {}, disconnecting", entry.lsn);
                        sub.lagged.store(true, Ordering::Release);
                        false
                    }
                    Err(TrySendError::Disconnected(_)) => false,
                }
            });
        }
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Err(e) = inner.current.file.flush() {
            warn!("Failed to flush WAL on drop: {}", e);
            return;
        }
        if let Err(e) = inner.current.file.get_ref().sync_all() {
            warn!("Failed to sync WAL on drop: {}", e);
        }
    }
}

/// A live change feed over the WAL.
///
/// Yields the backlog read from disk first, then entries pushed by appends. A
/// subscriber that does not keep up with the bounded live buffer is disconnected
/// and receives one `CapacityExceeded` error. The feed ends when the log is dropped.
pub struct WalSubscription {
    backlog: Option<WalEntryIterator>,
    backlog_until: u64,
    receiver: Receiver<WalEntry>,
    lagged: Arc<AtomicBool>,
    finished: bool,
}

impl WalSubscription {
    /// Next entry without blocking on live appends. `Ok(None)` means nothing is buffered yet.
    pub fn try_next(&mut self) -> Result<Option<WalEntry>> {
        if let Some(entry) = self.next_backlog() {
            return entry.map(Some);
        }
        if self.finished {
            return Ok(None);
        }
        match self.receiver.try_recv() {
            Ok(entry) => Ok(Some(entry)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => self.disconnected().map(|_| None),
        }
    }

    /// Wait up to `timeout` for the next entry.
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<WalEntry>> {
        if let Some(entry) = self.next_backlog() {
            return entry.map(Some);
        }
        if self.finished {
            return Ok(None);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(entry) => Ok(Some(entry)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => self.disconnected().map(|_| None),
        }
    }

    pub fn is_lagged(&self) -> bool {
        self.lagged.load(Ordering::Acquire)
    }

    fn next_backlog(&mut self) -> Option<Result<WalEntry>> {
        let backlog = self.backlog.as_mut()?;
        match backlog.next() {
            Some(Ok(entry)) if entry.lsn <= self.backlog_until => Some(Ok(entry)),
            Some(Err(e)) => {
                self.backlog = None;
                self.finished = true;
                Some(Err(e))
            }
            _ => {
                self.backlog = None;
                None
            }
        }
    }

    fn disconnected(&mut self) -> Result<()> {
        self.finished = true;
        if self.is_lagged() {
            return Err(Error::CapacityExceeded {
                resource: "WAL subscriber buffer".to_string(),
            });
        }
        Ok(())
    }
}

impl Iterator for WalSubscription {
    type Item = Result<WalEntry>;

    /// Blocks until the next entry is available or the feed ends.
    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.next_backlog() {
            return Some(entry);
        }
        if self.finished {
            return None;
        }
        match self.receiver.recv() {
            Ok(entry) => Some(Ok(entry)),
            Err(_) => self.disconnected().err().map(Err),
        }
    }
}

/// `(first_lsn, path)` of every segment, ordered by first LSN.
fn list_segments(wal_dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(wal_dir)? {
        let path = entry?.path();
        if path.extension() != Some(std::ffi::OsStr::new("wal")) {
            continue;
        }
        if let Some(first_lsn) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            segments.push((first_lsn, path));
        }
    }
    segments.sort_by_key(|(first_lsn, _)| *first_lsn);
    Ok(segments)
}

/// Drop leading segments that end before `from_lsn`.
fn segments_covering(segments: &[(u64, PathBuf)], from_lsn: u64) -> Vec<PathBuf> {
    let skip = segments
        .windows(2)
        .take_while(|pair| pair[1].0 <= from_lsn)
        .count();
    segments[skip..].iter().map(|(_, p)| p.clone()).collect()
}
