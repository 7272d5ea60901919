use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use tracing::warn;

use cluso_core::error::{Error, Result};

use super::file::{decode_payload, read_entry, read_header, ReadOutcome};
use super::types::WalEntry;

/// Streaming iterator over WAL entries across segments, oldest first.
///
/// The first error ends iteration: a checksum mismatch or an out-of-order LSN is
/// yielded once and nothing after it is trusted. A record cut short at the end of
/// the newest segment is treated as the end of the log.
pub struct WalEntryIterator {
    paths: Vec<PathBuf>,
    current_idx: usize,
    reader: Option<BufReader<File>>,
    /// Mode of the segment `reader` is positioned in.
    compressed: bool,
    from_lsn: u64,
    last_lsn: u64,
    done: bool,
}

impl WalEntryIterator {
    pub(crate) fn new(paths: Vec<PathBuf>, from_lsn: u64) -> Self {
        Self {
            paths,
            current_idx: 0,
            reader: None,
            compressed: false,
            from_lsn,
            last_lsn: 0,
            done: false,
        }
    }

    fn on_last_segment(&self) -> bool {
        self.current_idx == self.paths.len()
    }

    fn open_next_file(&mut self) -> Result<bool> {
        if self.current_idx >= self.paths.len() {
            self.reader = None;
            return Ok(false);
        }

        let path = &self.paths[self.current_idx];
        self.current_idx += 1;

        let file = File::open(path)
            .map_err(|e| Error::io(format!("Failed to open WAL segment {:?}", path), e))?;
        let mut reader = BufReader::new(file);
        self.compressed = read_header(&mut reader, path)?.compressed;
        self.reader = Some(reader);
        Ok(true)
    }

    fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        loop {
            if self.reader.is_none() && !self.open_next_file()? {
                return Ok(None);
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };

            match read_entry(reader)? {
                ReadOutcome::Entry(entry) => {
                    if self.last_lsn != 0 && entry.lsn <= self.last_lsn {
                        return Err(Error::corruption(
                            "WAL replay",
                            format!("LSN {} follows {}", entry.lsn, self.last_lsn),
                        ));
                    }
                    self.last_lsn = entry.lsn;
                    if entry.lsn >= self.from_lsn {
                        return decode_payload(entry, self.compressed).map(Some);
                    }
                }
                ReadOutcome::End => {
                    self.reader = None;
                }
                ReadOutcome::Torn => {
                    if !self.on_last_segment() {
                        return Err(Error::corruption(
                            format!("WAL segment {:?}", self.paths[self.current_idx - 1]),
                            "truncated record inside a sealed segment",
                        ));
                    }
                    warn!(
                        "Torn record after LSN {} at the tail of the log, stopping replay",
                        self.last_lsn
                    );
                    return Ok(None);
                }
            }
        }
    }
}

impl Iterator for WalEntryIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
