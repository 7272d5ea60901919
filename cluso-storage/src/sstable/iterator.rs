//! SSTable iterator implementation

use std::sync::Arc;

use bytes::Bytes;

use cluso_core::error::Result;

use super::block::Block;
use super::reader::SSTableReader;
use crate::record::Record;

/// Streaming iterator over a table's entries in key order.
///
/// Holds its reader, so it stays valid if the table is dropped from the engine's
/// version while iteration is in progress. The first error ends iteration.
pub struct SSTableIterator {
    reader: Arc<SSTableReader>,
    block_idx: usize,
    block: Option<Arc<Block>>,
    entry_idx: usize,
    seek_to: Option<Bytes>,
    fill_cache: bool,
    done: bool,
}

impl SSTableIterator {
    pub(crate) fn new(reader: Arc<SSTableReader>, seek_to: Option<Bytes>) -> Self {
        Self {
            reader,
            block_idx: 0,
            block: None,
            entry_idx: 0,
            seek_to,
            fill_cache: true,
            done: false,
        }
    }

    /// Bypass the block cache, for full-table passes such as compaction that
    /// would otherwise evict hot blocks.
    pub fn without_cache_fill(mut self) -> Self {
        self.fill_cache = false;
        self
    }

    fn position(&mut self, start: &[u8]) -> Result<()> {
        self.block_idx = self
            .reader
            .index()
            .partition_point(|e| e.last_key.as_ref() < start);
        if self.block_idx < self.reader.block_count() {
            let block = self.reader.read_block(self.block_idx, self.fill_cache)?;
            self.entry_idx = block.seek(start)?;
            self.block = Some(block);
        }
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<(Bytes, Record)>> {
        if let Some(start) = self.seek_to.take() {
            self.position(&start)?;
        }

        loop {
            if let Some(block) = &self.block {
                if self.entry_idx < block.len() {
                    let entry = block.entry_at(self.entry_idx)?;
                    self.entry_idx += 1;
                    return Ok(Some(entry));
                }
                self.block = None;
                self.block_idx += 1;
                self.entry_idx = 0;
            }

            if self.block_idx >= self.reader.block_count() {
                return Ok(None);
            }
            self.block = Some(self.reader.read_block(self.block_idx, self.fill_cache)?);
        }
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<(Bytes, Record)>;

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
