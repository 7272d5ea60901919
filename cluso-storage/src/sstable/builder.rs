//! Block and index builders for SSTable

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

use cluso_core::error::{Error, Result};

use super::types::IndexEntry;
use crate::record::Record;

/// Builder for SSTable data blocks.
///
/// Layout: `[key_len u32][key][value_len u32][record]...` then one `u32` offset
/// per entry and the entry count.
pub struct BlockBuilder {
    buffer: BytesMut,
    offsets: Vec<u32>,
    last_key: Option<Bytes>,
    max_size: usize,
    max_entries: usize,
}

impl BlockBuilder {
    pub fn new(max_size: usize, max_entries: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_size),
            offsets: Vec::with_capacity(max_entries),
            last_key: None,
            max_size,
            max_entries: max_entries.max(1),
        }
    }

    /// Whether the entry must go into a new block. A block always accepts its first entry.
    pub fn is_full_for(&self, key: &[u8], record: &Record) -> bool {
        if self.is_empty() {
            return false;
        }
        let entry_size = 8 + key.len() + record.encoded_len();
        self.offsets.len() >= self.max_entries || self.estimated_size() + entry_size > self.max_size
    }

    pub fn add(&mut self, key: &[u8], record: &Record) {
        self.offsets.push(self.buffer.len() as u32);

        self.buffer.put_u32_le(key.len() as u32);
        self.buffer.put_slice(key);
        self.buffer.put_u32_le(record.encoded_len() as u32);
        record.encode_into(&mut self.buffer);

        self.last_key = Some(Bytes::copy_from_slice(key));
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn last_key(&self) -> Option<&Bytes> {
        self.last_key.as_ref()
    }

    /// Size of the finished block before compression.
    pub fn estimated_size(&self) -> usize {
        self.buffer.len() + self.offsets.len() * 4 + 4
    }

    /// Emit the block and reset the builder for reuse.
    pub fn finish(&mut self) -> Bytes {
        for offset in &self.offsets {
            self.buffer.put_u32_le(*offset);
        }
        self.buffer.put_u32_le(self.offsets.len() as u32);

        self.offsets.clear();
        self.last_key = None;
        self.buffer.split().freeze()
    }
}

/// Builder for the sparse index: `[key_len u32][last_key][offset u64][size u32][entries u32]...[count u32]`.
#[derive(Default)]
pub struct IndexBuilder {
    entries: Vec<IndexEntry>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(&self) -> Vec<u8> {
        let size: usize = self.entries.iter().map(|e| 20 + e.last_key.len()).sum();
        let mut buffer = BytesMut::with_capacity(size + 4);
        for entry in &self.entries {
            buffer.put_u32_le(entry.last_key.len() as u32);
            buffer.put_slice(&entry.last_key);
            buffer.put_u64_le(entry.block_offset);
            buffer.put_u32_le(entry.block_size);
            buffer.put_u32_le(entry.entries);
        }
        buffer.put_u32_le(self.entries.len() as u32);
        buffer.to_vec()
    }
}

/// Parse an index written by [`IndexBuilder::finish`].
pub fn decode_index(data: &[u8]) -> Result<Vec<IndexEntry>> {
    let corrupt = |details: &str| Error::corruption("SSTable index", details);

    if data.len() < 4 {
        return Err(corrupt("missing entry count"));
    }
    let count = LittleEndian::read_u32(&data[data.len() - 4..]) as usize;
    let body = &data[..data.len() - 4];

    let mut entries = Vec::with_capacity(count.min(body.len() / 20 + 1));
    let mut pos = 0;
    for _ in 0..count {
        if pos + 4 > body.len() {
            return Err(corrupt("truncated key length"));
        }
        let key_len = LittleEndian::read_u32(&body[pos..pos + 4]) as usize;
        pos += 4;
        if pos + key_len + 16 > body.len() {
            return Err(corrupt("truncated entry"));
        }
        let last_key = Bytes::copy_from_slice(&body[pos..pos + key_len]);
        pos += key_len;
        let block_offset = LittleEndian::read_u64(&body[pos..pos + 8]);
        let block_size = LittleEndian::read_u32(&body[pos + 8..pos + 12]);
        let block_entries = LittleEndian::read_u32(&body[pos + 12..pos + 16]);
        pos += 16;

        entries.push(IndexEntry {
            last_key,
            block_offset,
            block_size,
            entries: block_entries,
        });
    }

    if pos != body.len() {
        return Err(corrupt("trailing bytes after last entry"));
    }
    if entries.windows(2).any(|w| w[0].last_key >= w[1].last_key) {
        return Err(corrupt("index keys out of order"));
    }
    Ok(entries)
}
