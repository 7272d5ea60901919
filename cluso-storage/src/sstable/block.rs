//! Read side of a data block.

use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use memmap2::Mmap;

use cluso_core::error::{Error, Result};

use crate::record::Record;

/// Block bytes: a window of the mapped file for uncompressed blocks, an owned
/// buffer for decompressed ones.
pub(crate) enum BlockData {
    Mapped { mmap: Arc<Mmap>, range: Range<usize> },
    Owned(Bytes),
}

impl BlockData {
    fn as_slice(&self) -> &[u8] {
        match self {
            BlockData::Mapped { mmap, range } => &mmap[range.clone()],
            BlockData::Owned(bytes) => bytes,
        }
    }

    fn bytes(&self, range: Range<usize>) -> Bytes {
        match self {
            BlockData::Mapped { .. } => Bytes::copy_from_slice(&self.as_slice()[range]),
            BlockData::Owned(bytes) => bytes.slice(range),
        }
    }
}

/// A parsed data block. Handles are shared through the block cache.
pub struct Block {
    data: BlockData,
    offsets_start: usize,
    count: usize,
}

impl Block {
    pub(crate) fn parse(data: BlockData) -> Result<Self> {
        let slice = data.as_slice();
        if slice.len() < 4 {
            return Err(Error::corruption("SSTable block", "missing entry count"));
        }
        let count = LittleEndian::read_u32(&slice[slice.len() - 4..]) as usize;
        let offsets_len = count
            .checked_mul(4)
            .filter(|len| len + 4 <= slice.len())
            .ok_or_else(|| {
                Error::corruption("SSTable block", format!("entry count {} exceeds block", count))
            })?;
        let offsets_start = slice.len() - 4 - offsets_len;

        Ok(Self {
            data,
            offsets_start,
            count,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    /// Key and record range of entry `i`, borrowed from the block.
    fn entry(&self, i: usize) -> Result<(&[u8], Range<usize>)> {
        let data = self.data.as_slice();
        let corrupt = || Error::corruption("SSTable block", format!("entry {} out of bounds", i));

        let at = self.offsets_start + i * 4;
        let offset = LittleEndian::read_u32(&data[at..at + 4]) as usize;

        let key_start = offset + 4;
        if key_start > self.offsets_start {
            return Err(corrupt());
        }
        let key_len = LittleEndian::read_u32(&data[offset..key_start]) as usize;
        let key_end = key_start + key_len;
        if key_end + 4 > self.offsets_start {
            return Err(corrupt());
        }
        let value_len = LittleEndian::read_u32(&data[key_end..key_end + 4]) as usize;
        let value_start = key_end + 4;
        if value_start + value_len > self.offsets_start {
            return Err(corrupt());
        }
        Ok((&data[key_start..key_end], value_start..value_start + value_len))
    }

    pub(crate) fn key_at(&self, i: usize) -> Result<&[u8]> {
        Ok(self.entry(i)?.0)
    }

    pub(crate) fn entry_at(&self, i: usize) -> Result<(Bytes, Record)> {
        let (key, range) = self.entry(i)?;
        let key = Bytes::copy_from_slice(key);
        let record = Record::decode(&self.data.bytes(range))?;
        Ok((key, record))
    }

    /// Binary search for `key`. Returns the record (if present) and the number of
    /// entries compared.
    pub(crate) fn search(&self, key: &[u8]) -> Result<(Option<Record>, usize)> {
        let mut left = 0;
        let mut right = self.count;
        let mut examined = 0;

        while left < right {
            let mid = left + (right - left) / 2;
            let (candidate, range) = self.entry(mid)?;
            examined += 1;
            match candidate.cmp(key) {
                Ordering::Equal => {
                    let record = Record::decode(&self.data.bytes(range))?;
                    return Ok((Some(record), examined));
                }
                Ordering::Less => left = mid + 1,
                Ordering::Greater => right = mid,
            }
        }
        Ok((None, examined))
    }

    /// Index of the first entry with key `>= key`.
    pub(crate) fn seek(&self, key: &[u8]) -> Result<usize> {
        let mut left = 0;
        let mut right = self.count;
        while left < right {
            let mid = left + (right - left) / 2;
            if self.key_at(mid)? < key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        Ok(left)
    }
}
