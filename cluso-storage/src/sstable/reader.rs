//! SSTable reader implementation

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use memmap2::{Mmap, MmapOptions};

use cluso_core::error::{Error, Result};

use super::block::{Block, BlockData};
use super::bloom::BloomFilter;
use super::builder::decode_index;
use super::compression::{decompress_block, CompressionType};
use super::iterator::SSTableIterator;
use super::types::*;
use crate::cache::{BlockCache, CacheKey};
use crate::record::Record;

/// Read-only view of one table file, memory-mapped.
pub struct SSTableReader {
    id: u64,
    path: PathBuf,
    mmap: Arc<Mmap>,
    index: Vec<IndexEntry>,
    bloom: BloomFilter,
    footer: SSTableFooter,
    cache: Option<Arc<BlockCache>>,
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("footer", &self.footer)
            .finish_non_exhaustive()
    }
}

/// Outcome of a point lookup with the work it took.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    pub record: Option<Record>,
    pub bloom_rejected: bool,
    pub blocks_read: usize,
    /// Block entries compared while searching.
    pub entries_examined: usize,
    /// The block came from the block cache.
    pub cache_hit: bool,
}

impl SSTableReader {
    /// Open and validate a table. Blocks are verified lazily as they are read.
    pub fn open(id: u64, path: impl AsRef<Path>, cache: Option<Arc<BlockCache>>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| Error::io(format!("Failed to open SSTable {:?}", path), e))?;
        let file_size = file.metadata()?.len() as usize;

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::corruption(
                format!("SSTable {:?}", path),
                format!("file too small ({} bytes)", file_size),
            ));
        }

        // SAFETY: table files are immutable once renamed into place and are only
        // unlinked, never rewritten, while readers exist.
        let mmap = unsafe {
            MmapOptions::new()
                .map(&file)
                .map_err(|e| Error::io("Failed to mmap SSTable", e))?
        };

        check_header(&mmap[..HEADER_SIZE])?;
        let footer = SSTableFooter::decode(&mmap[file_size - FOOTER_SIZE..])?;

        let bad_layout = || {
            Error::corruption(
                format!("SSTable {:?}", path),
                "footer offsets do not match the file layout",
            )
        };
        let index_start = footer.index_offset;
        let index_end = index_start
            .checked_add(u64::from(footer.index_size))
            .ok_or_else(bad_layout)?;
        let bloom_start = footer.bloom_offset;
        let bloom_end = bloom_start
            .checked_add(u64::from(footer.bloom_size))
            .ok_or_else(bad_layout)?;
        if index_start < HEADER_SIZE as u64
            || index_end != bloom_start
            || bloom_end != (file_size - FOOTER_SIZE) as u64
        {
            return Err(bad_layout());
        }
        // Bounded by the file size from here on.
        let (index_start, index_end) = (index_start as usize, index_end as usize);
        let (bloom_start, bloom_end) = (bloom_start as usize, bloom_end as usize);

        let actual = crc32fast::hash(&mmap[index_start..bloom_end]);
        if actual != footer.checksum {
            return Err(Error::corruption(
                format!("SSTable {:?}", path),
                format!(
                    "metadata checksum mismatch: expected {:#010x}, got {:#010x}",
                    footer.checksum, actual
                ),
            ));
        }

        let index = decode_index(&mmap[index_start..index_end])?;
        let bloom = BloomFilter::from_bytes(&mmap[bloom_start..bloom_end])?;

        Ok(Self {
            id,
            path,
            mmap: Arc::new(mmap),
            index,
            bloom,
            footer,
            cache,
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        Ok(self.probe(key)?.record)
    }

    /// Point lookup: bloom filter, then a binary search of the sparse index, then
    /// a binary search inside at most one block.
    pub fn probe(&self, key: &[u8]) -> Result<Probe> {
        if !self.bloom.may_contain(key) {
            return Ok(Probe {
                bloom_rejected: true,
                ..Default::default()
            });
        }

        let block_idx = self.index.partition_point(|e| e.last_key.as_ref() < key);
        if block_idx == self.index.len() {
            return Ok(Probe::default());
        }

        let (block, cache_hit) = self.load_block(block_idx, true)?;
        let (record, entries_examined) = block.search(key)?;
        Ok(Probe {
            record,
            bloom_rejected: false,
            blocks_read: 1,
            entries_examined,
            cache_hit,
        })
    }

    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom.may_contain(key)
    }

    /// Iterate every entry in key order.
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), None)
    }

    /// Iterate entries with key `>= start`.
    pub fn iter_from(self: &Arc<Self>, start: &[u8]) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), Some(Bytes::copy_from_slice(start)))
    }

    /// Read, verify and parse block `block_idx`, going through the block cache.
    pub(crate) fn read_block(&self, block_idx: usize, fill_cache: bool) -> Result<Arc<Block>> {
        self.load_block(block_idx, fill_cache).map(|(block, _)| block)
    }

    fn load_block(&self, block_idx: usize, fill_cache: bool) -> Result<(Arc<Block>, bool)> {
        let entry = self.index.get(block_idx).ok_or_else(|| Error::SSTable {
            message: format!("block {} out of range in {:?}", block_idx, self.path),
        })?;
        let cache_key = CacheKey::new(self.id, entry.block_offset);

        if let Some(cache) = &self.cache {
            if let Some(block) = cache.get(&cache_key) {
                return Ok((block, true));
            }
        }

        let start = entry.block_offset as usize;
        let end = start + entry.block_size as usize;
        let footer_start = self.footer.index_offset as usize;
        if entry.block_size as usize <= BLOCK_TRAILER_SIZE || end > footer_start {
            return Err(self.block_corruption(entry, "block range outside the data section"));
        }

        let body_end = end - BLOCK_TRAILER_SIZE;
        let compression = CompressionType::try_from(self.mmap[body_end])?;
        let stored_crc = LittleEndian::read_u32(&self.mmap[body_end + 1..end]);
        let actual_crc = crc32fast::hash(&self.mmap[start..body_end]);
        if stored_crc != actual_crc {
            return Err(self.block_corruption(entry, "block checksum mismatch"));
        }

        let data = match compression {
            CompressionType::None => BlockData::Mapped {
                mmap: Arc::clone(&self.mmap),
                range: start..body_end,
            },
            other => BlockData::Owned(Bytes::from(decompress_block(
                &self.mmap[start..body_end],
                other,
            )?)),
        };

        let block = Block::parse(data)?;
        if block.len() != entry.entries as usize {
            return Err(self.block_corruption(entry, "entry count disagrees with the index"));
        }

        let block = Arc::new(block);
        if fill_cache {
            if let Some(cache) = &self.cache {
                cache.insert(cache_key, Arc::clone(&block));
            }
        }
        Ok((block, false))
    }

    pub(crate) fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.footer.entry_count
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Largest key in the table.
    pub fn last_key(&self) -> Option<&[u8]> {
        self.index.last().map(|e| e.last_key.as_ref())
    }

    fn block_corruption(&self, entry: &IndexEntry, details: &str) -> Error {
        Error::corruption(
            format!("SSTable {:?} block at {}", self.path, entry.block_offset),
            details,
        )
    }
}
