//! SSTable types and configuration

use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use cluso_core::error::{Error, Result};

use super::compression::CompressionType;

pub const SSTABLE_MAGIC: &[u8; 8] = b"CLUSOSST";
pub const SSTABLE_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 16;
pub const FOOTER_SIZE: usize = 48;
/// Compression byte + CRC32 behind every block.
pub const BLOCK_TRAILER_SIZE: usize = 5;
pub const DEFAULT_BLOCK_SIZE: usize = cluso_core::config::DEFAULT_BLOCK_SIZE;
/// Upper bound on entries per block, and so on the entries one point lookup examines.
pub const DEFAULT_INDEX_INTERVAL: usize = 128;

#[derive(Debug, Clone)]
pub struct SSTableConfig {
    pub block_size: usize,
    pub compression: CompressionType,
    pub bloom_false_positive_rate: f64,
    pub index_interval: usize,
}

impl Default for SSTableConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            compression: CompressionType::Snappy,
            bloom_false_positive_rate: 0.01,
            index_interval: DEFAULT_INDEX_INTERVAL,
        }
    }
}

/// Summary of a finished table, recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SSTableInfo {
    pub path: PathBuf,
    pub file_size: u64,
    pub entry_count: u64,
    #[serde(with = "serde_bytes")]
    pub min_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub max_key: Vec<u8>,
    pub min_sequence: u64,
    pub max_sequence: u64,
    pub creation_time: u64,
}

impl SSTableInfo {
    /// Whether `[start, end)` can intersect this table. An empty `end` is unbounded.
    pub fn overlaps_range(&self, start: &[u8], end: &[u8]) -> bool {
        (end.is_empty() || self.min_key.as_slice() < end) && self.max_key.as_slice() >= start
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.min_key.as_slice() <= key && key <= self.max_key.as_slice()
    }
}

/// One sparse index entry per data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub last_key: Bytes,
    pub block_offset: u64,
    pub block_size: u32, // Including the trailer
    pub entries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SSTableFooter {
    pub index_offset: u64,
    pub index_size: u32,
    pub bloom_offset: u64,
    pub bloom_size: u32,
    pub entry_count: u64,
    pub checksum: u32, // CRC32 over index and bloom bytes
}

impl SSTableFooter {
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        LittleEndian::write_u64(&mut buf[0..8], self.index_offset);
        LittleEndian::write_u32(&mut buf[8..12], self.index_size);
        LittleEndian::write_u64(&mut buf[12..20], self.bloom_offset);
        LittleEndian::write_u32(&mut buf[20..24], self.bloom_size);
        LittleEndian::write_u64(&mut buf[24..32], self.entry_count);
        buf[32..40].copy_from_slice(SSTABLE_MAGIC);
        LittleEndian::write_u32(&mut buf[40..44], SSTABLE_VERSION);
        LittleEndian::write_u32(&mut buf[44..48], self.checksum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != FOOTER_SIZE {
            return Err(Error::corruption("SSTable footer", "wrong footer length"));
        }
        if &buf[32..40] != SSTABLE_MAGIC {
            return Err(Error::corruption("SSTable footer", "invalid magic number"));
        }
        let version = LittleEndian::read_u32(&buf[40..44]);
        if version != SSTABLE_VERSION {
            return Err(Error::SSTable {
                message: format!("Unsupported SSTable version: {}", version),
            });
        }
        Ok(Self {
            index_offset: LittleEndian::read_u64(&buf[0..8]),
            index_size: LittleEndian::read_u32(&buf[8..12]),
            bloom_offset: LittleEndian::read_u64(&buf[12..20]),
            bloom_size: LittleEndian::read_u32(&buf[20..24]),
            entry_count: LittleEndian::read_u64(&buf[24..32]),
            checksum: LittleEndian::read_u32(&buf[44..48]),
        })
    }
}

/// File header: magic, version, default compression, reserved.
pub fn encode_header(compression: CompressionType) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..8].copy_from_slice(SSTABLE_MAGIC);
    LittleEndian::write_u32(&mut buf[8..12], SSTABLE_VERSION);
    buf[12] = compression as u8;
    buf
}

pub fn check_header(buf: &[u8]) -> Result<()> {
    if buf.len() < HEADER_SIZE || &buf[0..8] != SSTABLE_MAGIC {
        return Err(Error::corruption("SSTable header", "invalid magic number"));
    }
    let version = LittleEndian::read_u32(&buf[8..12]);
    if version != SSTABLE_VERSION {
        return Err(Error::SSTable {
            message: format!("Unsupported SSTable version: {}", version),
        });
    }
    CompressionType::try_from(buf[12])?;
    Ok(())
}
