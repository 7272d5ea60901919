//! SSTable writer implementation

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use cluso_core::{
    error::{Error, Result},
    utils::now_secs,
};

use super::bloom::BloomFilter;
use super::builder::{BlockBuilder, IndexBuilder};
use super::compression::compress_block;
use super::types::*;
use crate::record::Record;

/// Streams sorted entries into a new table file.
///
/// Keys must arrive in strictly ascending order. The bloom filter is sized at
/// [`Self::finish`] from the exact number of keys written.
pub struct SSTableWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    config: SSTableConfig,
    current_block: BlockBuilder,
    index_builder: IndexBuilder,
    key_hashes: Vec<u64>,
    entry_count: u64,
    file_offset: u64,
    min_key: Option<Bytes>,
    max_key: Option<Bytes>,
    min_sequence: u64,
    max_sequence: u64,
}

impl SSTableWriter {
    pub fn create(path: impl AsRef<Path>, config: SSTableConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::io(format!("Failed to create SSTable {:?}", path), e))?;

        let mut writer = BufWriter::new(file);
        writer.write_all(&encode_header(config.compression))?;

        Ok(Self {
            path,
            writer,
            current_block: BlockBuilder::new(config.block_size, config.index_interval),
            config,
            index_builder: IndexBuilder::new(),
            key_hashes: Vec::new(),
            entry_count: 0,
            file_offset: HEADER_SIZE as u64,
            min_key: None,
            max_key: None,
            min_sequence: u64::MAX,
            max_sequence: 0,
        })
    }

    pub fn add(&mut self, key: &[u8], record: &Record) -> Result<()> {
        if let Some(last) = &self.max_key {
            if key <= last.as_ref() {
                return Err(Error::SSTable {
                    message: format!("keys out of order while writing {:?}", self.path),
                });
            }
        }

        if self.current_block.is_full_for(key, record) {
            self.flush_block()?;
        }
        self.current_block.add(key, record);
        self.key_hashes.push(BloomFilter::hash_key(key));

        let key = Bytes::copy_from_slice(key);
        if self.min_key.is_none() {
            self.min_key = Some(key.clone());
        }
        self.max_key = Some(key);
        self.min_sequence = self.min_sequence.min(record.sequence);
        self.max_sequence = self.max_sequence.max(record.sequence);
        self.entry_count += 1;
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Bytes written so far plus the open block.
    pub fn estimated_size(&self) -> u64 {
        self.file_offset + self.current_block.estimated_size() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.current_block.is_empty() {
            return Ok(());
        }

        let last_key = self.current_block.last_key().cloned().unwrap_or_default();
        let entries = self.current_block.len() as u32;
        let block_data = self.current_block.finish();
        let compressed = compress_block(&block_data, self.config.compression)?;

        self.writer.write_all(&compressed)?;
        self.writer.write_all(&[self.config.compression as u8])?;
        self.writer.write_all(&crc32fast::hash(&compressed).to_le_bytes())?;

        let block_size = (compressed.len() + BLOCK_TRAILER_SIZE) as u32;
        self.index_builder.add(IndexEntry {
            last_key,
            block_offset: self.file_offset,
            block_size,
            entries,
        });
        self.file_offset += block_size as u64;
        Ok(())
    }

    /// Write index, bloom filter and footer, then fsync.
    pub fn finish(mut self) -> Result<SSTableInfo> {
        self.flush_block()?;

        let index_offset = self.file_offset;
        let index_data = self.index_builder.finish();
        let bloom_offset = index_offset + index_data.len() as u64;
        let bloom_data =
            BloomFilter::from_hashes(&self.key_hashes, self.config.bloom_false_positive_rate).to_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&index_data);
        hasher.update(&bloom_data);

        let footer = SSTableFooter {
            index_offset,
            index_size: index_data.len() as u32,
            bloom_offset,
            bloom_size: bloom_data.len() as u32,
            entry_count: self.entry_count,
            checksum: hasher.finalize(),
        };

        self.writer.write_all(&index_data)?;
        self.writer.write_all(&bloom_data)?;
        self.writer.write_all(&footer.encode())?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        let file_size = bloom_offset + bloom_data.len() as u64 + FOOTER_SIZE as u64;
        debug!(
            "Finished writing SSTable {:?}: {} entries in {} blocks, {} bytes",
            self.path,
            self.entry_count,
            self.index_builder.len(),
            file_size
        );

        Ok(SSTableInfo {
            path: self.path,
            file_size,
            entry_count: self.entry_count,
            min_key: self.min_key.map(|k| k.to_vec()).unwrap_or_default(),
            max_key: self.max_key.map(|k| k.to_vec()).unwrap_or_default(),
            min_sequence: if self.entry_count == 0 { 0 } else { self.min_sequence },
            max_sequence: self.max_sequence,
            creation_time: now_secs() as u64,
        })
    }

    /// Discard a partially written table.
    pub fn abandon(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.writer);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("Failed to remove partial SSTable {:?}", path), e)),
        }
    }
}
