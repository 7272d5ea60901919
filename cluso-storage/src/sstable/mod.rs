//! SSTables are immutable, sorted files holding flushed and compacted records.
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SSTable File Structure                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Header (16 bytes): magic, version, compression, reserved   │
//! │                                                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Data Blocks                      │    │
//! │  │  ┌──────────────────────────────────────────────┐   │    │
//! │  │  │ Block 1 (<= block_size, <= 128 entries)      │   │    │
//! │  │  │ ┌─────────────────────────────────────────┐  │   │    │
//! │  │  │ │ [key_len][key][rec_len][seq|flag|value] │  │   │    │
//! │  │  │ │ ...                                     │  │   │    │
//! │  │  │ │ [offset u32] x N  [N u32]               │  │   │    │
//! │  │  │ └─────────────────────────────────────────┘  │   │    │
//! │  │  │ Block Trailer: [compression u8][crc32]       │   │    │
//! │  │  └──────────────────────────────────────────────┘   │    │
//! │  │  Block 2...                                         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                                                             │
//! │  Index: [last_key][offset][size][entries] per block         │
//! │  Bloom Filter: [bits][num_hashes][num_bits]                 │
//! │                                                             │
//! │  Footer (48 bytes)                                          │
//! │  [index_offset][index_size][bloom_offset][bloom_size]       │
//! │  [entry_count][magic][version][crc32 of index+bloom]        │
//! └─────────────────────────────────────────────────────────────┘
//!
//! A point lookup touches the bloom filter, binary-searches the in-memory index
//! and reads at most one block, so it never examines more than `index_interval`
//! entries however large the table is.

mod block;
mod bloom;
mod builder;
mod compression;
mod iterator;
mod reader;
mod types;
mod writer;

pub use block::Block;
pub use bloom::BloomFilter;
pub use builder::{BlockBuilder, IndexBuilder};
pub use compression::{compress_block, decompress_block, CompressionType};
pub use iterator::SSTableIterator;
pub use reader::{Probe, SSTableReader};
pub use types::{
    IndexEntry, SSTableConfig, SSTableInfo, DEFAULT_INDEX_INTERVAL, FOOTER_SIZE, HEADER_SIZE,
    SSTABLE_MAGIC, SSTABLE_VERSION,
};
pub use writer::SSTableWriter;
