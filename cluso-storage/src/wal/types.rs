use bytes::Bytes;
use cluso_core::error::{Error, Result};

pub const WAL_MAGIC: &[u8; 8] = b"CLUSOWAL";
pub const WAL_VERSION: u32 = 1;
pub const WAL_HEADER_SIZE: usize = 32;

/// Header flag: every payload in the segment is snappy-compressed.
pub const SEGMENT_FLAG_SNAPPY: u32 = 1;

/// LSN:8 + OpType:1 + PayloadLen:4 ahead of the payload.
pub const ENTRY_PREFIX_SIZE: usize = 13;
/// Checksum:4 + Timestamp:8 behind the payload.
pub const ENTRY_SUFFIX_SIZE: usize = 12;

/// Upper bound on a single payload; anything larger is treated as a corrupt length.
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpType {
    CreateNode = 0,
    UpdateNode = 1,
    DeleteNode = 2,
    CreateEdge = 3,
    UpdateEdge = 4,
    DeleteEdge = 5,
    CreatePropertyIndex = 6,
    DropPropertyIndex = 7,

    // A group of graph mutations that must replay all-or-nothing.
    Batch = 8,

    // Raw key-value operations of a standalone LSM engine.
    Put = 9,
    Delete = 10,
}

impl TryFrom<u8> for OpType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OpType::CreateNode),
            1 => Ok(OpType::UpdateNode),
            2 => Ok(OpType::DeleteNode),
            3 => Ok(OpType::CreateEdge),
            4 => Ok(OpType::UpdateEdge),
            5 => Ok(OpType::DeleteEdge),
            6 => Ok(OpType::CreatePropertyIndex),
            7 => Ok(OpType::DropPropertyIndex),
            8 => Ok(OpType::Batch),
            9 => Ok(OpType::Put),
            10 => Ok(OpType::Delete),
            _ => Err(Error::WriteAheadLog {
                message: format!("Invalid op type: {}", value),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub lsn: u64,
    pub op_type: OpType,
    pub payload: Bytes,
    /// CRC32 of the op type and the payload bytes as stored on disk.
    pub checksum: u32,
    /// Milliseconds since the Unix epoch at append time.
    pub timestamp: u64,
}

impl WalEntry {
    /// Bytes this entry occupies on disk.
    pub fn encoded_len(&self) -> usize {
        ENTRY_PREFIX_SIZE + self.payload.len() + ENTRY_SUFFIX_SIZE
    }
}

/// CRC32 over `op_type + payload`.
pub fn entry_checksum(op_type: OpType, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[op_type as u8]);
    hasher.update(payload);
    hasher.finalize()
}

#[derive(Debug, Clone)]
pub struct WalConfig {
    pub max_file_size: u64,
    /// fsync after every append. Turning this off trades durability for throughput.
    pub sync_on_write: bool,
    pub buffer_size: usize,
    /// Live entries buffered per change-feed subscriber before it is dropped.
    pub subscriber_buffer: usize,
    /// Snappy-compress payloads in segments created from now on.
    pub compression: bool,
    /// Pause before a group commit leader syncs, so more followers join its fsync.
    pub group_commit_delay_us: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_file_size: 64 * 1024 * 1024, // 64MB
            sync_on_write: true,
            buffer_size: 64 * 1024, // 64KB
            subscriber_buffer: 1024,
            compression: false,
            group_commit_delay_us: 0,
        }
    }
}

/// Payload volume written since the log was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WalStats {
    pub entries: u64,
    /// Payload bytes handed to `append`.
    pub payload_bytes: u64,
    /// Payload bytes after compression, as written.
    pub stored_bytes: u64,
}

impl WalStats {
    /// `stored / payload`; 1.0 until something is written.
    pub fn compression_ratio(&self) -> f64 {
        if self.payload_bytes == 0 {
            return 1.0;
        }
        self.stored_bytes as f64 / self.payload_bytes as f64
    }
}
