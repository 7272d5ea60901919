use serde::{Deserialize, Serialize};

use cluso_core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
    Zstd = 2,
}

impl TryFrom<u8> for CompressionType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Snappy),
            2 => Ok(CompressionType::Zstd),
            _ => Err(Error::corruption(
                "SSTable block",
                format!("invalid compression type {}", value),
            )),
        }
    }
}

const ZSTD_LEVEL: i32 = 3;

/// Compress a block. `None` returns the input unchanged.
pub fn compress_block(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::SSTable {
                message: format!("Snappy compression failed: {}", e),
            }),
        CompressionType::Zstd => zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| Error::SSTable {
            message: format!("Zstd compression failed: {}", e),
        }),
    }
}

/// Inverse of [`compress_block`]. Undecodable input is corruption.
pub fn decompress_block(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::corruption("SSTable block", format!("snappy: {}", e))),
        CompressionType::Zstd => zstd::decode_all(data)
            .map_err(|e| Error::corruption("SSTable block", format!("zstd: {}", e))),
    }
}
