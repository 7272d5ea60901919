//! Versioned value stored by the LSM engine.
//!
//! Every write carries a sequence number; a missing value is a tombstone. On disk
//! a record is `[sequence u64 LE][flag u8][value bytes]` inside an SSTable value slot.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

use cluso_core::error::{Error, Result};

const FLAG_VALUE: u8 = 0;
const FLAG_TOMBSTONE: u8 = 1;

/// Encoded size of a record without its value bytes.
pub const RECORD_OVERHEAD: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub sequence: u64,
    /// `None` marks a deletion.
    pub value: Option<Bytes>,
}

impl Record {
    pub fn put(sequence: u64, value: Bytes) -> Self {
        Self {
            sequence,
            value: Some(value),
        }
    }

    pub fn tombstone(sequence: u64) -> Self {
        Self {
            sequence,
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn encoded_len(&self) -> usize {
        RECORD_OVERHEAD + self.value.as_ref().map_or(0, Bytes::len)
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.sequence);
        match &self.value {
            Some(value) => {
                buf.put_u8(FLAG_VALUE);
                buf.put_slice(value);
            }
            None => buf.put_u8(FLAG_TOMBSTONE),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode from a slot of a shared block buffer without copying the value.
    pub fn decode(data: &Bytes) -> Result<Self> {
        if data.len() < RECORD_OVERHEAD {
            return Err(Error::corruption(
                "SSTable record",
                format!("{} bytes is shorter than the record header", data.len()),
            ));
        }
        let sequence = LittleEndian::read_u64(&data[..8]);
        match data[8] {
            FLAG_VALUE => Ok(Self::put(sequence, data.slice(RECORD_OVERHEAD..))),
            FLAG_TOMBSTONE => Ok(Self::tombstone(sequence)),
            flag => Err(Error::corruption(
                "SSTable record",
                format!("unknown record flag {}", flag),
            )),
        }
    }
}
