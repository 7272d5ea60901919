//! Delta + varint encoded adjacency lists.
//!
//! A list of IDs is sorted, the first ID is kept as `base_id` and every later ID
//! is stored as the unsigned LEB128 varint of its distance from the previous
//! one. Clustered IDs (the common case for adjacency) cost one or two bytes each
//! instead of eight.
//!
//! Binary layout, little endian:
//!
//! ```text
//! ┌────────────┬───────────┬────────────────┬──────────────────────┐
//! │ base_id u64│ count u32 │ deltas_len u32 │ deltas (varints)     │
//! └────────────┴───────────┴────────────────┴──────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use byteorder::{ByteOrder, LittleEndian};

use cluso_core::error::{Error, Result};

/// Fixed part of the binary layout; also the minimum valid length.
pub const HEADER_SIZE: usize = 16;

/// Longest varint encoding of a u64.
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressedEdgeList {
    base_id: u64,
    count: u32,
    deltas: Bytes,
}

impl CompressedEdgeList {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Encode `ids` in ascending order. Duplicates are kept as zero deltas.
    pub fn compress(ids: &[u64]) -> Result<Self> {
        let mut sorted = Vec::with_capacity(ids.len());
        let mut deltas = Vec::new();
        Self::compress_with(ids, &mut sorted, &mut deltas)
    }

    /// Like [`Self::compress`], using caller-provided scratch buffers.
    pub(crate) fn compress_with(
        ids: &[u64],
        sorted: &mut Vec<u64>,
        deltas: &mut Vec<u8>,
    ) -> Result<Self> {
        sorted.clear();
        sorted.extend_from_slice(ids);
        sorted.sort_unstable();
        Self::from_sorted(sorted, deltas)
    }

    /// `sorted` must be ascending.
    pub(crate) fn from_sorted(sorted: &[u64], deltas: &mut Vec<u8>) -> Result<Self> {
        let count = u32::try_from(sorted.len()).map_err(|_| Error::CapacityExceeded {
            resource: format!("edge list of {} entries", sorted.len()),
        })?;
        let Some(&base_id) = sorted.first() else {
            return Ok(Self::empty());
        };

        deltas.clear();
        for pair in sorted.windows(2) {
            let delta = pair[1].checked_sub(pair[0]).ok_or_else(|| Error::Internal {
                message: format!("edge ids out of order: {} after {}", pair[1], pair[0]),
            })?;
            encode_varint(delta, deltas);
        }

        Ok(Self {
            base_id,
            count,
            deltas: Bytes::copy_from_slice(deltas),
        })
    }

    pub fn decompress(&self) -> Result<Vec<u64>> {
        let mut out = Vec::with_capacity(self.len());
        self.decompress_into(&mut out)?;
        Ok(out)
    }

    /// Append the decoded IDs to `out`.
    pub fn decompress_into(&self, out: &mut Vec<u64>) -> Result<()> {
        out.reserve(self.len());
        for id in self.iter() {
            out.push(id?);
        }
        Ok(())
    }

    /// Lazily decode the IDs in ascending order.
    pub fn iter(&self) -> EdgeIdIter<'_> {
        EdgeIdIter {
            list: self,
            offset: 0,
            emitted: 0,
            current: self.base_id,
        }
    }

    pub fn contains(&self, id: u64) -> Result<bool> {
        if self.count == 0 || id < self.base_id {
            return Ok(false);
        }
        for candidate in self.iter() {
            let candidate = candidate?;
            if candidate >= id {
                return Ok(candidate == id);
            }
        }
        Ok(false)
    }

    /// A new list with `id` inserted in order.
    pub fn add(&self, id: u64) -> Result<Self> {
        let mut ids = self.decompress()?;
        let pos = ids.partition_point(|&x| x < id);
        ids.insert(pos, id);
        Self::from_sorted(&ids, &mut Vec::with_capacity(self.deltas.len() + MAX_VARINT_LEN))
    }

    /// A new list without one occurrence of `id`. Unchanged if absent.
    pub fn remove(&self, id: u64) -> Result<Self> {
        let mut ids = self.decompress()?;
        match ids.binary_search(&id) {
            Ok(pos) => {
                ids.remove(pos);
                Self::from_sorted(&ids, &mut Vec::with_capacity(self.deltas.len()))
            }
            Err(_) => Ok(self.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn base_id(&self) -> u64 {
        self.base_id
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.deltas.len()
    }

    /// Size of the same IDs as a plain `u64` array.
    pub fn uncompressed_size(&self) -> usize {
        self.len() * std::mem::size_of::<u64>()
    }

    pub fn compression_ratio(&self) -> f64 {
        self.uncompressed_size() as f64 / self.size() as f64
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u64_le(self.base_id);
        buf.put_u32_le(self.count);
        buf.put_u32_le(self.deltas.len() as u32);
        buf.put_slice(&self.deltas);
        buf.freeze()
    }

    /// Parse and fully validate an encoded list.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(corrupt(format!(
                "{} bytes is shorter than the {}-byte header",
                data.len(),
                HEADER_SIZE
            )));
        }
        let base_id = LittleEndian::read_u64(&data[0..8]);
        let count = LittleEndian::read_u32(&data[8..12]);
        let deltas_len = LittleEndian::read_u32(&data[12..16]) as usize;
        let body = &data[HEADER_SIZE..];
        if body.len() != deltas_len {
            return Err(corrupt(format!(
                "deltas length {} but {} bytes follow the header",
                deltas_len,
                body.len()
            )));
        }
        if count == 0 && (deltas_len != 0 || base_id != 0) {
            return Err(corrupt("empty list carries data".to_string()));
        }

        let list = Self {
            base_id,
            count,
            deltas: Bytes::copy_from_slice(body),
        };
        // Walk every delta so count, truncation and overflow are caught here.
        for id in list.iter() {
            id?;
        }
        Ok(list)
    }
}

pub struct EdgeIdIter<'a> {
    list: &'a CompressedEdgeList,
    offset: usize,
    emitted: u32,
    current: u64,
}

impl EdgeIdIter<'_> {
    fn step(&mut self) -> Result<Option<u64>> {
        if self.emitted == self.list.count {
            if self.offset != self.list.deltas.len() {
                return Err(corrupt(format!(
                    "{} trailing delta bytes after {} ids",
                    self.list.deltas.len() - self.offset,
                    self.list.count
                )));
            }
            return Ok(None);
        }
        if self.emitted > 0 {
            let delta = decode_varint(&self.list.deltas, &mut self.offset)?;
            self.current = self.current.checked_add(delta).ok_or_else(|| {
                corrupt(format!("delta {} overflows after id {}", delta, self.current))
            })?;
        }
        self.emitted += 1;
        Ok(Some(self.current))
    }
}

impl Iterator for EdgeIdIter<'_> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(id)) => Some(Ok(id)),
            Ok(None) => None,
            Err(e) => {
                // Poison the iterator so it ends after reporting.
                self.emitted = self.list.count;
                self.offset = self.list.deltas.len();
                Some(Err(e))
            }
        }
    }
}

fn corrupt(details: String) -> Error {
    Error::corruption("compressed edge list", details)
}

/// Unsigned LEB128.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn decode_varint(src: &[u8], offset: &mut usize) -> Result<u64> {
    let mut result = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let byte = *src
            .get(*offset)
            .ok_or_else(|| corrupt(format!("varint truncated at byte {}", i)))?;
        *offset += 1;
        let payload = u64::from(byte & 0x7f);
        if i == MAX_VARINT_LEN - 1 && payload > 1 {
            return Err(corrupt("varint exceeds 64 bits".to_string()));
        }
        result |= payload << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(corrupt("varint longer than 10 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        for value in [0, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            let mut offset = 0;
            assert_eq!(decode_varint(&buf, &mut offset).unwrap(), value);
            assert_eq!(offset, buf.len());
        }

        let mut buf = Vec::new();
        encode_varint(u64::MAX, &mut buf);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_varint_rejects_truncation_and_overflow() {
        let mut offset = 0;
        assert!(decode_varint(&[0x80, 0x80], &mut offset).is_err());

        let too_big = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02];
        let mut offset = 0;
        assert!(decode_varint(&too_big, &mut offset).is_err());
    }

    #[test]
    fn test_clustered_ids_compress_well() {
        let ids: Vec<u64> = (1_000_000..1_001_000).collect();
        let list = CompressedEdgeList::compress(&ids).unwrap();
        assert_eq!(list.len(), 1000);
        assert_eq!(list.size(), HEADER_SIZE + 999);
        assert!(list.compression_ratio() > 7.0);
        assert_eq!(list.decompress().unwrap(), ids);
    }

    #[test]
    fn test_overflowing_delta_is_corruption() {
        let mut deltas = Vec::new();
        encode_varint(10, &mut deltas);
        let list = CompressedEdgeList {
            base_id: u64::MAX - 5,
            count: 2,
            deltas: Bytes::from(deltas),
        };
        assert!(list.decompress().is_err());
        assert!(CompressedEdgeList::from_bytes(&list.to_bytes()).is_err());
    }
}
