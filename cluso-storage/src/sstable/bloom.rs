//! Bloom filter for SSTable point lookups.
//!
//! Sized from the exact key count of the table:
//! `m = -n ln p / (ln 2)^2` bits and `k = (m / n) ln 2` probes, with probe
//! positions derived by double hashing a single `xxh64` of the key.
//!
//! Serialized as `[bits][num_hashes u32 LE][num_bits u64 LE]`.

use byteorder::{ByteOrder, LittleEndian};
use xxhash_rust::xxh64::xxh64;

use cluso_core::error::{Error, Result};

const MIN_BITS: u64 = 64;
const MAX_HASHES: u32 = 30;
const METADATA_SIZE: usize = 12;

pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Filter for `expected_keys` keys at the given false positive rate.
    pub fn with_rate(expected_keys: usize, false_positive_rate: f64) -> Self {
        let (num_bits, num_hashes) = optimal_params(expected_keys, false_positive_rate);
        Self {
            bits: vec![0; num_bits.div_ceil(8) as usize],
            num_bits,
            num_hashes,
        }
    }

    /// Build from precomputed key hashes (see [`Self::hash_key`]).
    pub fn from_hashes(hashes: &[u64], false_positive_rate: f64) -> Self {
        let mut filter = Self::with_rate(hashes.len(), false_positive_rate);
        for &hash in hashes {
            filter.insert_hash(hash);
        }
        filter
    }

    #[inline]
    pub fn hash_key(key: &[u8]) -> u64 {
        xxh64(key, 0)
    }

    pub fn insert(&mut self, key: &[u8]) {
        self.insert_hash(Self::hash_key(key));
    }

    pub fn insert_hash(&mut self, hash: u64) {
        let (h1, h2) = split(hash);
        for i in 0..self.num_hashes as u64 {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// `false` means the key is definitely absent.
    #[inline]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = split(Self::hash_key(key));
        (0..self.num_hashes as u64).all(|i| {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.bits.len() + METADATA_SIZE);
        buf.extend_from_slice(&self.bits);
        let mut meta = [0u8; METADATA_SIZE];
        LittleEndian::write_u32(&mut meta[0..4], self.num_hashes);
        LittleEndian::write_u64(&mut meta[4..12], self.num_bits);
        buf.extend_from_slice(&meta);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < METADATA_SIZE {
            return Err(Error::corruption("bloom filter", "truncated metadata"));
        }
        let split_at = data.len() - METADATA_SIZE;
        let num_hashes = LittleEndian::read_u32(&data[split_at..split_at + 4]);
        let num_bits = LittleEndian::read_u64(&data[split_at + 4..]);

        if num_bits == 0 || num_bits.div_ceil(8) as usize != split_at {
            return Err(Error::corruption(
                "bloom filter",
                format!("{} bits do not fit {} bytes", num_bits, split_at),
            ));
        }
        if num_hashes == 0 || num_hashes > MAX_HASHES {
            return Err(Error::corruption(
                "bloom filter",
                format!("invalid probe count {}", num_hashes),
            ));
        }

        Ok(Self {
            bits: data[..split_at].to_vec(),
            num_bits,
            num_hashes,
        })
    }
}

#[inline]
fn split(hash: u64) -> (u64, u64) {
    // Odd second hash so probes never collapse onto one bit.
    (hash, hash.rotate_left(32) | 1)
}

fn optimal_params(expected_keys: usize, false_positive_rate: f64) -> (u64, u32) {
    let n = expected_keys.max(1) as f64;
    let p = false_positive_rate.clamp(1e-9, 0.5);
    let ln2 = std::f64::consts::LN_2;

    let m = (-n * p.ln() / (ln2 * ln2)).ceil() as u64;
    let num_bits = m.max(MIN_BITS);
    let k = ((num_bits as f64 / n) * ln2).round() as u32;
    (num_bits, k.clamp(1, MAX_HASHES))
}
