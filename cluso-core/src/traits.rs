//! # Core Traits
//!
//! Interfaces other subsystems program against.
//!
//! All operations are synchronous and may block the calling thread on disk I/O.
//! Callers that need non-blocking behavior dispatch these calls onto their own
//! bounded worker pool.

use bytes::Bytes;

use crate::Result;

/// Ordered key-value contract offered to query and algorithm layers.
pub trait KeyValueStore: Send + Sync {
    /// Insert or overwrite `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Newest visible value of `key`, `None` if absent or deleted.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Delete `key`. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Live pairs with `start <= key < end`, in key order.
    fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;

    /// Persist buffered writes.
    fn flush(&self) -> Result<()>;
}
