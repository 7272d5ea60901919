//! Reusable scratch buffers for the edge list encode and decode paths.

use parking_lot::Mutex;

use cluso_core::error::Result;

use super::compression::CompressedEdgeList;

/// Pool of reusable vectors.
///
/// Buffers that grew past `max_capacity` are dropped on release, so one huge
/// adjacency list does not pin its memory in the pool forever.
pub struct BufferPool<T> {
    buffers: Mutex<Vec<Vec<T>>>,
    max_buffers: usize,
    max_capacity: usize,
}

impl<T> BufferPool<T> {
    pub fn new(max_buffers: usize, max_capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_buffers)),
            max_buffers,
            max_capacity,
        }
    }

    /// An empty buffer with room for at least `capacity` elements.
    pub fn acquire(&self, capacity: usize) -> Vec<T> {
        let mut buf = self.buffers.lock().pop().unwrap_or_default();
        buf.clear();
        buf.reserve(capacity);
        buf
    }

    pub fn release(&self, mut buffer: Vec<T>) {
        if buffer.capacity() > self.max_capacity {
            return;
        }
        buffer.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_buffers {
            buffers.push(buffer);
        }
    }

    /// Buffers currently waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.buffers.lock().len()
    }
}

/// Default ceilings: 64K ids (512KB) and 256KB of deltas.
const MAX_POOLED_IDS: usize = 64 * 1024;
const MAX_POOLED_BYTES: usize = 256 * 1024;
const MAX_POOLED_BUFFERS: usize = 32;

/// Encodes and edits edge lists using pooled scratch space.
pub struct EdgeCodec {
    ids: BufferPool<u64>,
    bytes: BufferPool<u8>,
}

impl Default for EdgeCodec {
    fn default() -> Self {
        Self::new(MAX_POOLED_BUFFERS, MAX_POOLED_IDS, MAX_POOLED_BYTES)
    }
}

impl EdgeCodec {
    pub fn new(max_buffers: usize, max_ids: usize, max_bytes: usize) -> Self {
        Self {
            ids: BufferPool::new(max_buffers, max_ids),
            bytes: BufferPool::new(max_buffers, max_bytes),
        }
    }

    pub fn compress(&self, ids: &[u64]) -> Result<CompressedEdgeList> {
        let mut sorted = self.ids.acquire(ids.len());
        let mut deltas = self.bytes.acquire(ids.len() * 2);
        let result = CompressedEdgeList::compress_with(ids, &mut sorted, &mut deltas);
        self.ids.release(sorted);
        self.bytes.release(deltas);
        result
    }

    /// Decode into a pooled buffer, edit it with `edit`, and re-encode.
    pub fn rewrite(
        &self,
        list: &CompressedEdgeList,
        edit: impl FnOnce(&mut Vec<u64>),
    ) -> Result<CompressedEdgeList> {
        let mut ids = self.ids.acquire(list.len() + 1);
        let mut deltas = self.bytes.acquire(list.size());

        let result = list.decompress_into(&mut ids).and_then(|()| {
            edit(&mut ids);
            CompressedEdgeList::from_sorted(&ids, &mut deltas)
        });

        self.ids.release(ids);
        self.bytes.release(deltas);
        result
    }

    /// Insert `id`, keeping the list sorted. Returns the list unchanged when
    /// `id` is already present.
    pub fn insert(&self, list: &CompressedEdgeList, id: u64) -> Result<CompressedEdgeList> {
        self.rewrite(list, |ids| {
            if let Err(pos) = ids.binary_search(&id) {
                ids.insert(pos, id);
            }
        })
    }

    pub fn remove(&self, list: &CompressedEdgeList, id: u64) -> Result<CompressedEdgeList> {
        self.rewrite(list, |ids| {
            if let Ok(pos) = ids.binary_search(&id) {
                ids.remove(pos);
            }
        })
    }

    pub fn pooled_buffers(&self) -> (usize, usize) {
        (self.ids.pooled(), self.bytes.pooled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_reuses_buffer() {
        let pool: BufferPool<u8> = BufferPool::new(4, 1024);
        let mut buf = pool.acquire(256);
        buf.extend_from_slice(b"hello");
        let cap = buf.capacity();
        pool.release(buf);

        let reused = pool.acquire(16);
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), cap);
    }

    #[test]
    fn test_oversized_buffers_are_dropped() {
        let pool: BufferPool<u64> = BufferPool::new(4, 128);
        pool.release(Vec::with_capacity(4096));
        assert_eq!(pool.pooled(), 0);

        pool.release(Vec::with_capacity(64));
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_pool_respects_max_buffers() {
        let pool: BufferPool<u8> = BufferPool::new(2, 1024);
        for _ in 0..5 {
            pool.release(Vec::with_capacity(8));
        }
        assert_eq!(pool.pooled(), 2);
    }

    #[test]
    fn test_codec_insert_and_remove() {
        let codec = EdgeCodec::default();
        let list = codec.compress(&[30, 10, 20]).unwrap();
        assert_eq!(list.decompress().unwrap(), vec![10, 20, 30]);

        let list = codec.insert(&list, 15).unwrap();
        let list = codec.insert(&list, 15).unwrap();
        assert_eq!(list.decompress().unwrap(), vec![10, 15, 20, 30]);

        let list = codec.remove(&list, 10).unwrap();
        assert_eq!(list.base_id(), 15);
        assert_eq!(list.decompress().unwrap(), vec![15, 20, 30]);

        let (ids, bytes) = codec.pooled_buffers();
        assert!(ids >= 1 && bytes >= 1);
    }
}
