//! K-way merge of sorted record runs.
//!
//! Each source yields `(key, record)` in strictly ascending key order. The merge
//! yields every distinct key once, carrying the record with the highest sequence
//! among the sources that hold it. Tombstones are passed through; callers decide
//! whether to drop them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;

use cluso_core::error::Result;

use crate::record::Record;

pub type RecordSource = Box<dyn Iterator<Item = Result<(Bytes, Record)>> + Send>;

struct HeapItem {
    key: Bytes,
    record: Record,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap: smallest key first, then highest sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then(self.record.sequence.cmp(&other.record.sequence))
            .then(other.source.cmp(&self.source))
    }
}

pub struct MergeIterator {
    sources: Vec<RecordSource>,
    heap: BinaryHeap<HeapItem>,
    primed: bool,
    done: bool,
}

impl MergeIterator {
    pub fn new(sources: Vec<RecordSource>) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            primed: false,
            done: false,
        }
    }

    fn pull(&mut self, source: usize) -> Result<()> {
        if let Some(item) = self.sources[source].next() {
            let (key, record) = item?;
            self.heap.push(HeapItem {
                key,
                record,
                source,
            });
        }
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<(Bytes, Record)>> {
        if !self.primed {
            self.primed = true;
            for source in 0..self.sources.len() {
                self.pull(source)?;
            }
        }

        let Some(winner) = self.heap.pop() else {
            return Ok(None);
        };
        self.pull(winner.source)?;

        // Older versions of the same key sit directly below the winner.
        while let Some(top) = self.heap.peek() {
            if top.key != winner.key {
                break;
            }
            let shadowed = self.heap.pop().map(|item| item.source);
            if let Some(source) = shadowed {
                self.pull(source)?;
            }
        }

        Ok(Some((winner.key, winner.record)))
    }
}

impl Iterator for MergeIterator {
    type Item = Result<(Bytes, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Wrap an in-memory run as a merge source.
pub fn vec_source(entries: Vec<(Bytes, Record)>) -> RecordSource {
    Box::new(entries.into_iter().map(Ok))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(entries: &[(&'static str, u64, Option<&'static str>)]) -> RecordSource {
        vec_source(
            entries
                .iter()
                .map(|(k, seq, v)| {
                    let record = match v {
                        Some(v) => Record::put(*seq, Bytes::from_static(v.as_bytes())),
                        None => Record::tombstone(*seq),
                    };
                    (Bytes::from_static(k.as_bytes()), record)
                })
                .collect(),
        )
    }

    #[test]
    fn test_highest_sequence_wins() {
        let old = run(&[("a", 1, Some("a1")), ("b", 2, Some("b1")), ("d", 3, Some("d1"))]);
        let new = run(&[("b", 10, Some("b2")), ("c", 11, None), ("d", 12, None)]);

        let merged: Vec<_> = MergeIterator::new(vec![old, new])
            .collect::<Result<Vec<_>>>()
            .unwrap();

        let keys: Vec<&[u8]> = merged.iter().map(|(k, _)| k.as_ref()).collect();
        assert_eq!(keys, vec![&b"a"[..], b"b", b"c", b"d"]);
        assert_eq!(merged[1].1.value.as_deref(), Some(&b"b2"[..]));
        assert!(merged[2].1.is_tombstone());
        assert!(merged[3].1.is_tombstone());
    }

    #[test]
    fn test_source_order_does_not_matter() {
        let a = run(&[("k", 5, Some("new"))]);
        let b = run(&[("k", 1, Some("old"))]);
        let merged: Vec<_> = MergeIterator::new(vec![b, a]).map(|r| r.unwrap()).collect();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].1.sequence, 5);
    }
}
