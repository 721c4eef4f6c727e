//! K-way merge over sorted internal-key streams.
//!
//! Produces every record of every source in ascending internal-key order.
//! No versions are dropped here: callers (the database iterator, compaction)
//! decide which versions are visible or obsolete.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;
use memtable::InternalKey;

use crate::error::Result;

/// A boxed sorted source. Memtable iterators are adapted with `map(Ok)`.
pub type KvIter = Box<dyn Iterator<Item = Result<(InternalKey, Bytes)>> + Send>;

/// The current head of one source, ordered for a min-heap.
struct HeapEntry {
    key: InternalKey,
    value: Bytes,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first.
        // Equal keys pop from the lower-indexed (newer) source first.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Lazily merges `sources`, which must be listed newest first.
pub struct MergeIterator {
    sources: Vec<KvIter>,
    heap: BinaryHeap<HeapEntry>,
    failed: bool,
}

impl MergeIterator {
    /// Pulls the first record of each source. Fails if any source does.
    pub fn new(mut sources: Vec<KvIter>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, it) in sources.iter_mut().enumerate() {
            if let Some(entry) = it.next() {
                let (key, value) = entry?;
                heap.push(HeapEntry { key, value, source });
            }
        }
        Ok(Self {
            sources,
            heap,
            failed: false,
        })
    }

    /// Key that the next call to `next` will return.
    pub fn peek_key(&self) -> Option<&InternalKey> {
        self.heap.peek().map(|e| &e.key)
    }
}

impl Iterator for MergeIterator {
    type Item = Result<(InternalKey, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let top = self.heap.pop()?;
        match self.sources[top.source].next() {
            Some(Ok((key, value))) => self.heap.push(HeapEntry {
                key,
                value,
                source: top.source,
            }),
            Some(Err(e)) => {
                self.failed = true;
                self.heap.clear();
                return Some(Err(e));
            }
            None => {}
        }
        Some(Ok((top.key, top.value)))
    }
}
