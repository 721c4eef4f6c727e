//! # Memtable - in-memory write buffer
//!
//! Every write lands in the active memtable of its column family as an
//! [`InternalKey`] `(user_key, seq, type)` mapped to the value bytes. Multiple
//! versions of a user key coexist; readers pick the newest version at or
//! below their sequence watermark.
//!
//! The map is a `crossbeam-skiplist` [`SkipMap`], so readers never block the
//! single writer and vice versa. Once a memtable is [frozen](Memtable::freeze)
//! it is immutable until flushed and dropped.

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

mod key;

pub use key::{
    compare_internal_keys, user_key_of, InternalKey, ParsedKey, ValueType, MAX_SEQUENCE,
    TRAILER_LEN,
};

/// Per-entry bookkeeping charged on top of key and value bytes.
const ENTRY_OVERHEAD: usize = 32;

/// One version of a user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub seq: u64,
    pub vtype: ValueType,
    pub value: Bytes,
}

#[derive(Debug)]
pub struct Memtable {
    map: SkipMap<InternalKey, Bytes>,
    approx_size: AtomicUsize,
    frozen: AtomicBool,
    /// 0 until the first insert.
    first_seq: AtomicU64,
    last_seq: AtomicU64,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            approx_size: AtomicUsize::new(0),
            frozen: AtomicBool::new(false),
            first_seq: AtomicU64::new(0),
            last_seq: AtomicU64::new(0),
        }
    }

    /// Inserts one version. Sequences are assigned by the caller and must be
    /// unique per user key.
    ///
    /// # Panics
    ///
    /// Panics if the memtable has been frozen.
    pub fn insert(&self, user_key: &[u8], value: &[u8], seq: u64, vtype: ValueType) {
        assert!(
            !self.frozen.load(Ordering::Acquire),
            "insert into frozen memtable"
        );
        let ikey = InternalKey::new(Bytes::copy_from_slice(user_key), seq, vtype);
        self.approx_size.fetch_add(
            user_key.len() + value.len() + ENTRY_OVERHEAD,
            Ordering::Relaxed,
        );
        self.map.insert(ikey, Bytes::copy_from_slice(value));

        let _ = self
            .first_seq
            .compare_exchange(0, seq, Ordering::AcqRel, Ordering::Acquire);
        self.last_seq.fetch_max(seq, Ordering::AcqRel);
    }

    pub fn put(&self, key: &[u8], value: &[u8], seq: u64) {
        self.insert(key, value, seq, ValueType::Value);
    }

    pub fn delete(&self, key: &[u8], seq: u64) {
        self.insert(key, &[], seq, ValueType::Deletion);
    }

    pub fn merge(&self, key: &[u8], operand: &[u8], seq: u64) {
        self.insert(key, operand, seq, ValueType::Merge);
    }

    /// Versions of `user_key` with `seq <= seq_bound`, newest first.
    pub fn versions<'a>(
        &'a self,
        user_key: &'a [u8],
        seq_bound: u64,
    ) -> impl Iterator<Item = VersionedValue> + 'a {
        let start = InternalKey::seek_key(user_key, seq_bound);
        self.map
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |e| e.key().user_key.as_ref() == user_key)
            .map(|e| VersionedValue {
                seq: e.key().seq,
                vtype: e.key().vtype,
                value: e.value().clone(),
            })
    }

    /// All visible versions of `user_key` at `seq_bound`, newest first.
    /// Empty when the key has no version in this memtable.
    pub fn get(&self, user_key: &[u8], seq_bound: u64) -> Vec<VersionedValue> {
        self.versions(user_key, seq_bound).collect()
    }

    /// Iterator over every entry in internal-key order. Holds the memtable
    /// alive for as long as it exists.
    pub fn iter(self: &Arc<Self>) -> MemtableIter {
        MemtableIter {
            mem: Arc::clone(self),
            next_from: Bound::Unbounded,
        }
    }

    /// Stops further inserts.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Number of versions stored (tombstones and merge operands included).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Bytes charged for keys, values and per-entry overhead.
    pub fn approximate_memory_usage(&self) -> usize {
        self.approx_size.load(Ordering::Relaxed)
    }

    pub fn first_seq(&self) -> Option<u64> {
        match self.first_seq.load(Ordering::Acquire) {
            0 => None,
            s => Some(s),
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    /// Smallest and largest user keys stored, if any.
    pub fn key_range(&self) -> Option<(Bytes, Bytes)> {
        let first = self.map.front()?.key().user_key.clone();
        let last = self.map.back()?.key().user_key.clone();
        Some((first, last))
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

/// Owning cursor over a memtable.
///
/// Each step re-seeks past the last yielded key, so the iterator does not
/// borrow the skiplist and sees entries inserted after it was created if
/// they sort after its position.
#[derive(Debug)]
pub struct MemtableIter {
    mem: Arc<Memtable>,
    next_from: Bound<InternalKey>,
}

impl MemtableIter {
    /// Positions the cursor so the next item is the first entry `>= target`.
    pub fn seek(&mut self, target: &InternalKey) {
        self.next_from = Bound::Included(target.clone());
    }

    pub fn seek_to_first(&mut self) {
        self.next_from = Bound::Unbounded;
    }
}

impl Iterator for MemtableIter {
    type Item = (InternalKey, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match &self.next_from {
            Bound::Unbounded => self.mem.map.front(),
            Bound::Included(k) => self.mem.map.lower_bound(Bound::Included(k)),
            Bound::Excluded(k) => self.mem.map.lower_bound(Bound::Excluded(k)),
        }?;
        let key = entry.key().clone();
        let value = entry.value().clone();
        self.next_from = Bound::Excluded(key.clone());
        Some((key, value))
    }
}

#[cfg(test)]
mod tests;
