use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use config::ReadOptions;
use parking_lot::Mutex;

/// Multiset of sequence numbers pinned by live snapshots.
#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    seqs: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotList {
    pub(crate) fn acquire(&self, seq: u64) {
        *self.seqs.lock().entry(seq).or_insert(0) += 1;
    }

    fn release(&self, seq: u64) {
        let mut seqs = self.seqs.lock();
        if let Some(n) = seqs.get_mut(&seq) {
            *n -= 1;
            if *n == 0 {
                seqs.remove(&seq);
            }
        }
    }

    /// Distinct pinned sequences, ascending.
    pub(crate) fn sequences(&self) -> Vec<u64> {
        self.seqs.lock().keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.seqs.lock().values().sum()
    }
}

/// A consistent read view at a fixed sequence number.
///
/// While a snapshot is alive compaction keeps every version it can observe.
/// Dropping it (or passing it to [`Db::release_snapshot`]) releases that
/// guarantee.
///
/// [`Db::release_snapshot`]: crate::Db::release_snapshot
pub struct Snapshot {
    seq: u64,
    list: Arc<SnapshotList>,
}

impl Snapshot {
    pub(crate) fn new(seq: u64, list: Arc<SnapshotList>) -> Self {
        list.acquire(seq);
        Self { seq, list }
    }

    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Default read options pinned to this snapshot.
    pub fn read_options(&self) -> ReadOptions {
        let mut ro = ReadOptions::default();
        ro.snapshot = Some(self.seq);
        ro
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.seq);
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("seq", &self.seq).finish()
    }
}
