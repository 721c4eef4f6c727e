//! Read path: point lookups.
//!
//! Lookups check the memtables first (active, then immutable, newest
//! first), then L0 tables (newest first, may overlap), then at most one
//! table per deeper level. Versions newer than the read sequence are
//! skipped. The first value or tombstone ends the search; merge operands
//! seen on the way are collected and applied to it, oldest first.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use cache::{CacheHandle, Ticker};
use config::{MergeOperator, ReadOptions};
use memtable::{ValueType, VersionedValue, MAX_SEQUENCE};

use crate::column_family::{ColumnFamilyData, SuperVersion};
use crate::error::{Error, Result};
use crate::slice::PinnableSlice;
use crate::version::{FileMetaData, Version};
use crate::DbInner;

enum LookupState {
    Pending,
    Found(Bytes),
    Deleted,
}

/// Accumulates versions of one key, newest first.
struct Lookup<'a> {
    key: &'a [u8],
    /// Newest first.
    operands: Vec<Bytes>,
    state: LookupState,
    pin: Option<CacheHandle>,
}

impl<'a> Lookup<'a> {
    fn new(key: &'a [u8]) -> Self {
        Self {
            key,
            operands: Vec::new(),
            state: LookupState::Pending,
            pin: None,
        }
    }

    /// Returns `true` once the search can stop.
    fn add(&mut self, v: VersionedValue) -> bool {
        match v.vtype {
            ValueType::Value => self.state = LookupState::Found(v.value),
            ValueType::Deletion => self.state = LookupState::Deleted,
            ValueType::Merge => self.operands.push(v.value),
        }
        self.is_done()
    }

    fn is_done(&self) -> bool {
        !matches!(self.state, LookupState::Pending)
    }

    fn finish(self, merge_operator: Option<&Arc<dyn MergeOperator>>) -> Result<Option<PinnableSlice>> {
        let base = match self.state {
            LookupState::Found(v) => Some(v),
            LookupState::Pending | LookupState::Deleted => None,
        };
        if self.operands.is_empty() {
            return Ok(base.map(|v| PinnableSlice::new(v, self.pin)));
        }

        let op = merge_operator.ok_or_else(|| {
            Error::InvalidArgument("merge operands found but no merge operator is set".to_string())
        })?;
        let operands: Vec<&[u8]> = self.operands.iter().rev().map(|b| &b[..]).collect();
        let merged = op
            .full_merge(self.key, base.as_deref(), &operands)
            .ok_or_else(|| Error::Corruption(format!("merge operator {} failed", op.name())))?;
        Ok(Some(PinnableSlice::new(Bytes::from(merged), None)))
    }
}

/// Whether `sv` still has the active memtable of `cf`.
fn is_current(sv: &SuperVersion, cf: &ColumnFamilyData) -> bool {
    Arc::ptr_eq(&sv.mem.mem, &cf.super_version().mem.mem)
}

/// Tables that may hold `key`, in search order.
fn candidate_files<'v>(version: &'v Version, key: &'v [u8]) -> impl Iterator<Item = &'v Arc<FileMetaData>> + 'v {
    let l0 = version.files(0).iter().filter(move |f| f.contains_user_key(key));
    let deeper = (1..version.num_levels()).filter_map(move |level| version.find_file(level, key));
    l0.chain(deeper)
}

impl DbInner {
    /// Sequence number a read with `ro` observes.
    pub(crate) fn read_sequence(&self, ro: &ReadOptions) -> u64 {
        ro.snapshot
            .unwrap_or_else(|| self.last_sequence())
            .min(MAX_SEQUENCE)
    }

    /// A super version of `cf` and the sequence a read with `ro` observes.
    ///
    /// Without a snapshot the sequence is read after the super version:
    /// versions it covers are then still in that view, whatever compaction
    /// installs later. The view is retaken if the active memtable changed in
    /// between, since writes the sequence covers may sit in the new one.
    pub(crate) fn read_view(&self, ro: &ReadOptions, cf: &ColumnFamilyData) -> (Arc<SuperVersion>, u64) {
        loop {
            let sv = cf.super_version();
            let seq = self.read_sequence(ro);
            if ro.snapshot.is_some() || is_current(&sv, cf) {
                return (sv, seq);
            }
        }
    }

    /// Looks up `key` in `cf`. With `pin`, a value read straight from a
    /// cached table block keeps that block pinned.
    pub(crate) fn get_impl(
        &self,
        ro: &ReadOptions,
        cf: &ColumnFamilyData,
        key: &[u8],
        pin: bool,
    ) -> Result<Option<PinnableSlice>> {
        let (sv, seq) = self.read_view(ro, cf);
        self.get_from(&sv, cf, ro, seq, key, pin)
    }

    pub(crate) fn get_from(
        &self,
        sv: &SuperVersion,
        cf: &ColumnFamilyData,
        ro: &ReadOptions,
        seq: u64,
        key: &[u8],
        pin: bool,
    ) -> Result<Option<PinnableSlice>> {
        let mut lookup = Lookup::new(key);
        for m in sv.memtables() {
            if m.mem.versions(key, seq).any(|v| lookup.add(v)) {
                break;
            }
        }

        if lookup.is_done() {
            self.record(Ticker::MemtableHit, 1);
        } else {
            self.record(Ticker::MemtableMiss, 1);
            Self::get_from_tables(&sv.version, ro, seq, key, pin, &mut lookup)?;
        }
        lookup.finish(cf.merge_operator())
    }

    fn get_from_tables(
        version: &Version,
        ro: &ReadOptions,
        seq: u64,
        key: &[u8],
        pin: bool,
        lookup: &mut Lookup<'_>,
    ) -> Result<()> {
        for file in candidate_files(version, key) {
            let (versions, handle) = if pin {
                file.table.get_pinned(key, seq, ro)?
            } else {
                (file.table.get(key, seq, ro)?, None)
            };
            for v in versions {
                if lookup.add(v) {
                    if lookup.operands.is_empty() {
                        lookup.pin = handle;
                    }
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Looks up every `(column family, key)` pair against one consistent
    /// view: a single read sequence and one super version per family.
    pub(crate) fn multi_get_impl(
        &self,
        ro: &ReadOptions,
        keys: &[(Arc<ColumnFamilyData>, Vec<u8>)],
    ) -> Vec<Result<Option<Vec<u8>>>> {
        let (views, seq) = loop {
            let mut views: HashMap<u32, Arc<SuperVersion>> = HashMap::new();
            for (cf, _) in keys {
                views.entry(cf.id).or_insert_with(|| cf.super_version());
            }
            let seq = self.read_sequence(ro);
            let stable = ro.snapshot.is_some()
                || keys
                    .iter()
                    .all(|(cf, _)| views.get(&cf.id).is_some_and(|sv| is_current(sv, cf)));
            if stable {
                break (views, seq);
            }
        };

        keys.iter()
            .map(|(cf, key)| {
                let sv = views
                    .get(&cf.id)
                    .ok_or_else(|| Error::InvalidArgument("column family vanished".to_string()))?;
                Ok(self
                    .get_from(sv, cf, ro, seq, key, false)?
                    .map(|v| v.to_vec()))
            })
            .collect()
    }

    /// State of the newest version of `key` at or below `seq`.
    pub(crate) fn latest_key_state(
        &self,
        cf: &ColumnFamilyData,
        key: &[u8],
        seq: u64,
    ) -> Result<KeyState> {
        Self::key_state_in(&cf.super_version(), key, seq)
    }

    pub(crate) fn key_state_in(sv: &SuperVersion, key: &[u8], seq: u64) -> Result<KeyState> {
        for m in sv.memtables() {
            if let Some(v) = m.mem.versions(key, seq).next() {
                return Ok(KeyState::of(&v));
            }
        }
        let ro = ReadOptions::default();
        for file in candidate_files(&sv.version, key) {
            if let Some(v) = file.table.get(key, seq, &ro)?.first() {
                return Ok(KeyState::of(v));
            }
        }
        Ok(KeyState::Absent)
    }
}

/// The newest version of one key as a transaction observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyState {
    Absent,
    Deleted(u64),
    Written(u64),
}

impl KeyState {
    fn of(v: &VersionedValue) -> Self {
        match v.vtype {
            ValueType::Deletion => KeyState::Deleted(v.seq),
            ValueType::Value | ValueType::Merge => KeyState::Written(v.seq),
        }
    }

    pub(crate) fn sequence(self) -> u64 {
        match self {
            KeyState::Absent => 0,
            KeyState::Deleted(seq) | KeyState::Written(seq) => seq,
        }
    }

    /// Whether the key is unchanged since `observed` was recorded. A
    /// tombstone with nothing beneath it may be collected by compaction,
    /// leaving the key absent.
    pub(crate) fn unchanged_since(self, observed: KeyState) -> bool {
        self == observed || matches!((observed, self), (KeyState::Deleted(_), KeyState::Absent))
    }
}
