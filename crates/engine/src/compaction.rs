//! Leveled compaction.
//!
//! Each level above the last has a target size. A level whose score (size
//! over target, or file count over trigger for L0) reaches 1.0 is compacted
//! into the next one: L0 compactions take every L0 file, deeper ones take
//! the oldest file of the level, and both add the overlapping files of the
//! output level. Inputs are merged through [`MergeIterator`] and filtered by
//! [`CompactionIterator`], which drops versions that no reader can see.
//!
//! Outputs are split at `target_file_size_base`, always between two user
//! keys, so files of one level never share a key. A single input with
//! nothing to merge against is moved by editing the version only.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use cache::{Statistics, Ticker};
use config::{ColumnFamilyOptions, MergeOperator, ReadOptions};
use memtable::{InternalKey, ValueType};
use sstable::{table_file_name, KvIter, MergeIterator, TableBuilder};
use tracing::{debug, info};

use crate::column_family::{ColumnFamilyData, SuperVersion};
use crate::error::{Error, Result};
use crate::scheduler::Job;
use crate::version::{FileMetaData, Version, VersionEdit};
use crate::DbInner;

/// Whether a user key may still have versions in levels the current job does
/// not read.
pub(crate) type KeyMayExistBelow = Box<dyn Fn(&[u8]) -> bool + Send>;

/// Filters a merged, sorted stream down to the versions that must survive.
///
/// Versions are grouped per user key into snapshot stripes: two versions
/// share a stripe when no live snapshot falls between their sequence
/// numbers. Within a stripe only the newest value or tombstone matters, and
/// merge operands are folded into their base when the base is known. A
/// tombstone in the oldest stripe is dropped together with everything under
/// it once no deeper level can hold the key.
pub(crate) struct CompactionIterator {
    input: MergeIterator,
    /// Ascending.
    snapshots: Vec<u64>,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    key_may_exist_below: KeyMayExistBelow,
    stats: Option<Arc<Statistics>>,
    pending: VecDeque<(InternalKey, Bytes)>,
    dropped: u64,
    failed: bool,
}

impl CompactionIterator {
    pub(crate) fn new(
        input: MergeIterator,
        snapshots: Vec<u64>,
        merge_operator: Option<Arc<dyn MergeOperator>>,
        key_may_exist_below: KeyMayExistBelow,
        stats: Option<Arc<Statistics>>,
    ) -> Self {
        Self {
            input,
            snapshots,
            merge_operator,
            key_may_exist_below,
            stats,
            pending: VecDeque::new(),
            dropped: 0,
            failed: false,
        }
    }

    /// Versions dropped so far.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Number of snapshots older than `seq`. Versions with the same stripe
    /// are indistinguishable to every reader.
    fn stripe(&self, seq: u64) -> usize {
        self.snapshots.partition_point(|&s| s < seq)
    }

    fn drop_versions(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.dropped += n as u64;
        if let Some(stats) = &self.stats {
            stats.record(Ticker::CompactionKeyDropObsolete, n as u64);
        }
    }

    /// Decides the fate of every version of one user key (newest first).
    fn process_key(&mut self, mut versions: Vec<(InternalKey, Bytes)>) -> Result<()> {
        let before = versions.len();
        versions.dedup_by(|later, earlier| later.0.seq == earlier.0.seq);
        self.drop_versions(before - versions.len());

        let n = versions.len();
        let mut i = 0;
        while i < n {
            let stripe = self.stripe(versions[i].0.seq);
            let stripe_end = i + versions[i..]
                .iter()
                .take_while(|(k, _)| self.stripe(k.seq) == stripe)
                .count();

            match versions[i].0.vtype {
                ValueType::Value => {
                    self.pending.push_back(versions[i].clone());
                    self.drop_versions(stripe_end - i - 1);
                    i = stripe_end;
                }
                ValueType::Deletion => {
                    if stripe == 0 && !(self.key_may_exist_below)(&versions[i].0.user_key) {
                        self.drop_versions(n - i);
                        return Ok(());
                    }
                    self.pending.push_back(versions[i].clone());
                    self.drop_versions(stripe_end - i - 1);
                    i = stripe_end;
                }
                ValueType::Merge => {
                    let mut j = i;
                    while j < stripe_end && versions[j].0.vtype == ValueType::Merge {
                        j += 1;
                    }
                    i = self.process_merge_chain(&versions, i, j, stripe_end)?;
                }
            }
        }
        Ok(())
    }

    /// Handles operands `versions[i..j]` of one stripe ending at
    /// `stripe_end`. Returns where processing continues.
    fn process_merge_chain(
        &mut self,
        versions: &[(InternalKey, Bytes)],
        i: usize,
        j: usize,
        stripe_end: usize,
    ) -> Result<usize> {
        let n = versions.len();
        let user_key = versions[i].0.user_key.clone();
        let has_base = j < stripe_end;
        let chain_is_complete =
            has_base || (j == n && !(self.key_may_exist_below)(&user_key));

        let op = match &self.merge_operator {
            Some(op) if chain_is_complete => Arc::clone(op),
            _ => {
                self.pending.extend(versions[i..j].iter().cloned());
                if has_base {
                    self.pending.push_back(versions[j].clone());
                    self.drop_versions(stripe_end - j - 1);
                    return Ok(stripe_end);
                }
                return Ok(j);
            }
        };

        let base = match versions.get(j) {
            Some((k, v)) if has_base && k.vtype == ValueType::Value => Some(&v[..]),
            _ => None,
        };
        let operands: Vec<&[u8]> = versions[i..j].iter().rev().map(|(_, v)| &v[..]).collect();
        let merged = op.full_merge(&user_key, base, &operands).ok_or_else(|| {
            Error::Corruption(format!(
                "merge operator {} failed during compaction",
                op.name()
            ))
        })?;
        self.pending.push_back((
            InternalKey::new(user_key, versions[i].0.seq, ValueType::Value),
            Bytes::from(merged),
        ));
        let end = if has_base { stripe_end } else { n };
        self.drop_versions(end - i - 1);
        Ok(end)
    }

    fn next_key(&mut self) -> Result<bool> {
        let first = match self.input.next() {
            Some(entry) => entry?,
            None => return Ok(false),
        };
        let mut versions = vec![first];
        while self
            .input
            .peek_key()
            .is_some_and(|k| k.user_key == versions[0].0.user_key)
        {
            match self.input.next() {
                Some(entry) => versions.push(entry?),
                None => break,
            }
        }
        self.process_key(versions)?;
        Ok(true)
    }
}

impl Iterator for CompactionIterator {
    type Item = Result<(InternalKey, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Some(Ok(entry));
            }
            if self.failed {
                return None;
            }
            match self.next_key() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// One unit of compaction work chosen from a version.
#[derive(Debug)]
pub(crate) struct CompactionPlan {
    pub level: usize,
    pub output_level: usize,
    pub inputs: Vec<Arc<FileMetaData>>,
    /// Files of `output_level` overlapping the inputs.
    pub overlaps: Vec<Arc<FileMetaData>>,
}

impl CompactionPlan {
    fn for_files(version: &Version, level: usize, inputs: Vec<Arc<FileMetaData>>) -> Self {
        let overlaps = match key_range(&inputs) {
            Some((lo, hi)) => version.overlapping(level + 1, &lo, &hi),
            None => Vec::new(),
        };
        Self {
            level,
            output_level: level + 1,
            inputs,
            overlaps,
        }
    }

    pub(crate) fn is_trivial_move(&self) -> bool {
        self.inputs.len() == 1 && self.overlaps.is_empty()
    }

    fn input_bytes(&self) -> u64 {
        self.inputs.iter().chain(&self.overlaps).map(|f| f.size).sum()
    }
}

/// Smallest and largest user key over `files`.
fn key_range(files: &[Arc<FileMetaData>]) -> Option<(Bytes, Bytes)> {
    let lo = files.iter().map(|f| &f.smallest.user_key).min()?;
    let hi = files.iter().map(|f| &f.largest.user_key).max()?;
    Some((lo.clone(), hi.clone()))
}

/// Compaction score per level, last level excluded.
pub(crate) fn level_scores(version: &Version, opts: &ColumnFamilyOptions) -> Vec<(usize, f64)> {
    let last = version.num_levels() - 1;
    let mut scores = Vec::with_capacity(last);
    let by_count =
        version.num_files(0) as f64 / opts.level0_file_num_compaction_trigger.max(1) as f64;
    let by_size = version.level_bytes(0) as f64 / opts.max_bytes_for_level(1).max(1) as f64;
    scores.push((0, by_count.max(by_size)));
    for level in 1..last {
        let target = opts.max_bytes_for_level(level).max(1) as f64;
        scores.push((level, version.level_bytes(level) as f64 / target));
    }
    scores
}

/// Picks the level with the highest score of at least 1.0, preferring the
/// shallower level on ties.
pub(crate) fn pick_compaction(version: &Version, opts: &ColumnFamilyOptions) -> Option<CompactionPlan> {
    let mut best: Option<(usize, f64)> = None;
    for (level, score) in level_scores(version, opts) {
        if score >= 1.0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((level, score));
        }
    }
    let (level, _) = best?;

    let inputs = if level == 0 {
        version.files(0).to_vec()
    } else {
        let oldest = version.files(level).iter().min_by_key(|f| f.number)?;
        vec![Arc::clone(oldest)]
    };
    Some(CompactionPlan::for_files(version, level, inputs))
}

pub(crate) fn needs_compaction(version: &Version, opts: &ColumnFamilyOptions) -> bool {
    level_scores(version, opts).iter().any(|&(_, s)| s >= 1.0)
}

impl DbInner {
    pub(crate) fn maybe_schedule_compaction(&self, cf: &ColumnFamilyData) {
        if cf.options.disable_auto_compactions || cf.is_dropped() {
            return;
        }
        if needs_compaction(&cf.super_version().version, &cf.options) {
            self.scheduler.schedule(Job::Compaction(cf.id));
        }
    }

    /// Body of a background compaction job: runs at most one compaction and
    /// schedules another if more work remains.
    pub(crate) fn background_compaction(&self, cf_id: u32) -> Result<()> {
        let cf = match self.cf_by_id(cf_id) {
            Some(cf) if !cf.is_dropped() => cf,
            _ => return Ok(()),
        };
        if cf.options.disable_auto_compactions {
            return Ok(());
        }

        let _guard = cf.compaction_lock.lock();
        let version = Arc::clone(&cf.super_version().version);
        let plan = match pick_compaction(&version, &cf.options) {
            Some(plan) => plan,
            None => return Ok(()),
        };
        self.run_compaction(&cf, &plan, &version)?;
        self.notify_stall();
        self.maybe_schedule_compaction(&cf);
        Ok(())
    }

    /// Compacts every level of `cf` into the next, top down, after flushing
    /// the memtables. All data ends up in the last level.
    pub(crate) fn compact_range(&self, cf: &Arc<ColumnFamilyData>) -> Result<()> {
        self.flush_cf(cf)?;

        let _guard = cf.compaction_lock.lock();
        let start = Instant::now();
        let num_levels = cf.super_version().version.num_levels();
        for level in 0..num_levels - 1 {
            let version = Arc::clone(&cf.super_version().version);
            let inputs = version.files(level).to_vec();
            if inputs.is_empty() {
                continue;
            }
            let plan = CompactionPlan::for_files(&version, level, inputs);
            self.run_compaction(cf, &plan, &version)?;
        }
        self.notify_stall();
        info!(
            cf = %cf.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "manual compaction finished"
        );
        Ok(())
    }

    /// Executes `plan`, picked from `version`, and installs the result.
    /// Callers hold the column family's compaction lock.
    pub(crate) fn run_compaction(
        &self,
        cf: &ColumnFamilyData,
        plan: &CompactionPlan,
        version: &Arc<Version>,
    ) -> Result<()> {
        let start = Instant::now();
        let mut edit = VersionEdit::default();
        for f in &plan.inputs {
            edit.deleted.push((plan.level, f.number));
        }
        for f in &plan.overlaps {
            edit.deleted.push((plan.output_level, f.number));
        }

        if plan.is_trivial_move() {
            let file = &plan.inputs[0];
            edit.added.push((plan.output_level, Arc::clone(file)));
            self.install_compaction(cf, &edit, &[])?;
            debug!(
                cf = %cf.name,
                file = file.number,
                from = plan.level,
                to = plan.output_level,
                "moved table"
            );
            return Ok(());
        }

        let mut ro = ReadOptions::default();
        ro.set_fill_cache(false);
        let mut sources: Vec<KvIter> = Vec::with_capacity(plan.inputs.len() + plan.overlaps.len());
        for f in plan.inputs.iter().chain(&plan.overlaps) {
            sources.push(Box::new(f.table.iter(&ro)?));
        }

        let below = Arc::clone(version);
        let output_level = plan.output_level;
        let mut input = CompactionIterator::new(
            MergeIterator::new(sources)?,
            self.snapshots.sequences(),
            cf.merge_operator().cloned(),
            Box::new(move |key: &[u8]| below.key_may_exist_below(output_level, key)),
            self.options.statistics.clone(),
        );
        let outputs =
            self.write_tables(cf, input.by_ref(), Some(cf.options.target_file_size_base))?;
        let dropped = input.dropped();
        for f in &outputs {
            edit.added.push((plan.output_level, Arc::clone(f)));
        }
        let obsolete: Vec<Arc<FileMetaData>> =
            plan.inputs.iter().chain(&plan.overlaps).cloned().collect();
        self.install_compaction(cf, &edit, &obsolete)?;

        info!(
            cf = %cf.name,
            level = plan.level,
            output_level = plan.output_level,
            inputs = plan.inputs.len() + plan.overlaps.len(),
            input_bytes = plan.input_bytes(),
            outputs = outputs.len(),
            output_bytes = outputs.iter().map(|f| f.size).sum::<u64>(),
            dropped,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "compaction finished"
        );
        Ok(())
    }

    /// Applies `edit`, persists the manifest and then marks `obsolete` for
    /// deletion.
    fn install_compaction(
        &self,
        cf: &ColumnFamilyData,
        edit: &VersionEdit,
        obsolete: &[Arc<FileMetaData>],
    ) -> Result<()> {
        let _manifest = self.manifest_lock.lock();
        cf.update(|cur| {
            Ok(SuperVersion {
                mem: cur.mem.clone(),
                imm: cur.imm.clone(),
                version: Arc::new(cur.version.apply(edit)?),
            })
        })?;
        self.save_manifest()?;
        for f in obsolete {
            f.mark_obsolete();
        }
        Ok(())
    }

    /// Streams `input` into new tables of `cf`, starting a new table once
    /// the current one reaches `target_size` and the user key changes.
    pub(crate) fn write_tables<I>(
        &self,
        cf: &ColumnFamilyData,
        input: I,
        target_size: Option<u64>,
    ) -> Result<Vec<Arc<FileMetaData>>>
    where
        I: Iterator<Item = Result<(InternalKey, Bytes)>>,
    {
        let mut outputs = Vec::new();
        match self.write_tables_into(cf, input, target_size, &mut outputs) {
            Ok(()) => Ok(outputs),
            Err(e) => {
                // finished outputs are not referenced by any version yet
                for f in &outputs {
                    f.mark_obsolete();
                }
                Err(e)
            }
        }
    }

    fn write_tables_into<I>(
        &self,
        cf: &ColumnFamilyData,
        input: I,
        target_size: Option<u64>,
        outputs: &mut Vec<Arc<FileMetaData>>,
    ) -> Result<()>
    where
        I: Iterator<Item = Result<(InternalKey, Bytes)>>,
    {
        let mut current: Option<(u64, TableBuilder)> = None;
        let mut last_user_key: Option<Bytes> = None;

        for entry in input {
            let (key, value) = entry?;
            let boundary = last_user_key.as_ref() != Some(&key.user_key);
            let split = match (&current, target_size) {
                (Some((_, builder)), Some(target)) => {
                    boundary && builder.estimated_file_size() >= target
                }
                _ => false,
            };
            if split {
                if let Some((number, builder)) = current.take() {
                    outputs.push(self.finish_table(cf, number, builder)?);
                }
            }

            if current.is_none() {
                let number = self.new_file_number();
                let builder = TableBuilder::create(
                    self.path.join(table_file_name(number)),
                    cf.builder_options.clone(),
                )?;
                current = Some((number, builder));
            }
            if let Some((_, builder)) = current.as_mut() {
                builder.add(&key, &value)?;
            }
            if boundary {
                last_user_key = Some(key.user_key);
            }
        }

        if let Some((number, builder)) = current.take() {
            outputs.push(self.finish_table(cf, number, builder)?);
        }
        Ok(())
    }

    fn finish_table(
        &self,
        cf: &ColumnFamilyData,
        number: u64,
        mut builder: TableBuilder,
    ) -> Result<Arc<FileMetaData>> {
        builder.finish()?;
        match cf.open_table(builder.path(), number) {
            Ok(file) => Ok(file),
            Err(e) => {
                let _ = std::fs::remove_file(builder.path());
                Err(e)
            }
        }
    }
}
