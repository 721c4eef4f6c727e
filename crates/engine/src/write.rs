//! Write path: batches, write stalls, memtable switches and flushes.
//!
//! Every mutation flows through [`DbInner::write_impl`]. Under the write
//! mutex the batch is appended to the WAL as one record, applied to the
//! memtables of the column families it touches and then published by
//! advancing the last sequence number. Readers never take the write mutex.
//!
//! A memtable that reaches `write_buffer_size` is frozen, moved to the
//! immutable list and handed to the background pool for flushing. Flushing
//! writes every immutable memtable of a column family into one new L0 table.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cache::Ticker;
use config::WriteOptions;
use memtable::{Memtable, MAX_SEQUENCE};
use sstable::{KvIter, MergeIterator};
use tracing::{debug, error, info, warn};
use wal::{segment_file_name, BatchOp, WalError, WalRecord, WalWriter};

use crate::batch::WriteBatch;
use crate::column_family::{ColumnFamilyData, MemtableHandle, SuperVersion};
use crate::compaction::CompactionIterator;
use crate::error::{Error, Result};
use crate::scheduler::Job;
use crate::version::{FileMetaData, VersionEdit};
use crate::{DbInner, WriteState, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Longest single wait of a stalled writer before it re-checks.
const STALL_SLICE: Duration = Duration::from_millis(100);
/// Delay applied once per write while L0 is above the slowdown trigger.
const SLOWDOWN_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StallCondition {
    Normal,
    Delayed,
    Stopped,
}

/// Checked against the current state while the write mutex is held, right
/// before the batch is logged.
pub(crate) type WriteValidator<'a> = &'a dyn Fn(&DbInner) -> Result<()>;

impl DbInner {
    /// Applies `batch` atomically and returns the sequence number of its last
    /// operation.
    ///
    /// `validate` runs under the write mutex; if it fails nothing is written.
    pub(crate) fn write_impl(
        &self,
        opts: &WriteOptions,
        batch: WriteBatch,
        validate: Option<WriteValidator<'_>>,
    ) -> Result<u64> {
        let cfs = self.batch_column_families(&batch)?;
        if !batch.is_empty() {
            self.make_room_for_write(opts, &cfs)?;
        }

        let mut state = self.write.lock();
        if let Some(reason) = &state.wal_failure {
            return Err(Error::Io(std::io::Error::other(format!(
                "writes are disabled after a WAL failure: {reason}"
            ))));
        }
        if let Some(check) = validate {
            check(self)?;
        }
        if batch.is_empty() {
            return Ok(self.last_sequence());
        }
        if let Some(cf) = cfs.iter().find(|cf| cf.is_dropped()) {
            return Err(Error::InvalidArgument(format!(
                "column family {} was dropped",
                cf.name
            )));
        }

        let first = self.last_sequence() + 1;
        let last = first + batch.len() as u64 - 1;
        if last > MAX_SEQUENCE {
            return Err(Error::InvalidArgument(
                "sequence number space exhausted".to_string(),
            ));
        }

        let record = WalRecord::new(first, batch.into_ops());
        if !opts.disable_wal {
            Self::log_record(&mut state, &record, opts.sync)?;
        }

        let mems: HashMap<u32, Arc<Memtable>> = cfs
            .iter()
            .map(|cf| (cf.id, Arc::clone(&cf.super_version().mem.mem)))
            .collect();
        for (i, op) in record.ops.iter().enumerate() {
            let seq = first + i as u64;
            let mem = mems.get(&op.cf()).ok_or_else(|| {
                Error::InvalidArgument(format!("unknown column family id {}", op.cf()))
            })?;
            match op {
                BatchOp::Put { key, value, .. } => mem.put(key, value, seq),
                BatchOp::Delete { key, .. } => mem.delete(key, seq),
                BatchOp::Merge { key, value, .. } => mem.merge(key, value, seq),
            }
        }
        self.last_sequence
            .store(last, std::sync::atomic::Ordering::Release);

        let mut rotated = Vec::new();
        for cf in &cfs {
            let usage = cf.super_version().mem.mem.approximate_memory_usage();
            if usage >= cf.options.write_buffer_size {
                // the batch is already durable and visible; a failed switch
                // only delays the flush
                match self.switch_memtable(&mut state, cf) {
                    Ok(()) => rotated.push(cf.id),
                    Err(e) => warn!(cf = %cf.name, error = %e, "memtable switch failed"),
                }
            }
        }
        drop(state);

        for id in rotated {
            self.scheduler.schedule(Job::Flush(id));
        }
        Ok(last)
    }

    /// Appends `record` to the WAL. On an I/O failure the record is cut off
    /// again where possible and the failure is latched in `state`.
    fn log_record(state: &mut WriteState, record: &WalRecord, sync: bool) -> Result<()> {
        let start = state.wal.position();
        let logged = state
            .wal
            .append(record)
            .and_then(|_| if sync { state.wal.sync() } else { Ok(()) });
        match logged {
            Ok(()) => Ok(()),
            Err(e @ WalError::TooLarge(_)) => Err(e.into()),
            Err(e) => {
                if let Err(cut) = state.wal.truncate(start) {
                    warn!(error = %cut, "failed to cut off the unacknowledged WAL record");
                }
                error!(seq = record.seq, error = %e, "WAL write failed; refusing further writes");
                state.wal_failure = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Resolves and validates every column family a batch touches.
    fn batch_column_families(&self, batch: &WriteBatch) -> Result<Vec<Arc<ColumnFamilyData>>> {
        let mut out: Vec<Arc<ColumnFamilyData>> = Vec::new();
        for op in batch.ops() {
            if op.key().len() > MAX_KEY_SIZE {
                return Err(Error::InvalidArgument(format!(
                    "key too large: {} bytes (max {})",
                    op.key().len(),
                    MAX_KEY_SIZE
                )));
            }
            if op.value().len() > MAX_VALUE_SIZE {
                return Err(Error::InvalidArgument(format!(
                    "value too large: {} bytes (max {})",
                    op.value().len(),
                    MAX_VALUE_SIZE
                )));
            }

            let id = op.cf();
            let cf = match out.iter().find(|cf| cf.id == id) {
                Some(cf) => Arc::clone(cf),
                None => {
                    let cf = self.cf_by_id(id).ok_or_else(|| {
                        Error::InvalidArgument(format!("unknown column family id {id}"))
                    })?;
                    out.push(Arc::clone(&cf));
                    cf
                }
            };
            if matches!(op, BatchOp::Merge { .. }) && cf.merge_operator().is_none() {
                return Err(Error::InvalidArgument(format!(
                    "merge on column family {} which has no merge operator",
                    cf.name
                )));
            }
        }
        Ok(out)
    }

    fn write_stall_condition(&self, cfs: &[Arc<ColumnFamilyData>]) -> StallCondition {
        let mut condition = StallCondition::Normal;
        for cf in cfs {
            let sv = cf.super_version();
            let opts = &cf.options;
            if sv.imm.len() >= opts.max_write_buffer_number.max(1) {
                self.scheduler.schedule(Job::Flush(cf.id));
                return StallCondition::Stopped;
            }
            if opts.disable_auto_compactions {
                continue;
            }
            let l0 = sv.version.num_files(0);
            if l0 >= opts.level0_stop_writes_trigger {
                self.scheduler.schedule(Job::Compaction(cf.id));
                return StallCondition::Stopped;
            }
            if l0 >= opts.level0_slowdown_writes_trigger {
                condition = StallCondition::Delayed;
            }
        }
        condition
    }

    /// Applies write backpressure.
    ///
    /// Too many immutable memtables or L0 files stop the writer until
    /// background work catches up, waiting in bounded slices up to
    /// `write_stall_timeout`. A slowdown delays the write once.
    fn make_room_for_write(&self, opts: &WriteOptions, cfs: &[Arc<ColumnFamilyData>]) -> Result<()> {
        let start = Instant::now();
        let deadline = start + self.options.write_stall_timeout;
        let mut delayed = false;
        let mut stalled = false;

        let mut guard = self.stall.lock();
        let result = loop {
            match self.write_stall_condition(cfs) {
                StallCondition::Normal => break Ok(()),
                StallCondition::Delayed if delayed => break Ok(()),
                StallCondition::Delayed => {
                    if opts.no_slowdown {
                        break Err(Error::Busy("write would be delayed".to_string()));
                    }
                    parking_lot::MutexGuard::unlocked(&mut guard, || {
                        thread::sleep(SLOWDOWN_DELAY)
                    });
                    delayed = true;
                }
                StallCondition::Stopped => {
                    if opts.no_slowdown {
                        break Err(Error::Busy("write would stall".to_string()));
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            waited_ms = now.duration_since(start).as_millis() as u64,
                            "write stall timed out"
                        );
                        break Err(Error::Busy("write stall timed out".to_string()));
                    }
                    if !stalled {
                        debug!("writes stalled");
                        stalled = true;
                    }
                    self.stall_cv
                        .wait_for(&mut guard, (deadline - now).min(STALL_SLICE));
                }
            }
        };
        drop(guard);

        if delayed || stalled {
            self.record(Ticker::StallMicros, start.elapsed().as_micros() as u64);
        }
        result
    }

    /// Wakes writers waiting in [`make_room_for_write`](Self::make_room_for_write).
    pub(crate) fn notify_stall(&self) {
        let _guard = self.stall.lock();
        self.stall_cv.notify_all();
    }

    /// Freezes the active memtable of `cf` and starts a new one, moving to a
    /// new WAL segment unless the current one is still empty. Does nothing
    /// when the active memtable is empty.
    pub(crate) fn switch_memtable(&self, state: &mut WriteState, cf: &ColumnFamilyData) -> Result<()> {
        if cf.super_version().mem.mem.is_empty() {
            return Ok(());
        }

        if state.wal.position() > 0 {
            let number = self.new_file_number();
            let wal = WalWriter::create(
                self.path.join(segment_file_name(number)),
                self.options.wal_sync,
            )?
            .boxed();
            state.wal.sync()?;
            state.wal = wal;
            state.log_number = number;
            self.logfile_number
                .store(number, std::sync::atomic::Ordering::Release);
        }

        let log_number = state.log_number;
        cf.update(|cur| {
            cur.mem.mem.freeze();
            let mut imm = Vec::with_capacity(cur.imm.len() + 1);
            imm.push(cur.mem.clone());
            imm.extend(cur.imm.iter().cloned());
            Ok(SuperVersion {
                mem: MemtableHandle::new(log_number),
                imm,
                version: Arc::clone(&cur.version),
            })
        })?;
        debug!(cf = %cf.name, log = log_number, "switched memtable");
        Ok(())
    }

    /// Switches the active memtable and flushes everything immutable, all
    /// before returning.
    pub(crate) fn flush_cf(&self, cf: &Arc<ColumnFamilyData>) -> Result<()> {
        {
            let mut state = self.write.lock();
            self.switch_memtable(&mut state, cf)?;
        }
        self.flush_immutables(cf)
    }

    /// Writes all immutable memtables of `cf` into one L0 table and installs
    /// it. Also the body of background flush jobs.
    pub(crate) fn flush_immutables(&self, cf: &Arc<ColumnFamilyData>) -> Result<()> {
        let _flush = cf.flush_lock.lock();
        if cf.is_dropped() {
            return Ok(());
        }
        let sv = cf.super_version();
        if sv.imm.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let flushed = sv.imm.clone();
        let file = self.write_level0_table(cf, &flushed)?;

        {
            let _manifest = self.manifest_lock.lock();
            cf.update(|cur| {
                let imm = cur
                    .imm
                    .iter()
                    .filter(|m| !flushed.iter().any(|f| Arc::ptr_eq(&f.mem, &m.mem)))
                    .cloned()
                    .collect();
                let mut edit = VersionEdit::default();
                if let Some(file) = &file {
                    edit.added.push((0, Arc::clone(file)));
                }
                Ok(SuperVersion {
                    mem: cur.mem.clone(),
                    imm,
                    version: Arc::new(cur.version.apply(&edit)?),
                })
            })?;
            self.save_manifest()?;
        }

        self.retire_memtables(&flushed);
        self.delete_obsolete_wals();
        self.notify_stall();

        info!(
            cf = %cf.name,
            memtables = flushed.len(),
            file = file.as_ref().map_or(0, |f| f.number),
            bytes = file.as_ref().map_or(0, |f| f.size),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "flushed memtables"
        );
        self.maybe_schedule_compaction(cf);
        Ok(())
    }

    /// Merges `mems` (newest first) into one new table. Versions no snapshot
    /// can see are dropped; tombstones are always kept.
    pub(crate) fn write_level0_table(
        &self,
        cf: &ColumnFamilyData,
        mems: &[MemtableHandle],
    ) -> Result<Option<Arc<FileMetaData>>> {
        let sources: Vec<KvIter> = mems
            .iter()
            .map(|m| Box::new(m.mem.iter().map(Ok)) as KvIter)
            .collect();
        let input = CompactionIterator::new(
            MergeIterator::new(sources)?,
            self.snapshots.sequences(),
            cf.merge_operator().cloned(),
            Box::new(|_: &[u8]| true),
            self.options.statistics.clone(),
        );
        let mut outputs = self.write_tables(cf, input, None)?;
        Ok(outputs.pop())
    }

    /// Keeps flushed memtables visible to memory accounting while readers
    /// still hold them.
    fn retire_memtables(&self, mems: &[MemtableHandle]) {
        let mut retired = self.retired.lock();
        retired.retain(|w| w.strong_count() > 0);
        retired.extend(mems.iter().map(|m| Arc::downgrade(&m.mem)));
    }
}
