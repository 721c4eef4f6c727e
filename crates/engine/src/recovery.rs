//! Cold start: manifest loading, table opening, WAL replay and cleanup.
//!
//! Recovery rebuilds every column family from the manifest, replays the WAL
//! segments that may still hold unflushed data, and writes the recovered
//! memtables straight to L0 so that a fresh WAL segment can start empty.
//! Leftover `.sst.tmp` files from interrupted table writes and table files
//! no manifest entry references are removed.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cache::BlockCache;
use config::{ColumnFamilyOptions, Options, DEFAULT_COLUMN_FAMILY_NAME};
use parking_lot::{Condvar, Mutex, RwLock};
use sstable::{parse_table_file_name, table_file_name};
use tracing::{debug, info, warn};
use wal::{list_segments, segment_file_name, BatchOp, WalReader, WalWriter};

use crate::column_family::{
    check_cf_name, ColumnFamilyData, ColumnFamilyDescriptor, MemtableHandle, SuperVersion,
    DEFAULT_CF_ID,
};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::scheduler::Scheduler;
use crate::snapshot::SnapshotList;
use crate::version::VersionEdit;
use crate::{DbInner, WriteState};

/// Counters gathered while recovering, before the database exists.
struct RecoveredState {
    last_sequence: u64,
    next_file_number: u64,
}

impl RecoveredState {
    fn observe_file(&mut self, number: u64) {
        self.next_file_number = self.next_file_number.max(number + 1);
    }
}

impl DbInner {
    pub(crate) fn recover(
        path: &Path,
        opts: &Options,
        descriptors: &[ColumnFamilyDescriptor],
    ) -> Result<Arc<Self>> {
        let start = Instant::now();
        for d in descriptors {
            check_cf_name(&d.name)?;
        }

        if !path.exists() {
            if !opts.create_if_missing {
                return Err(Error::InvalidArgument(format!(
                    "{} does not exist (create_if_missing is false)",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        }
        let manifest = Manifest::load(path)?;
        match &manifest {
            Some(_) if opts.error_if_exists => {
                return Err(Error::InvalidArgument(format!(
                    "{} already exists (error_if_exists is true)",
                    path.display()
                )))
            }
            None if !opts.create_if_missing => {
                return Err(Error::InvalidArgument(format!(
                    "no database at {} (create_if_missing is false)",
                    path.display()
                )))
            }
            _ => {}
        }
        let is_new = manifest.is_none();
        let manifest = manifest.unwrap_or_else(|| Manifest::new(path));

        cleanup_tmp_files(path);

        let default_cache = BlockCache::new_lru(opts.block_cache_capacity);
        let mut state = RecoveredState {
            last_sequence: manifest.last_sequence,
            next_file_number: manifest.next_file_number.max(1),
        };
        let mut next_cf_id = manifest.next_cf_id;

        let options_for = |name: &str| -> ColumnFamilyOptions {
            descriptors
                .iter()
                .find(|d| d.name == name)
                .map_or_else(|| opts.cf.clone(), |d| d.options.clone())
        };
        let new_cf = |id: u32, name: &str, log_number: u64| -> ColumnFamilyData {
            let cf_opts = options_for(name);
            let cache = cf_opts
                .table
                .block_cache
                .clone()
                .unwrap_or_else(|| Arc::clone(&default_cache));
            ColumnFamilyData::new(
                id,
                name.to_string(),
                cf_opts,
                cache,
                opts.statistics.clone(),
                log_number,
            )
        };

        let mut cfs: BTreeMap<u32, Arc<ColumnFamilyData>> = BTreeMap::new();
        for rec in &manifest.column_families {
            cfs.insert(rec.id, Arc::new(new_cf(rec.id, &rec.name, rec.log_number)));
            next_cf_id = next_cf_id.max(rec.id + 1);
        }
        if is_new {
            cfs.insert(
                DEFAULT_CF_ID,
                Arc::new(new_cf(DEFAULT_CF_ID, DEFAULT_COLUMN_FAMILY_NAME, 0)),
            );
            next_cf_id = next_cf_id.max(DEFAULT_CF_ID + 1);
        }
        if !cfs.contains_key(&DEFAULT_CF_ID) {
            return Err(Error::Corruption(
                "manifest has no default column family".to_string(),
            ));
        }
        for d in descriptors {
            if cfs.values().any(|cf| cf.name == d.name) {
                continue;
            }
            if !opts.create_missing_column_families {
                return Err(Error::InvalidArgument(format!(
                    "column family {} does not exist (create_missing_column_families is false)",
                    d.name
                )));
            }
            let id = next_cf_id;
            next_cf_id += 1;
            cfs.insert(id, Arc::new(new_cf(id, &d.name, 0)));
            info!(cf = %d.name, id, "creating missing column family");
        }

        // tables
        let mut live: HashSet<u64> = HashSet::new();
        for cf in cfs.values() {
            let mut edit = VersionEdit::default();
            for rec in manifest.files_of(cf.id) {
                let file = cf.open_table(&path.join(table_file_name(rec.number)), rec.number)?;
                if file.size != rec.size {
                    return Err(Error::Corruption(format!(
                        "table {} is {} bytes, manifest records {}",
                        rec.number, file.size, rec.size
                    )));
                }
                state.observe_file(rec.number);
                state.last_sequence = state.last_sequence.max(file.largest_seq());
                live.insert(rec.number);
                edit.added.push((rec.level, file));
            }
            cf.update(|cur| {
                Ok(SuperVersion {
                    mem: cur.mem.clone(),
                    imm: Vec::new(),
                    version: Arc::new(cur.version.apply(&edit)?),
                })
            })?;
        }
        delete_orphan_tables(path, &live, &mut state)?;

        // WAL
        let segments = list_segments(path)?;
        for (number, _) in &segments {
            state.observe_file(*number);
        }
        let mut replayed = 0u64;
        for (number, segment) in &segments {
            let reader = WalReader::open(segment, opts.wal_recovery_mode)?;
            for record in reader {
                let record = record?;
                for (i, op) in record.ops.iter().enumerate() {
                    let cf = match cfs.get(&op.cf()) {
                        Some(cf) => cf,
                        None => continue,
                    };
                    let log_number = cf.super_version().mem.log_number;
                    if *number < log_number {
                        continue;
                    }
                    let mem = Arc::clone(&cf.super_version().mem.mem);
                    let seq = record.seq + i as u64;
                    match op {
                        BatchOp::Put { key, value, .. } => mem.put(key, value, seq),
                        BatchOp::Delete { key, .. } => mem.delete(key, seq),
                        BatchOp::Merge { key, value, .. } => mem.merge(key, value, seq),
                    }
                    replayed += 1;
                }
                state.last_sequence = state.last_sequence.max(record.last_seq());
            }
            debug!(segment = number, "replayed WAL segment");
        }

        let log_number = state.next_file_number;
        state.next_file_number += 1;
        let wal = WalWriter::create(path.join(segment_file_name(log_number)), opts.wal_sync)?.boxed();

        let inner = Arc::new(DbInner {
            path: path.to_path_buf(),
            options: opts.clone(),
            write: Mutex::new(WriteState {
                wal,
                log_number,
                wal_failure: None,
            }),
            logfile_number: AtomicU64::new(log_number),
            last_sequence: AtomicU64::new(state.last_sequence),
            next_file_number: AtomicU64::new(state.next_file_number),
            next_cf_id: AtomicU32::new(next_cf_id),
            cfs: RwLock::new(cfs),
            manifest_lock: Mutex::new(()),
            snapshots: Arc::new(SnapshotList::default()),
            stall: Mutex::new(()),
            stall_cv: Condvar::new(),
            scheduler: Scheduler::new(),
            retired: Mutex::new(Vec::new()),
            default_cache,
            closed: AtomicBool::new(false),
        });

        inner.flush_recovered_memtables(log_number)?;
        {
            let _manifest = inner.manifest_lock.lock();
            inner.save_manifest()?;
        }
        for (number, segment) in &segments {
            if let Err(e) = fs::remove_file(segment) {
                warn!(segment = number, error = %e, "failed to delete replayed WAL segment");
            }
        }

        inner
            .scheduler
            .start(Arc::downgrade(&inner), opts.max_background_jobs())?;
        let cf_list: Vec<Arc<ColumnFamilyData>> = inner.cfs.read().values().cloned().collect();
        for cf in &cf_list {
            inner.maybe_schedule_compaction(cf);
        }

        info!(
            path = %path.display(),
            new = is_new,
            column_families = cf_list.len(),
            replayed,
            last_sequence = inner.last_sequence(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "database opened"
        );
        Ok(inner)
    }

    /// Writes each non-empty recovered memtable to an L0 table and gives
    /// every column family a fresh memtable on segment `log_number`.
    fn flush_recovered_memtables(&self, log_number: u64) -> Result<()> {
        let cfs: Vec<Arc<ColumnFamilyData>> = self.cfs.read().values().cloned().collect();
        for cf in cfs {
            let sv = cf.super_version();
            let file = if sv.mem.mem.is_empty() {
                None
            } else {
                sv.mem.mem.freeze();
                self.write_level0_table(&cf, std::slice::from_ref(&sv.mem))?
            };
            cf.update(|cur| {
                let mut edit = VersionEdit::default();
                if let Some(file) = &file {
                    edit.added.push((0, Arc::clone(file)));
                }
                Ok(SuperVersion {
                    mem: MemtableHandle::new(log_number),
                    imm: Vec::new(),
                    version: Arc::new(cur.version.apply(&edit)?),
                })
            })?;
            if let Some(file) = &file {
                info!(cf = %cf.name, file = file.number, bytes = file.size, "flushed recovered memtable");
            }
        }
        Ok(())
    }
}

/// Cleans up leftover `.sst.tmp` files from interrupted table writes.
pub(crate) fn cleanup_tmp_files(dir: &Path) {
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let p = entry.path();
            if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".sst.tmp") {
                    let _ = fs::remove_file(&p);
                }
            }
        }
    }
}

/// Removes table files that no column family references.
fn delete_orphan_tables(dir: &Path, live: &HashSet<u64>, state: &mut RecoveredState) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let number = match name.to_str().and_then(parse_table_file_name) {
            Some(n) => n,
            None => continue,
        };
        state.observe_file(number);
        if live.contains(&number) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => debug!(file = number, "deleted orphan table"),
            Err(e) => warn!(file = number, error = %e, "failed to delete orphan table"),
        }
    }
    Ok(())
}

impl Drop for DbInner {
    fn drop(&mut self) {
        // normally closed by `Db`; recovery failures after construction land here
        if !self.closed.load(Ordering::Acquire) {
            self.scheduler.shutdown();
        }
    }
}
