//! # Engine - ShaleKV Storage Engine
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`],
//! [`sstable`] and [`cache`] crates into an embedded LSM-tree key-value
//! store with column families, snapshots, merge operators and optimistic
//! transactions.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌────────────────────────────────────────────────────────┐
//! │                         DB                             │
//! │                                                        │
//! │ write.rs → WAL append → memtable insert → publish seq  │
//! │              |                                         │
//! │              |  (write_buffer_size reached?)           │
//! │              v                                         │
//! │   freeze memtable ──► scheduler ──► flush → L0 table   │
//! │                           |                            │
//! │                           |  (level score >= 1?)       │
//! │                           v                            │
//! │                compaction → L(n) + L(n+1) → L(n+1)     │
//! │                                                        │
//! │ read.rs → memtables → L0 (newest first) → L1..Ln       │
//! │           (through the shared block cache)             │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module            | Purpose                                                |
//! |-------------------|--------------------------------------------------------|
//! | [`lib.rs`]        | `Db` handle, shared state, accessors, `Debug`, `Drop`  |
//! | [`recovery`]      | open, WAL replay, orphan and tmp file cleanup          |
//! | [`write`]         | batches, write stalls, memtable switch, flush          |
//! | [`read`]          | point lookups, `multi_get`                             |
//! | [`iterator`]      | `DbIterator`                                           |
//! | [`compaction`]    | leveled picking, GC iterator, table output             |
//! | [`scheduler`]     | background worker pool with retry backoff              |
//! | [`manifest`]      | persistent column families, levels and counters        |
//! | [`transaction`]   | `OptimisticTransactionDb` and `Transaction`            |
//! | [`memory`]        | memory usage by type                                   |
//!
//! ## Concurrency
//!
//! Writers serialize on one write mutex. Readers grab an `Arc` to the current
//! [`SuperVersion`](column_family::SuperVersion) of a column family (active
//! memtable, immutable memtables, table version) and never wait for writers.
//! Flushes and compactions run on a small worker pool and publish their
//! results by swapping that pointer.
//!
//! ## Crash Safety
//!
//! Every batch is appended to the WAL as one record **before** it reaches a
//! memtable. WAL segments are deleted only after every column family has
//! flushed the data they hold and the manifest recording those tables is
//! durable. Tables and the manifest are both written to a temporary file
//! and renamed into place.

mod batch;
mod column_family;
mod compaction;
mod error;
mod iterator;
mod manifest;
mod memory;
mod read;
mod recovery;
mod scheduler;
mod slice;
mod snapshot;
mod transaction;
mod version;
mod write;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use cache::{BlockCache, Statistics, Ticker};
use config::{ColumnFamilyOptions, Options, ReadOptions, WriteOptions};
use memtable::Memtable;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{info, warn};
use wal::{list_segments, LogFile, WalWriter};

pub use batch::WriteBatch;
pub use column_family::{ColumnFamilyDescriptor, ColumnFamilyHandle};
pub use error::{Error, Result};
pub use iterator::DbIterator;
pub use memory::{approximate_memory_usage_by_type, MemoryUsage};
pub use slice::PinnableSlice;
pub use snapshot::Snapshot;
pub use transaction::{OptimisticTransactionDb, Transaction, TransactionIterator, TransactionState};
pub use config::DEFAULT_COLUMN_FAMILY_NAME;

use column_family::{check_cf_name, ColumnFamilyData, DEFAULT_CF_ID};
use manifest::{CfRecord, FileRecord, Manifest};
use scheduler::Scheduler;
use snapshot::SnapshotList;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// State guarded by the write mutex.
pub(crate) struct WriteState {
    pub wal: WalWriter<Box<dyn LogFile>>,
    pub log_number: u64,
    /// Set once a WAL append or sync fails. The log may then hold a record
    /// the caller saw fail, so further writes are refused until reopen.
    pub wal_failure: Option<String>,
}

/// State shared between the `Db` handle and the background workers.
pub(crate) struct DbInner {
    pub path: PathBuf,
    pub options: Options,
    pub write: Mutex<WriteState>,
    /// Number of the WAL segment currently written. Mirrors
    /// `WriteState::log_number` so it can be read without the write mutex.
    pub logfile_number: AtomicU64,
    pub last_sequence: AtomicU64,
    pub next_file_number: AtomicU64,
    pub next_cf_id: AtomicU32,
    pub cfs: RwLock<BTreeMap<u32, Arc<ColumnFamilyData>>>,
    /// Held while a new version is installed and the manifest saved.
    pub manifest_lock: Mutex<()>,
    pub snapshots: Arc<SnapshotList>,
    pub stall: Mutex<()>,
    pub stall_cv: Condvar,
    pub scheduler: Arc<Scheduler>,
    /// Flushed memtables that readers may still hold.
    pub retired: Mutex<Vec<Weak<Memtable>>>,
    /// Private cache used by column families without a shared one.
    pub default_cache: Arc<BlockCache>,
    pub closed: AtomicBool,
}

impl DbInner {
    pub(crate) fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    pub(crate) fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::AcqRel)
    }

    pub(crate) fn record(&self, ticker: Ticker, count: u64) {
        if let Some(stats) = &self.options.statistics {
            stats.record(ticker, count);
        }
    }

    pub(crate) fn cf_by_id(&self, id: u32) -> Option<Arc<ColumnFamilyData>> {
        self.cfs.read().get(&id).cloned()
    }

    pub(crate) fn cf_by_name(&self, name: &str) -> Option<Arc<ColumnFamilyData>> {
        self.cfs.read().values().find(|cf| cf.name == name).cloned()
    }

    /// Resolves a handle, rejecting dropped families and handles of other
    /// databases.
    pub(crate) fn resolve(&self, handle: &ColumnFamilyHandle) -> Result<Arc<ColumnFamilyData>> {
        match self.cfs.read().get(&handle.inner.id) {
            Some(cf) if Arc::ptr_eq(cf, &handle.inner) => Ok(Arc::clone(cf)),
            _ => Err(Error::InvalidArgument(format!(
                "column family handle {:?} is not open in this database",
                handle.inner.name
            ))),
        }
    }

    pub(crate) fn default_cf(&self) -> Result<Arc<ColumnFamilyData>> {
        self.cf_by_id(DEFAULT_CF_ID)
            .ok_or_else(|| Error::Corruption("default column family missing".to_string()))
    }

    /// Every distinct block cache used by this database.
    pub(crate) fn caches(&self) -> Vec<Arc<BlockCache>> {
        let mut out: Vec<Arc<BlockCache>> = vec![Arc::clone(&self.default_cache)];
        for cf in self.cfs.read().values() {
            if !out.iter().any(|c| Arc::ptr_eq(c, &cf.block_cache)) {
                out.push(Arc::clone(&cf.block_cache));
            }
        }
        out
    }

    /// Writes the manifest from the in-memory state. Callers hold
    /// `manifest_lock`.
    pub(crate) fn save_manifest(&self) -> Result<()> {
        let current_log = self.logfile_number.load(Ordering::Acquire);
        let mut manifest = Manifest::new(&self.path);
        manifest.next_file_number = self.next_file_number.load(Ordering::Acquire);
        manifest.last_sequence = self.last_sequence();
        manifest.next_cf_id = self.next_cf_id.load(Ordering::Acquire);
        for cf in self.cfs.read().values() {
            if cf.is_dropped() {
                continue;
            }
            let sv = cf.super_version();
            manifest.column_families.push(CfRecord {
                id: cf.id,
                log_number: sv.min_log_number(current_log),
                name: cf.name.clone(),
            });
            for (level, f) in sv.version.all_files() {
                manifest.files.push(FileRecord {
                    cf: cf.id,
                    level,
                    number: f.number,
                    size: f.size,
                });
            }
        }
        manifest.save()
    }

    /// Deletes WAL segments whose data every column family has flushed.
    pub(crate) fn delete_obsolete_wals(&self) {
        // under the manifest lock every installed table is also persisted
        let _manifest = self.manifest_lock.lock();
        let current = self.logfile_number.load(Ordering::Acquire);
        let min_log = self
            .cfs
            .read()
            .values()
            .filter(|cf| !cf.is_dropped())
            .map(|cf| cf.super_version().min_log_number(current))
            .min()
            .unwrap_or(current);

        let segments = match list_segments(&self.path) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot list WAL segments");
                return;
            }
        };
        for (number, path) in segments {
            if number >= min_log || number == current {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(segment = number, "deleted obsolete WAL segment"),
                Err(e) => warn!(segment = number, error = %e, "failed to delete WAL segment"),
            }
        }
    }

    /// Stops background work and persists the final state. Idempotent.
    pub(crate) fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.scheduler.shutdown();
        // a latched WAL failure can fail this sync; the manifest is still saved
        let synced = self.write.lock().wal.sync();
        {
            let _manifest = self.manifest_lock.lock();
            self.save_manifest()?;
        }
        synced?;
        info!(path = %self.path.display(), last_sequence = self.last_sequence(), "database closed");
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidArgument("database is closed".to_string()));
        }
        Ok(())
    }
}

/// An open ShaleKV database.
///
/// All methods take `&self`; the handle can be shared between threads (for
/// example through an `Arc<Db>`). Dropping it closes the database: pending
/// background work finishes, the WAL is synced and the manifest saved.
/// Memtables are not flushed on close; their contents are recovered from the
/// WAL on the next open.
pub struct Db {
    pub(crate) inner: Arc<DbInner>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cfs: Vec<String> = self.inner.cfs.read().values().map(|cf| cf.name.clone()).collect();
        f.debug_struct("Db")
            .field("path", &self.inner.path)
            .field("last_sequence", &self.inner.last_sequence())
            .field("column_families", &cfs)
            .field("snapshots", &self.inner.snapshots.len())
            .field("background_errors", &self.inner.scheduler.total_failures())
            .finish()
    }
}

impl Db {
    /// Opens the database at `path` with only the column families recorded in
    /// its manifest (just `default` for a new database).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the database does not exist and
    /// `create_if_missing` is off, or exists and `error_if_exists` is on.
    /// `Corruption` when the manifest, a table or (in strict recovery mode)
    /// the WAL is damaged.
    pub fn open<P: AsRef<Path>>(path: P, opts: &Options) -> Result<Self> {
        Self::open_cf(path, opts, &[])
    }

    /// Opens the database with explicit options for the named column
    /// families. Descriptors not yet in the manifest are created when
    /// `create_missing_column_families` is set and rejected otherwise.
    /// Families in the manifest but not in `descriptors` open with
    /// `opts.cf`.
    pub fn open_cf<P: AsRef<Path>>(
        path: P,
        opts: &Options,
        descriptors: &[ColumnFamilyDescriptor],
    ) -> Result<Self> {
        let inner = DbInner::recover(path.as_ref(), opts, descriptors)?;
        Ok(Self { inner })
    }

    /// Names of the column families recorded in the manifest at `path`, in
    /// creation order, without opening the database.
    pub fn list_column_families<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        match Manifest::load(path.as_ref())? {
            Some(manifest) => Ok(manifest.column_family_names()),
            None => Err(Error::InvalidArgument(format!(
                "no database at {}",
                path.as_ref().display()
            ))),
        }
    }

    /// Closes the database, reporting errors that `Drop` would swallow.
    pub fn close(self) -> Result<()> {
        self.inner.close()
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    // -- writes ---------------------------------------------------------

    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    pub fn put_cf<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        cf: &ColumnFamilyHandle,
        key: K,
        value: V,
    ) -> Result<()> {
        self.inner.resolve(cf)?;
        let mut batch = WriteBatch::new();
        batch.put_cf(cf, key, value);
        self.write(batch)
    }

    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    pub fn delete_cf<K: AsRef<[u8]>>(&self, cf: &ColumnFamilyHandle, key: K) -> Result<()> {
        self.inner.resolve(cf)?;
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf, key);
        self.write(batch)
    }

    /// Records a merge operand for `key`. The column family must have a
    /// merge operator.
    pub fn merge<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, operand: V) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge(key, operand);
        self.write(batch)
    }

    pub fn merge_cf<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        cf: &ColumnFamilyHandle,
        key: K,
        operand: V,
    ) -> Result<()> {
        self.inner.resolve(cf)?;
        let mut batch = WriteBatch::new();
        batch.merge_cf(cf, key, operand);
        self.write(batch)
    }

    /// Applies `batch` atomically with default write options.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.write_opt(batch, &WriteOptions::default())
    }

    /// Applies `batch` atomically: all of its operations become visible at
    /// once and a crash either keeps or loses all of them.
    pub fn write_opt(&self, batch: WriteBatch, opts: &WriteOptions) -> Result<()> {
        self.inner.check_open()?;
        self.inner.write_impl(opts, batch, None).map(|_| ())
    }

    // -- reads ----------------------------------------------------------

    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        self.get_opt(&ReadOptions::default(), key)
    }

    pub fn get_opt<K: AsRef<[u8]>>(&self, ro: &ReadOptions, key: K) -> Result<Option<Vec<u8>>> {
        let cf = self.inner.default_cf()?;
        Ok(self
            .inner
            .get_impl(ro, &cf, key.as_ref(), false)?
            .map(|v| v.to_vec()))
    }

    pub fn get_cf<K: AsRef<[u8]>>(&self, cf: &ColumnFamilyHandle, key: K) -> Result<Option<Vec<u8>>> {
        self.get_cf_opt(&ReadOptions::default(), cf, key)
    }

    pub fn get_cf_opt<K: AsRef<[u8]>>(
        &self,
        ro: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: K,
    ) -> Result<Option<Vec<u8>>> {
        let cf = self.inner.resolve(cf)?;
        Ok(self
            .inner
            .get_impl(ro, &cf, key.as_ref(), false)?
            .map(|v| v.to_vec()))
    }

    /// Like [`Db::get_cf`], without copying values served from the block
    /// cache. See [`PinnableSlice`].
    pub fn get_pinned_cf<K: AsRef<[u8]>>(
        &self,
        cf: &ColumnFamilyHandle,
        key: K,
    ) -> Result<Option<PinnableSlice>> {
        self.get_pinned_cf_opt(&ReadOptions::default(), cf, key)
    }

    pub fn get_pinned_cf_opt<K: AsRef<[u8]>>(
        &self,
        ro: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: K,
    ) -> Result<Option<PinnableSlice>> {
        let cf = self.inner.resolve(cf)?;
        self.inner.get_impl(ro, &cf, key.as_ref(), true)
    }

    /// Looks up several keys of the default column family against one
    /// consistent view.
    pub fn multi_get<K: AsRef<[u8]>>(
        &self,
        ro: &ReadOptions,
        keys: &[K],
    ) -> Vec<Result<Option<Vec<u8>>>> {
        let cf = match self.inner.default_cf() {
            Ok(cf) => cf,
            Err(e) => return keys.iter().map(|_| Err(Error::Corruption(e.to_string()))).collect(),
        };
        let pairs: Vec<_> = keys
            .iter()
            .map(|k| (Arc::clone(&cf), k.as_ref().to_vec()))
            .collect();
        self.inner.multi_get_impl(ro, &pairs)
    }

    /// Looks up `(column family, key)` pairs against one consistent view.
    /// A stale handle fails only its own entries.
    pub fn multi_get_cf<K: AsRef<[u8]>>(
        &self,
        ro: &ReadOptions,
        keys: &[(&ColumnFamilyHandle, K)],
    ) -> Vec<Result<Option<Vec<u8>>>> {
        let mut results: Vec<Option<Result<Option<Vec<u8>>>>> = Vec::with_capacity(keys.len());
        let mut pairs = Vec::with_capacity(keys.len());
        for (handle, key) in keys {
            match self.inner.resolve(handle) {
                Ok(cf) => {
                    pairs.push((cf, key.as_ref().to_vec()));
                    results.push(None);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }
        let mut found = self.inner.multi_get_impl(ro, &pairs).into_iter();
        results
            .into_iter()
            .map(|r| match r {
                Some(err) => err,
                None => found
                    .next()
                    .unwrap_or_else(|| Err(Error::Corruption("multi_get result missing".to_string()))),
            })
            .collect()
    }

    /// Iterator over the default column family.
    pub fn new_iterator(&self, ro: &ReadOptions) -> Result<DbIterator> {
        let cf = self.inner.default_cf()?;
        self.iterator_for(ro, &cf)
    }

    pub fn new_iterator_cf(&self, ro: &ReadOptions, cf: &ColumnFamilyHandle) -> Result<DbIterator> {
        let cf = self.inner.resolve(cf)?;
        self.iterator_for(ro, &cf)
    }

    fn iterator_for(&self, ro: &ReadOptions, cf: &ColumnFamilyData) -> Result<DbIterator> {
        let (sv, seq) = self.inner.read_view(ro, cf);
        DbIterator::new(sv, ro, seq, cf.merge_operator().cloned())
    }

    /// All live pairs of the default column family with `start <= key < end`.
    /// An empty bound is unbounded.
    pub fn scan<S: AsRef<[u8]>, E: AsRef<[u8]>>(&self, start: S, end: E) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut ro = ReadOptions::default();
        if !start.as_ref().is_empty() {
            ro.set_iterate_lower_bound(start.as_ref());
        }
        if !end.as_ref().is_empty() {
            ro.set_iterate_upper_bound(end.as_ref());
        }
        self.new_iterator(&ro)?.collect()
    }

    // -- snapshots ------------------------------------------------------

    /// Pins the current sequence number. Reads through
    /// [`Snapshot::read_options`] see exactly the writes made before this
    /// call.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.inner.last_sequence(), Arc::clone(&self.inner.snapshots))
    }

    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    // -- maintenance ----------------------------------------------------

    /// Flushes the default column family's memtables to L0 and waits.
    pub fn flush(&self) -> Result<()> {
        self.inner.check_open()?;
        let cf = self.inner.default_cf()?;
        self.inner.flush_cf(&cf)
    }

    pub fn flush_cf(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        self.inner.check_open()?;
        let cf = self.inner.resolve(cf)?;
        self.inner.flush_cf(&cf)
    }

    /// Flushes `cf` and compacts all of its data into the last level.
    pub fn compact_range_cf(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        self.inner.check_open()?;
        let cf = self.inner.resolve(cf)?;
        self.inner.compact_range(&cf)
    }

    /// Same as [`Db::compact_range_cf`] on the default column family.
    pub fn compact_range(&self) -> Result<()> {
        self.inner.check_open()?;
        let cf = self.inner.default_cf()?;
        self.inner.compact_range(&cf)
    }

    /// Blocks until no flush or compaction is queued or running. Returns
    /// early while background jobs are failing.
    pub fn wait_for_background_work(&self) {
        self.inner.scheduler.wait_idle();
    }

    /// Background jobs that have failed since open.
    pub fn background_error_count(&self) -> u64 {
        self.inner.scheduler.total_failures()
    }

    // -- column families ------------------------------------------------

    pub fn default_column_family(&self) -> Result<ColumnFamilyHandle> {
        Ok(ColumnFamilyHandle::new(self.inner.default_cf()?))
    }

    pub fn column_family(&self, name: &str) -> Option<ColumnFamilyHandle> {
        self.inner.cf_by_name(name).map(ColumnFamilyHandle::new)
    }

    /// Names of the open column families in creation order.
    pub fn column_family_names(&self) -> Vec<String> {
        self.inner.cfs.read().values().map(|cf| cf.name.clone()).collect()
    }

    pub fn create_column_family(
        &self,
        name: &str,
        opts: &ColumnFamilyOptions,
    ) -> Result<ColumnFamilyHandle> {
        self.inner.check_open()?;
        check_cf_name(name)?;
        let state = self.inner.write.lock();
        let _manifest = self.inner.manifest_lock.lock();
        if self.inner.cf_by_name(name).is_some() {
            return Err(Error::InvalidArgument(format!(
                "column family {name} already exists"
            )));
        }

        let id = self.inner.next_cf_id.fetch_add(1, Ordering::AcqRel);
        let cache = opts
            .table
            .block_cache
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.inner.default_cache));
        let cf = Arc::new(ColumnFamilyData::new(
            id,
            name.to_string(),
            opts.clone(),
            cache,
            self.inner.options.statistics.clone(),
            state.log_number,
        ));
        self.inner.cfs.write().insert(id, Arc::clone(&cf));
        if let Err(e) = self.inner.save_manifest() {
            self.inner.cfs.write().remove(&id);
            return Err(e);
        }
        info!(cf = name, id, "created column family");
        Ok(ColumnFamilyHandle::new(cf))
    }

    /// Drops a column family and deletes its tables once no reader uses them.
    /// Handles to it become invalid. The default family cannot be dropped.
    pub fn drop_column_family(&self, name: &str) -> Result<()> {
        self.inner.check_open()?;
        if name == DEFAULT_COLUMN_FAMILY_NAME {
            return Err(Error::InvalidArgument(
                "the default column family cannot be dropped".to_string(),
            ));
        }
        let _state = self.inner.write.lock();
        let _manifest = self.inner.manifest_lock.lock();
        let cf = self
            .inner
            .cf_by_name(name)
            .ok_or_else(|| Error::InvalidArgument(format!("column family {name} does not exist")))?;

        self.inner.cfs.write().remove(&cf.id);
        if let Err(e) = self.inner.save_manifest() {
            self.inner.cfs.write().insert(cf.id, cf);
            return Err(e);
        }
        cf.mark_dropped();
        info!(cf = name, id = cf.id, "dropped column family");
        Ok(())
    }

    // -- introspection --------------------------------------------------

    pub fn latest_sequence_number(&self) -> u64 {
        self.inner.last_sequence()
    }

    /// Number of table files per level of `cf`.
    pub fn level_file_counts(&self, cf: &ColumnFamilyHandle) -> Result<Vec<usize>> {
        let cf = self.inner.resolve(cf)?;
        Ok(cf.super_version().version.file_counts())
    }

    /// Memory used by this database's memtables, table readers and block
    /// caches.
    pub fn memory_usage(&self) -> MemoryUsage {
        let caches = self.inner.caches();
        let refs: Vec<&Arc<BlockCache>> = caches.iter().collect();
        approximate_memory_usage_by_type(&[self], &refs)
    }

    pub fn statistics(&self) -> Option<&Arc<Statistics>> {
        self.inner.options.statistics.as_ref()
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            warn!(path = %self.inner.path.display(), error = %e, "error while closing database");
        }
    }
}

#[cfg(test)]
mod tests;
