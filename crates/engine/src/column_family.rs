use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cache::{BlockCache, Statistics};
use config::{ColumnFamilyOptions, MergeOperator};
use memtable::Memtable;
use parking_lot::{Mutex, RwLock};
use sstable::{Table, TableBuilderOptions, TableReaderOptions};

use crate::error::{Error, Result};
use crate::version::{FileMetaData, Version};

pub(crate) const DEFAULT_CF_ID: u32 = 0;

/// A memtable together with the WAL segment that was current when it became
/// active. Its data lives in that segment or later ones.
#[derive(Clone)]
pub(crate) struct MemtableHandle {
    pub mem: Arc<Memtable>,
    pub log_number: u64,
}

impl MemtableHandle {
    pub fn new(log_number: u64) -> Self {
        Self {
            mem: Arc::new(Memtable::new()),
            log_number,
        }
    }
}

/// Everything a reader needs, captured at one instant: the active memtable,
/// the immutable memtables (newest first) and the current version.
pub(crate) struct SuperVersion {
    pub mem: MemtableHandle,
    pub imm: Vec<MemtableHandle>,
    pub version: Arc<Version>,
}

impl SuperVersion {
    /// Memtables newest first.
    pub fn memtables(&self) -> impl Iterator<Item = &MemtableHandle> + '_ {
        std::iter::once(&self.mem).chain(self.imm.iter())
    }

    /// Oldest WAL segment that may still hold unflushed data, or `current`
    /// when nothing is unflushed.
    pub fn min_log_number(&self, current: u64) -> u64 {
        if let Some(oldest) = self.imm.last() {
            return oldest.log_number;
        }
        if !self.mem.mem.is_empty() {
            return self.mem.log_number;
        }
        current
    }

    pub fn unflushed_memory(&self) -> usize {
        self.memtables()
            .map(|m| m.mem.approximate_memory_usage())
            .sum()
    }
}

/// One keyspace: its options, memtables and version chain.
pub(crate) struct ColumnFamilyData {
    pub id: u32,
    pub name: String,
    pub options: ColumnFamilyOptions,
    pub builder_options: TableBuilderOptions,
    pub block_cache: Arc<BlockCache>,
    pub cache_owner: u64,
    statistics: Option<Arc<Statistics>>,
    current: RwLock<Arc<SuperVersion>>,
    dropped: AtomicBool,
    /// Serializes flushes so L0 files are added in data order.
    pub flush_lock: Mutex<()>,
    /// One compaction per column family at a time.
    pub compaction_lock: Mutex<()>,
}

impl ColumnFamilyData {
    pub fn new(
        id: u32,
        name: String,
        options: ColumnFamilyOptions,
        block_cache: Arc<BlockCache>,
        statistics: Option<Arc<Statistics>>,
        log_number: u64,
    ) -> Self {
        let builder_options = TableBuilderOptions::from_table_options(&options.table);
        let cache_owner = block_cache.new_id();
        let version = Arc::new(Version::new(options.num_levels));
        Self {
            id,
            name,
            builder_options,
            block_cache,
            cache_owner,
            statistics,
            current: RwLock::new(Arc::new(SuperVersion {
                mem: MemtableHandle::new(log_number),
                imm: Vec::new(),
                version,
            })),
            dropped: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            options,
        }
    }

    pub fn super_version(&self) -> Arc<SuperVersion> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the super version with `f(current)` atomically with respect
    /// to other updates.
    pub fn update<F>(&self, f: F) -> Result<Arc<SuperVersion>>
    where
        F: FnOnce(&SuperVersion) -> Result<SuperVersion>,
    {
        let mut current = self.current.write();
        let next = Arc::new(f(&current)?);
        *current = Arc::clone(&next);
        Ok(next)
    }

    pub fn merge_operator(&self) -> Option<&Arc<dyn MergeOperator>> {
        self.options.merge_operator.as_ref()
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Marks the family dropped and every table it owns obsolete.
    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
        for (_, file) in self.super_version().version.all_files() {
            file.mark_obsolete();
        }
    }

    pub fn reader_options(&self, file_number: u64) -> TableReaderOptions {
        TableReaderOptions {
            file_number,
            block_cache: Arc::clone(&self.block_cache),
            cache_owner: self.cache_owner,
            cache_index_and_filter_blocks: self.options.table.cache_index_and_filter_blocks,
            filter_policy: self.builder_options.filter_policy.clone(),
            statistics: self.statistics.clone(),
        }
    }

    pub fn open_table(&self, path: &Path, number: u64) -> Result<Arc<FileMetaData>> {
        let table = Table::open(path, self.reader_options(number))?;
        Ok(Arc::new(FileMetaData::from_table(table)?))
    }
}

/// A reference to an open column family.
///
/// Cheap to clone. Using a handle after its family was dropped, or with a
/// database it does not belong to, fails with `InvalidArgument`.
#[derive(Clone)]
pub struct ColumnFamilyHandle {
    pub(crate) inner: Arc<ColumnFamilyData>,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(inner: Arc<ColumnFamilyData>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn options(&self) -> &ColumnFamilyOptions {
        &self.inner.options
    }
}

impl fmt::Debug for ColumnFamilyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("dropped", &self.inner.is_dropped())
            .finish()
    }
}

/// Name and options of a column family to open or create.
#[derive(Debug, Clone)]
pub struct ColumnFamilyDescriptor {
    pub name: String,
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    pub fn new(name: impl Into<String>, options: ColumnFamilyOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

pub(crate) fn check_cf_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\n') || name.contains('\r') {
        return Err(Error::InvalidArgument(format!(
            "invalid column family name {name:?}"
        )));
    }
    Ok(())
}
