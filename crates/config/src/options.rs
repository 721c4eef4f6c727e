use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cache::{BlockCache, Statistics};

use crate::MergeOperator;

/// Block compression codec for table data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None,
    Lz4,
    Zstd,
}

impl CompressionType {
    /// Tag stored in each block trailer.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
            CompressionType::Zstd => 2,
        }
    }

    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            2 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

/// When WAL appends reach stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// `fsync` after every append.
    Always,
    /// Appends reach the OS page cache; durable on `sync()`, on rotation, or
    /// when a write asks for it through [`WriteOptions::sync`].
    #[default]
    Manual,
}

/// How WAL replay treats damaged records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalRecoveryMode {
    /// A truncated or corrupt final record ends replay cleanly. Damage that
    /// is followed by more log data is still reported as corruption.
    #[default]
    TolerateCorruptedTail,
    /// Any damaged record fails recovery.
    Strict,
}

/// Table format knobs (per column family).
#[derive(Clone)]
pub struct TableOptions {
    /// Target uncompressed size of a data block. Default 4 KiB.
    pub block_size: usize,
    /// Default [`CompressionType::None`].
    pub compression: CompressionType,
    /// Bloom filter density; `None` disables filter blocks. Default `Some(10)`.
    pub bloom_bits_per_key: Option<u32>,
    /// Keep index and filter blocks in the block cache instead of in the
    /// table reader. Default `false`.
    pub cache_index_and_filter_blocks: bool,
    /// Shared block cache. When `None` the database creates a private cache
    /// of [`Options::block_cache_capacity`] bytes.
    pub block_cache: Option<Arc<BlockCache>>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024,
            compression: CompressionType::None,
            bloom_bits_per_key: Some(10),
            cache_index_and_filter_blocks: false,
            block_cache: None,
        }
    }
}

impl TableOptions {
    pub fn set_block_cache(&mut self, cache: Arc<BlockCache>) {
        self.block_cache = Some(cache);
    }

    /// Cuts a new data block after every key.
    pub fn set_flush_every_key_policy(&mut self) {
        self.block_size = 1;
    }
}

impl fmt::Debug for TableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableOptions")
            .field("block_size", &self.block_size)
            .field("compression", &self.compression)
            .field("bloom_bits_per_key", &self.bloom_bits_per_key)
            .field("cache_index_and_filter_blocks", &self.cache_index_and_filter_blocks)
            .field("shared_block_cache", &self.block_cache.is_some())
            .finish()
    }
}

/// Per column family options.
#[derive(Clone)]
pub struct ColumnFamilyOptions {
    /// Memtable size that triggers rotation + flush. Default 4 MiB.
    pub write_buffer_size: usize,
    /// Active + immutable memtables allowed before writes stall. Default 2.
    pub max_write_buffer_number: usize,
    /// L0 file count that makes L0 a compaction candidate. Default 4.
    pub level0_file_num_compaction_trigger: usize,
    /// L0 file count at which each write is delayed. Default 20.
    pub level0_slowdown_writes_trigger: usize,
    /// L0 file count at which writes stop until compaction catches up. Default 36.
    pub level0_stop_writes_trigger: usize,
    /// Default 7.
    pub num_levels: usize,
    /// Target size of L1. Default 64 MiB.
    pub max_bytes_for_level_base: u64,
    /// Growth factor between consecutive levels. Default 10.
    pub max_bytes_for_level_multiplier: f64,
    /// Compaction output files are cut at this size. Default 8 MiB.
    pub target_file_size_base: u64,
    /// Only manual compaction runs when set. Default `false`.
    pub disable_auto_compactions: bool,
    pub table: TableOptions,
    /// Combines merge operands. Merges on a column family without an
    /// operator are rejected.
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            level0_file_num_compaction_trigger: 4,
            level0_slowdown_writes_trigger: 20,
            level0_stop_writes_trigger: 36,
            num_levels: 7,
            max_bytes_for_level_base: 64 * 1024 * 1024,
            max_bytes_for_level_multiplier: 10.0,
            target_file_size_base: 8 * 1024 * 1024,
            disable_auto_compactions: false,
            table: TableOptions::default(),
            merge_operator: None,
        }
    }
}

impl ColumnFamilyOptions {
    pub fn set_merge_operator(&mut self, op: Arc<dyn MergeOperator>) {
        self.merge_operator = Some(op);
    }

    /// Target byte size of `level` (≥ 1).
    #[must_use]
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut target = self.max_bytes_for_level_base as f64;
        for _ in 1..level {
            target *= self.max_bytes_for_level_multiplier;
        }
        target as u64
    }
}

impl fmt::Debug for ColumnFamilyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyOptions")
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_write_buffer_number", &self.max_write_buffer_number)
            .field(
                "level0_file_num_compaction_trigger",
                &self.level0_file_num_compaction_trigger,
            )
            .field("level0_slowdown_writes_trigger", &self.level0_slowdown_writes_trigger)
            .field("level0_stop_writes_trigger", &self.level0_stop_writes_trigger)
            .field("num_levels", &self.num_levels)
            .field("max_bytes_for_level_base", &self.max_bytes_for_level_base)
            .field("target_file_size_base", &self.target_file_size_base)
            .field("table", &self.table)
            .field(
                "merge_operator",
                &self.merge_operator.as_ref().map(|op| op.name()),
            )
            .finish()
    }
}

/// Database-wide options. The embedded [`ColumnFamilyOptions`] apply to the
/// default column family and to column families opened without their own.
#[derive(Clone, Debug)]
pub struct Options {
    pub create_if_missing: bool,
    pub create_missing_column_families: bool,
    pub error_if_exists: bool,
    /// Background worker threads for flushes and compactions. Default 2.
    max_background_jobs: usize,
    /// Parallel key ranges per compaction. Default 1.
    max_subcompactions: u32,
    /// Default [`SyncPolicy::Manual`].
    pub wal_sync: SyncPolicy,
    pub wal_recovery_mode: WalRecoveryMode,
    /// Capacity of the private block cache created when no shared cache is
    /// configured. Default 8 MiB.
    pub block_cache_capacity: usize,
    /// Upper bound on how long a stalled write waits before `Busy`. Default 10 s.
    pub write_stall_timeout: Duration,
    /// Shared ticker counters. Default `None` (counters disabled).
    pub statistics: Option<Arc<Statistics>>,
    pub cf: ColumnFamilyOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            create_missing_column_families: false,
            error_if_exists: false,
            max_background_jobs: 2,
            max_subcompactions: 1,
            wal_sync: SyncPolicy::Manual,
            wal_recovery_mode: WalRecoveryMode::TolerateCorruptedTail,
            block_cache_capacity: 8 * 1024 * 1024,
            write_stall_timeout: Duration::from_secs(10),
            statistics: None,
            cf: ColumnFamilyOptions::default(),
        }
    }
}

impl Options {
    pub fn set_create_if_missing(&mut self, v: bool) {
        self.create_if_missing = v;
    }

    pub fn set_create_missing_column_families(&mut self, v: bool) {
        self.create_missing_column_families = v;
    }

    #[must_use]
    pub fn max_background_jobs(&self) -> usize {
        self.max_background_jobs
    }

    /// Values below 1 are raised to 1.
    pub fn set_max_background_jobs(&mut self, jobs: usize) {
        self.max_background_jobs = jobs.max(1);
    }

    #[must_use]
    pub fn max_subcompactions(&self) -> u32 {
        self.max_subcompactions
    }

    pub fn set_max_subcompactions(&mut self, n: u32) {
        self.max_subcompactions = n.max(1);
    }

    /// Creates a statistics object if none is attached and returns it.
    pub fn enable_statistics(&mut self) -> Arc<Statistics> {
        self.statistics
            .get_or_insert_with(|| Arc::new(Statistics::new()))
            .clone()
    }

    pub fn set_merge_operator(&mut self, op: Arc<dyn MergeOperator>) {
        self.cf.set_merge_operator(op);
    }
}

/// Per-read options.
///
/// Iterate bounds are owned buffers: setting a bound replaces (and frees) the
/// previous one, so only the most recent bound affects iterators created
/// afterwards.
#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// Sequence watermark to read at; `None` reads the latest state.
    pub snapshot: Option<u64>,
    /// Populate the block cache with blocks read for this operation. Default `true`.
    pub fill_cache: bool,
    /// Verify block checksums. Default `true`.
    pub verify_checksums: bool,
    iterate_lower_bound: Option<Vec<u8>>,
    iterate_upper_bound: Option<Vec<u8>>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            snapshot: None,
            fill_cache: true,
            verify_checksums: true,
            iterate_lower_bound: None,
            iterate_upper_bound: None,
        }
    }
}

impl ReadOptions {
    /// Inclusive lower bound for iterators.
    pub fn set_iterate_lower_bound(&mut self, key: impl Into<Vec<u8>>) {
        self.iterate_lower_bound = Some(key.into());
    }

    /// Exclusive upper bound for iterators.
    pub fn set_iterate_upper_bound(&mut self, key: impl Into<Vec<u8>>) {
        self.iterate_upper_bound = Some(key.into());
    }

    pub fn clear_iterate_bounds(&mut self) {
        self.iterate_lower_bound = None;
        self.iterate_upper_bound = None;
    }

    #[must_use]
    pub fn iterate_lower_bound(&self) -> Option<&[u8]> {
        self.iterate_lower_bound.as_deref()
    }

    #[must_use]
    pub fn iterate_upper_bound(&self) -> Option<&[u8]> {
        self.iterate_upper_bound.as_deref()
    }

    pub fn set_fill_cache(&mut self, v: bool) {
        self.fill_cache = v;
    }
}

/// Per-write options.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteOptions {
    /// Force an fsync of the WAL before the write returns.
    pub sync: bool,
    /// Skip the WAL. Unflushed data written this way is lost on crash.
    pub disable_wal: bool,
    /// Return `Busy` instead of waiting when the write would stall.
    pub no_slowdown: bool,
}

/// Per-transaction options.
#[derive(Clone, Copy, Debug)]
pub struct TransactionOptions {
    /// Take the base snapshot at `begin`. Default `true`; when `false` reads
    /// see the latest committed state.
    pub set_snapshot: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self { set_snapshot: true }
    }
}
