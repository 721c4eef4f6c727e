//! # Config - ShaleKV configuration surface
//!
//! Every tunable of the engine lives here as a named, independently settable
//! field with a documented default. Runtime collaborators that are shared
//! between databases (the block cache, the statistics object, merge
//! operators) are attached to the options by `Arc`, so their lifecycle is
//! owned by the caller rather than by hidden globals.
//!
//! | Type                    | Scope                                        |
//! |-------------------------|----------------------------------------------|
//! | [`Options`]             | database-wide (WAL, background work, stalls) |
//! | [`ColumnFamilyOptions`] | per column family (memtable, levels)         |
//! | [`TableOptions`]        | per column family table format               |
//! | [`ReadOptions`]         | per read / iterator                          |
//! | [`WriteOptions`]        | per write                                    |
//! | [`TransactionOptions`]  | per optimistic transaction                   |
//!
//! [`Options::from_env`] layers `SHALE_*` environment variables over the
//! defaults:
//!
//! ```text
//! SHALE_WRITE_BUFFER_KB      memtable flush threshold in KiB  (default: 4096)
//! SHALE_WAL_SYNC             fsync every WAL append           (default: "false")
//! SHALE_L0_TRIGGER           L0 compaction trigger            (default: 4)
//! SHALE_MAX_BACKGROUND_JOBS  background worker threads        (default: 2)
//! SHALE_BLOCK_CACHE_KB       block cache capacity in KiB      (default: 8192)
//! SHALE_COMPRESSION          none | lz4 | zstd                (default: none)
//! ```

mod env;
mod merge;
mod options;

pub use env::ConfigError;
pub use merge::{MergeOperator, StringAppendOperator, UInt64AddOperator};
pub use options::{
    ColumnFamilyOptions, CompressionType, Options, ReadOptions, SyncPolicy, TableOptions,
    TransactionOptions, WalRecoveryMode, WriteOptions,
};

/// Name of the column family every database has.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

#[cfg(test)]
mod tests;
