//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk tables for the ShaleKV storage engine.
//!
//! When a memtable is flushed, or compaction merges older tables, records
//! are streamed in internal-key order into a [`TableBuilder`]. Tables are
//! *write-once, read-many*: once installed they are never modified, only
//! replaced by compaction and deleted when no version references them.
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS   [key_len|internal key|val_len|val]...       │
//! │               [offsets...][count]  + 5-byte trailer       │
//! ├──────────────────────────────────────────────────────────┤
//! │ FILTER BLOCK  bloom bits over user keys (optional)        │
//! ├──────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK   last internal key of each data block        │
//! │               -> block handle                             │
//! ├──────────────────────────────────────────────────────────┤
//! │ PROPERTIES    entry counts, key range, seq range, sizes   │
//! ├──────────────────────────────────────────────────────────┤
//! │ FOOTER (64 B) filter/index/properties handles,            │
//! │               version, magic "SHALESST"                   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Data blocks may be compressed with LZ4 or Zstd. Every block carries a
//! CRC32 in its trailer. See [`format`] for the exact trailer and footer
//! encodings.
//!
//! ## Reading
//!
//! [`Table`] serves point lookups and iteration. Data blocks are loaded
//! through the shared [`cache::BlockCache`]; an iterator keeps the block
//! under its cursor pinned.

mod block;
mod builder;
mod compress;
mod error;
pub mod format;
mod iterator;
mod merge;
mod properties;
mod reader;

pub use block::{Block, BlockBuilder};
pub use builder::{TableBuilder, TableBuilderOptions};
pub use compress::{compress, decompress};
pub use error::{Result, SstError};
pub use iterator::TableIter;
pub use merge::{KvIter, MergeIterator};
pub use properties::TableProperties;
pub use reader::{Table, TableReaderOptions};

/// File name of table `number`.
pub fn table_file_name(number: u64) -> String {
    format!("{:06}.sst", number)
}

/// Inverse of [`table_file_name`].
pub fn parse_table_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".sst")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
mod tests;
