
use std::path::Path;
use std::sync::Arc;

use bloom::{BloomFilterPolicy, FilterPolicy};
use cache::{BlockCache, Statistics};
use memtable::{InternalKey, ValueType};

use crate::{Table, TableBuilder, TableBuilderOptions, TableProperties, TableReaderOptions};

pub(crate) fn put_key(k: &str, seq: u64) -> InternalKey {
    InternalKey::new(k.as_bytes().to_vec(), seq, ValueType::Value)
}

pub(crate) fn del_key(k: &str, seq: u64) -> InternalKey {
    InternalKey::new(k.as_bytes().to_vec(), seq, ValueType::Deletion)
}

pub(crate) fn merge_key(k: &str, seq: u64) -> InternalKey {
    InternalKey::new(k.as_bytes().to_vec(), seq, ValueType::Merge)
}

/// `count` keys `key0000..`, one version each, value `v{i}`.
pub(crate) fn numbered(count: usize) -> Vec<(InternalKey, Vec<u8>)> {
    (0..count)
        .map(|i| {
            (
                put_key(&format!("key{:04}", i), i as u64 + 1),
                format!("v{}", i).into_bytes(),
            )
        })
        .collect()
}

pub(crate) fn build(
    path: &Path,
    opts: TableBuilderOptions,
    entries: &[(InternalKey, Vec<u8>)],
) -> anyhow::Result<TableProperties> {
    let mut b = TableBuilder::create(path, opts)?;
    for (k, v) in entries {
        b.add(k, v)?;
    }
    Ok(b.finish()?)
}

/// Builder options that cut a block every `block_size` bytes.
pub(crate) fn small_blocks(block_size: usize) -> TableBuilderOptions {
    TableBuilderOptions {
        block_size,
        ..TableBuilderOptions::default()
    }
}

pub(crate) fn reader_opts(cache: &Arc<BlockCache>) -> TableReaderOptions {
    TableReaderOptions {
        file_number: 1,
        block_cache: Arc::clone(cache),
        cache_owner: cache.new_id(),
        cache_index_and_filter_blocks: false,
        filter_policy: Some(Arc::new(BloomFilterPolicy::new(10)) as Arc<dyn FilterPolicy>),
        statistics: Some(Arc::new(Statistics::new())),
    }
}

pub(crate) fn open(path: &Path, cache: &Arc<BlockCache>) -> anyhow::Result<Arc<Table>> {
    Ok(Table::open(path, reader_opts(cache))?)
}
