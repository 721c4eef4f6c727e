//! Approximate memory accounting by category.

use std::sync::Arc;

use cache::BlockCache;

use crate::{Db, DbInner};

/// Bytes in use, by category. All figures are approximate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Every memtable still in memory, including flushed ones that readers
    /// hold on to.
    pub mem_table_total: u64,
    /// Memtables whose data is not in a table yet.
    pub mem_table_unflushed: u64,
    /// Index and filter blocks held by table readers outside the cache.
    pub mem_table_readers_total: u64,
    /// Block cache usage.
    pub cache_total: u64,
}

/// Sums the usage of `dbs` and `caches`. A cache listed more than once is
/// counted once; caches used by the databases but not listed are ignored.
pub fn approximate_memory_usage_by_type(dbs: &[&Db], caches: &[&Arc<BlockCache>]) -> MemoryUsage {
    let mut usage = MemoryUsage::default();
    for db in dbs {
        db.inner.add_memtable_usage(&mut usage);
    }

    let mut seen: Vec<*const BlockCache> = Vec::with_capacity(caches.len());
    for cache in caches {
        let ptr = Arc::as_ptr(cache);
        if seen.contains(&ptr) {
            continue;
        }
        seen.push(ptr);
        usage.cache_total += cache.get_usage() as u64;
    }
    usage
}

impl DbInner {
    fn add_memtable_usage(&self, usage: &mut MemoryUsage) {
        let mut unflushed = 0u64;
        let mut readers = 0u64;
        for cf in self.cfs.read().values() {
            let sv = cf.super_version();
            unflushed += sv.unflushed_memory() as u64;
            readers += sv.version.table_readers_memory() as u64;
        }

        let retired: u64 = {
            let mut list = self.retired.lock();
            list.retain(|w| w.strong_count() > 0);
            list.iter()
                .filter_map(|w| w.upgrade())
                .map(|m| m.approximate_memory_usage() as u64)
                .sum()
        };

        usage.mem_table_unflushed += unflushed;
        usage.mem_table_total += unflushed + retired;
        usage.mem_table_readers_total += readers;
    }
}
