use super::helpers::{key, small_options, test_options, value};
use crate::*;
use anyhow::Result;
use cache::{BlockCache, LruCacheOptions, MemoryAllocator};
use config::ReadOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

#[derive(Default)]
struct CountingAllocator {
    live: AtomicUsize,
}

impl MemoryAllocator for CountingAllocator {
    fn name(&self) -> &str {
        "CountingAllocator"
    }

    fn allocate(&self, size: usize) -> Vec<u8> {
        self.live.fetch_add(size, Ordering::SeqCst);
        vec![0u8; size]
    }

    fn deallocate(&self, buf: Vec<u8>) {
        self.live.fetch_sub(buf.len(), Ordering::SeqCst);
    }
}

fn fill(db: &Db, n: usize) -> crate::Result<()> {
    for i in 0..n {
        db.put(key(i), value(i))?;
    }
    Ok(())
}

#[test]
fn fresh_database_uses_no_memtable_memory() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), &test_options())?;

    let usage = db.memory_usage();
    assert_eq!(usage.mem_table_unflushed, 0);
    assert_eq!(usage.mem_table_total, 0);
    assert_eq!(usage.mem_table_readers_total, 0);
    Ok(())
}

#[test]
fn writes_grow_unflushed_memory() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), &test_options())?;

    fill(&db, 10)?;
    let small = db.memory_usage();
    fill(&db, 100)?;
    let large = db.memory_usage();

    assert!(small.mem_table_unflushed > 0);
    assert!(large.mem_table_unflushed > small.mem_table_unflushed);
    assert_eq!(large.mem_table_total, large.mem_table_unflushed);
    Ok(())
}

#[test]
fn flush_moves_memory_to_table_readers() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), &small_options())?;
    db.put(b"k", b"v")?;
    db.flush()?;

    let usage = db.memory_usage();
    assert_eq!(usage.mem_table_unflushed, 0);
    assert_eq!(usage.mem_table_total, 0);
    assert!(usage.mem_table_readers_total > 0);
    Ok(())
}

#[test]
fn flushed_memtable_counts_while_an_iterator_holds_it() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), &small_options())?;
    db.put(b"k", b"v")?;

    let it = db.new_iterator(&ReadOptions::default())?;
    db.flush()?;
    let held = db.memory_usage();
    assert_eq!(held.mem_table_unflushed, 0);
    assert!(held.mem_table_total > 0);

    drop(it);
    assert_eq!(db.memory_usage().mem_table_total, 0);
    Ok(())
}

#[test]
fn cache_usage_is_reported() -> Result<()> {
    let dir = tempdir()?;
    let cache = BlockCache::new_lru(1 << 20);
    let mut opts = small_options();
    opts.cf.table.set_block_cache(Arc::clone(&cache));

    let db = Db::open(dir.path(), &opts)?;
    db.put(b"k", b"v")?;
    db.flush()?;
    db.get(b"k")?;

    assert!(cache.get_usage() > 0);
    assert!(db.memory_usage().cache_total >= cache.get_usage() as u64);
    Ok(())
}

#[test]
fn shared_cache_is_counted_once() -> Result<()> {
    let dir_a = tempdir()?;
    let dir_b = tempdir()?;
    let shared = BlockCache::new_lru(1 << 20);
    let mut opts = test_options();
    opts.cf.table.set_block_cache(Arc::clone(&shared));

    let a = Db::open(dir_a.path(), &opts)?;
    let b = Db::open(dir_b.path(), &opts)?;
    for db in [&a, &b] {
        fill(db, 20)?;
        db.flush()?;
        db.get(key(3))?;
    }

    let usage = approximate_memory_usage_by_type(&[&a, &b], &[&shared, &shared]);
    assert_eq!(usage.cache_total, shared.get_usage() as u64);
    assert_eq!(
        usage.mem_table_readers_total,
        a.memory_usage().mem_table_readers_total + b.memory_usage().mem_table_readers_total
    );
    Ok(())
}

#[test]
fn cache_blocks_come_from_the_configured_allocator() -> Result<()> {
    let dir = tempdir()?;
    let allocator = Arc::new(CountingAllocator::default());
    let mut cache_opts = LruCacheOptions::new(1 << 20);
    cache_opts.set_memory_allocator(Arc::clone(&allocator) as Arc<dyn MemoryAllocator>);
    let cache = BlockCache::with_options(cache_opts);

    let mut opts = small_options();
    opts.cf.table.set_block_cache(Arc::clone(&cache));
    {
        let db = Db::open(dir.path(), &opts)?;
        fill(&db, 50)?;
        db.flush()?;
        for i in 0..50 {
            assert_eq!(db.get(key(i))?, Some(value(i)));
        }
        assert!(allocator.live.load(Ordering::SeqCst) > 0);
        assert_eq!(allocator.live.load(Ordering::SeqCst), cache.get_usage());
    }
    Ok(())
}
