//! # Cache - shared block cache with pinning
//!
//! Table readers load data, index and filter blocks through a
//! [`BlockCache`]. The cache is created by the caller, wrapped in an `Arc`
//! and handed to any number of databases through their table options; each
//! database tags its keys with an owner id from [`BlockCache::new_id`] so
//! blocks from different databases never collide.
//!
//! ## Pinning
//!
//! Every successful [`BlockCache::insert`] or [`BlockCache::lookup`] returns a
//! [`CacheHandle`]. While at least one handle to an entry is alive the entry
//! is pinned: it is counted in [`BlockCache::get_pinned_usage`] and is never
//! evicted. Dropping (or [`release`](CacheHandle::release)-ing) the last
//! handle makes the entry evictable again.
//!
//! Capacity is fixed at construction. When an insert pushes usage past
//! capacity, least-recently-used unpinned entries are evicted until usage
//! fits or nothing evictable remains; in the latter case usage stays above
//! capacity until pins are released.
//!
//! The crate also hosts the [`Statistics`] ticker counters, since the cache
//! is the first layer that records them.

mod allocator;
mod block_cache;
mod statistics;

pub use allocator::{MemoryAllocator, SystemAllocator};
pub use block_cache::{BlockCache, CacheHandle, CacheKey, LruCacheOptions};
pub use statistics::{Statistics, Ticker};
