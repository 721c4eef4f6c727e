use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::allocator::AllocatedBuf;
use crate::{MemoryAllocator, SystemAllocator};

/// Identifies one cached block: the owning database (see
/// [`BlockCache::new_id`]), the table file and the block's byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub owner: u64,
    pub file_number: u64,
    pub offset: u64,
}

impl CacheKey {
    pub fn new(owner: u64, file_number: u64, offset: u64) -> Self {
        Self {
            owner,
            file_number,
            offset,
        }
    }
}

/// Construction options for [`BlockCache::with_options`].
#[derive(Clone)]
pub struct LruCacheOptions {
    pub capacity: usize,
    pub allocator: Option<Arc<dyn MemoryAllocator>>,
}

impl LruCacheOptions {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            allocator: None,
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn set_memory_allocator(&mut self, allocator: Arc<dyn MemoryAllocator>) {
        self.allocator = Some(allocator);
    }
}

struct Entry {
    value: Bytes,
    charge: usize,
    pins: usize,
}

struct Inner {
    entries: HashMap<CacheKey, Entry>,
    /// Recency order of unpinned entries only; pinned entries are never
    /// candidates for eviction.
    evictable: LruCache<CacheKey, ()>,
    usage: usize,
    pinned_usage: usize,
}

/// Fixed-capacity LRU block cache with pinning.
///
/// All bookkeeping happens under one mutex, so each operation is atomic with
/// respect to the others.
pub struct BlockCache {
    capacity: usize,
    allocator: Arc<dyn MemoryAllocator>,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl BlockCache {
    /// Cache of `capacity` bytes backed by the [`SystemAllocator`].
    pub fn new_lru(capacity: usize) -> Arc<Self> {
        Self::with_options(LruCacheOptions::new(capacity))
    }

    pub fn with_options(opts: LruCacheOptions) -> Arc<Self> {
        let allocator = opts
            .allocator
            .unwrap_or_else(|| Arc::new(SystemAllocator));
        Arc::new(Self {
            capacity: opts.capacity,
            allocator,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                evictable: LruCache::unbounded(),
                usage: 0,
                pinned_usage: 0,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Hands out a fresh owner id for [`CacheKey::owner`].
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Copies `data` into an allocator buffer, inserts it with `charge` and
    /// returns a pinned handle.
    ///
    /// If `key` is already resident the existing entry is pinned and
    /// returned instead; `data` is ignored.
    pub fn insert(self: &Arc<Self>, key: CacheKey, data: &[u8], charge: usize) -> CacheHandle {
        let mut inner = self.inner.lock();
        if let Some(value) = pin_locked(&mut inner, &key) {
            return self.handle(key, value);
        }

        let value = Bytes::from_owner(AllocatedBuf::copy_from(&self.allocator, data));
        inner.entries.insert(
            key,
            Entry {
                value: value.clone(),
                charge,
                pins: 1,
            },
        );
        inner.usage += charge;
        inner.pinned_usage += charge;
        self.evict_locked(&mut inner);
        drop(inner);

        self.handle(key, value)
    }

    /// Pins and returns the entry for `key`, refreshing its recency.
    pub fn lookup(self: &Arc<Self>, key: &CacheKey) -> Option<CacheHandle> {
        let mut inner = self.inner.lock();
        let value = pin_locked(&mut inner, key)?;
        drop(inner);
        Some(self.handle(*key, value))
    }

    /// Unpins the handle's entry. Equivalent to dropping the handle.
    pub fn release(&self, handle: CacheHandle) {
        drop(handle);
    }

    /// Total charge of resident entries, pinned or not.
    pub fn get_usage(&self) -> usize {
        self.inner.lock().usage
    }

    /// Total charge of entries with at least one live handle.
    pub fn get_pinned_usage(&self) -> usize {
        self.inner.lock().pinned_usage
    }

    pub fn get_capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn allocator_name(&self) -> String {
        self.allocator.name().to_string()
    }

    fn handle(self: &Arc<Self>, key: CacheKey, value: Bytes) -> CacheHandle {
        CacheHandle {
            cache: Arc::clone(self),
            key,
            value,
        }
    }

    fn unpin(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(key) else {
            return;
        };
        entry.pins = entry.pins.saturating_sub(1);
        if entry.pins > 0 {
            return;
        }
        let charge = entry.charge;
        inner.pinned_usage -= charge;
        inner.evictable.put(*key, ());
        self.evict_locked(&mut inner);
    }

    fn evict_locked(&self, inner: &mut Inner) {
        while inner.usage > self.capacity {
            let Some((victim, ())) = inner.evictable.pop_lru() else {
                break;
            };
            if let Some(entry) = inner.entries.remove(&victim) {
                inner.usage -= entry.charge;
                trace!(
                    file = victim.file_number,
                    offset = victim.offset,
                    charge = entry.charge,
                    "evicted block"
                );
            }
        }
    }
}

fn pin_locked(inner: &mut Inner, key: &CacheKey) -> Option<Bytes> {
    let entry = inner.entries.get_mut(key)?;
    entry.pins += 1;
    let value = entry.value.clone();
    if entry.pins == 1 {
        let charge = entry.charge;
        inner.pinned_usage += charge;
        inner.evictable.pop(key);
    }
    Some(value)
}

impl fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BlockCache")
            .field("capacity", &self.capacity)
            .field("usage", &inner.usage)
            .field("pinned_usage", &inner.pinned_usage)
            .field("entries", &inner.entries.len())
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

/// A pinned reference to a cache entry. Unpins on drop.
pub struct CacheHandle {
    cache: Arc<BlockCache>,
    key: CacheKey,
    value: Bytes,
}

impl CacheHandle {
    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        self.cache.unpin(&self.key);
    }
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("key", &self.key)
            .field("len", &self.value.len())
            .finish()
    }
}
