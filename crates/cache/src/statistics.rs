use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Named counters exposed through [`Statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Ticker {
    BlockCacheMiss,
    BlockCacheHit,
    BlockCacheAdd,
    BlockCacheDataMiss,
    BlockCacheDataHit,
    BlockCacheIndexMiss,
    BlockCacheIndexHit,
    BlockCacheFilterMiss,
    BlockCacheFilterHit,
    /// Point lookups that skipped a table because its filter ruled the key out.
    BloomFilterUseful,
    MemtableHit,
    MemtableMiss,
    /// Versions dropped by compaction because no reader can observe them.
    CompactionKeyDropObsolete,
    /// Total microseconds writers spent stalled.
    StallMicros,
}

impl Ticker {
    pub const ALL: [Ticker; 14] = [
        Ticker::BlockCacheMiss,
        Ticker::BlockCacheHit,
        Ticker::BlockCacheAdd,
        Ticker::BlockCacheDataMiss,
        Ticker::BlockCacheDataHit,
        Ticker::BlockCacheIndexMiss,
        Ticker::BlockCacheIndexHit,
        Ticker::BlockCacheFilterMiss,
        Ticker::BlockCacheFilterHit,
        Ticker::BloomFilterUseful,
        Ticker::MemtableHit,
        Ticker::MemtableMiss,
        Ticker::CompactionKeyDropObsolete,
        Ticker::StallMicros,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Ticker::BlockCacheMiss => "shale.block.cache.miss",
            Ticker::BlockCacheHit => "shale.block.cache.hit",
            Ticker::BlockCacheAdd => "shale.block.cache.add",
            Ticker::BlockCacheDataMiss => "shale.block.cache.data.miss",
            Ticker::BlockCacheDataHit => "shale.block.cache.data.hit",
            Ticker::BlockCacheIndexMiss => "shale.block.cache.index.miss",
            Ticker::BlockCacheIndexHit => "shale.block.cache.index.hit",
            Ticker::BlockCacheFilterMiss => "shale.block.cache.filter.miss",
            Ticker::BlockCacheFilterHit => "shale.block.cache.filter.hit",
            Ticker::BloomFilterUseful => "shale.bloom.filter.useful",
            Ticker::MemtableHit => "shale.memtable.hit",
            Ticker::MemtableMiss => "shale.memtable.miss",
            Ticker::CompactionKeyDropObsolete => "shale.compaction.key.drop.obsolete",
            Ticker::StallMicros => "shale.stall.micros",
        }
    }
}

/// Monotonic ticker counters shared by every component of a database.
///
/// Counters are relaxed atomics: each value is exact, but a set of counters
/// read one after another is not a consistent snapshot.
pub struct Statistics {
    tickers: [AtomicU64; Ticker::ALL.len()],
}

impl Statistics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tickers: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn record(&self, ticker: Ticker, count: u64) {
        self.tickers[ticker as usize].fetch_add(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get_ticker_count(&self, ticker: Ticker) -> u64 {
        self.tickers[ticker as usize].load(Ordering::Relaxed)
    }

    /// Returns the current count and resets the ticker to zero.
    pub fn get_and_reset_ticker_count(&self, ticker: Ticker) -> u64 {
        self.tickers[ticker as usize].swap(0, Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for t in &self.tickers {
            t.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for t in Ticker::ALL {
            map.entry(&t.name(), &self.get_ticker_count(t));
        }
        map.finish()
    }
}

/// One `name COUNT : value` line per ticker.
impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in Ticker::ALL {
            writeln!(f, "{} COUNT : {}", t.name(), self.get_ticker_count(t))?;
        }
        Ok(())
    }
}
