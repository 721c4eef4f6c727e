use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bloom::FilterPolicy;
use bytes::Bytes;
use cache::{BlockCache, CacheHandle, CacheKey, Statistics, Ticker};
use config::ReadOptions;
use memtable::{InternalKey, ValueType, VersionedValue};
use parking_lot::Mutex;

use crate::block::Block;
use crate::error::{corruption, Result};
use crate::format::{decode_block, BlockHandle, Footer, BLOCK_TRAILER_SIZE, FOOTER_SIZE};
use crate::iterator::TableIter;
use crate::properties::TableProperties;

/// Largest stored block a reader will allocate for. Guards against handles
/// read from a damaged file.
const MAX_BLOCK_BYTES: u64 = 256 * 1024 * 1024;

/// How a table reader shares the block cache.
#[derive(Clone)]
pub struct TableReaderOptions {
    pub file_number: u64,
    pub block_cache: Arc<BlockCache>,
    /// Namespace for this table's cache keys, usually one id per database.
    pub cache_owner: u64,
    pub cache_index_and_filter_blocks: bool,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub statistics: Option<Arc<Statistics>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Data,
    Index,
    Filter,
}

impl BlockKind {
    fn hit(self) -> Ticker {
        match self {
            BlockKind::Data => Ticker::BlockCacheDataHit,
            BlockKind::Index => Ticker::BlockCacheIndexHit,
            BlockKind::Filter => Ticker::BlockCacheFilterHit,
        }
    }

    fn miss(self) -> Ticker {
        match self {
            BlockKind::Data => Ticker::BlockCacheDataMiss,
            BlockKind::Index => Ticker::BlockCacheIndexMiss,
            BlockKind::Filter => Ticker::BlockCacheFilterMiss,
        }
    }
}

/// Block contents that stay valid for as long as this value lives. When the
/// bytes came from the cache the entry stays pinned until it is dropped.
pub(crate) struct BlockRef {
    pub(crate) data: Bytes,
    _pin: Option<CacheHandle>,
}

impl BlockRef {
    pub(crate) fn cache_key(&self) -> Option<CacheKey> {
        self._pin.as_ref().map(CacheHandle::key)
    }
}

/// An open, immutable table file.
///
/// Point lookups consult the filter first, then binary-search the index and
/// one data block. Data blocks are always read through the shared
/// [`BlockCache`]; index and filter blocks are either held by the reader or,
/// with `cache_index_and_filter_blocks`, charged to the cache as well.
///
/// The file handle sits behind a `Mutex` so a reader can be shared between
/// threads through `Arc<Table>`.
pub struct Table {
    path: PathBuf,
    file: Mutex<File>,
    file_number: u64,
    file_size: u64,
    footer: Footer,
    props: TableProperties,
    cache: Arc<BlockCache>,
    cache_owner: u64,
    index: Option<Block>,
    filter: Option<Bytes>,
    filter_policy: Option<Arc<dyn FilterPolicy>>,
    stats: Option<Arc<Statistics>>,
}

impl Table {
    /// Opens `path`, validating its footer and loading the properties block.
    ///
    /// Fails with `Corruption` when the file is too small, carries the wrong
    /// magic or version, or its properties fail their checksum.
    pub fn open<P: AsRef<Path>>(path: P, opts: TableReaderOptions) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_SIZE as u64 {
            return Err(corruption(format!(
                "{} is too small to be a table ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut footer_buf = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::Start(file_size - FOOTER_SIZE as u64))?;
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let props_raw = read_stored(&mut file, footer.properties, file_size)?;
        let props_block = Block::new(Bytes::from(decode_block(&props_raw, true)?))?;
        let props = TableProperties::decode(&props_block)?;

        let mut index = None;
        let mut filter = None;
        if !opts.cache_index_and_filter_blocks {
            let raw = read_stored(&mut file, footer.index, file_size)?;
            index = Some(Block::new(Bytes::from(decode_block(&raw, true)?))?);
            if !footer.filter.is_null() {
                let raw = read_stored(&mut file, footer.filter, file_size)?;
                filter = Some(Bytes::from(decode_block(&raw, true)?));
            }
        }

        Ok(Arc::new(Self {
            path,
            file: Mutex::new(file),
            file_number: opts.file_number,
            file_size,
            footer,
            props,
            cache: opts.block_cache,
            cache_owner: opts.cache_owner,
            index,
            filter,
            filter_policy: opts.filter_policy,
            stats: opts.statistics,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn properties(&self) -> &TableProperties {
        &self.props
    }

    /// Memory held by this reader outside the block cache.
    pub fn approximate_memory_usage(&self) -> usize {
        self.index.as_ref().map_or(0, Block::size) + self.filter.as_ref().map_or(0, Bytes::len)
    }

    fn record(&self, ticker: Ticker) {
        if let Some(stats) = &self.stats {
            stats.record(ticker, 1);
        }
    }

    /// `false` only when the filter proves `user_key` is absent.
    pub fn key_may_match(&self, user_key: &[u8], ro: &ReadOptions) -> Result<bool> {
        let policy = match &self.filter_policy {
            Some(p) if !self.footer.filter.is_null() && p.name() == self.props.filter_policy => p,
            _ => return Ok(true),
        };
        let may_match = match &self.filter {
            Some(bits) => policy.key_may_match(user_key, bits),
            None => {
                let blk = self.load_block(self.footer.filter, BlockKind::Filter, ro)?;
                policy.key_may_match(user_key, &blk.data)
            }
        };
        Ok(may_match)
    }

    /// Versions of `user_key` with sequence `<= seq`, newest first, stopping
    /// after the first value or tombstone.
    pub fn get(
        self: &Arc<Self>,
        user_key: &[u8],
        seq: u64,
        ro: &ReadOptions,
    ) -> Result<Vec<VersionedValue>> {
        Ok(self.lookup(user_key, seq, ro, false)?.0)
    }

    /// Like [`Table::get`], but also pins the data block holding the last
    /// returned version so its bytes stay charged to the cache.
    pub fn get_pinned(
        self: &Arc<Self>,
        user_key: &[u8],
        seq: u64,
        ro: &ReadOptions,
    ) -> Result<(Vec<VersionedValue>, Option<CacheHandle>)> {
        self.lookup(user_key, seq, ro, true)
    }

    fn lookup(
        self: &Arc<Self>,
        user_key: &[u8],
        seq: u64,
        ro: &ReadOptions,
        pin: bool,
    ) -> Result<(Vec<VersionedValue>, Option<CacheHandle>)> {
        if !self.key_may_match(user_key, ro)? {
            self.record(Ticker::BloomFilterUseful);
            return Ok((Vec::new(), None));
        }

        let mut it = TableIter::new(Arc::clone(self), ro, None, None)?;
        it.seek(&InternalKey::seek_key(user_key, seq))?;
        let mut out = Vec::new();
        let mut handle = None;
        while let Some(entry) = it.next() {
            let (key, value) = entry?;
            if key.user_key != user_key {
                break;
            }
            let done = key.vtype != ValueType::Merge;
            out.push(VersionedValue {
                seq: key.seq,
                vtype: key.vtype,
                value,
            });
            if done {
                if pin {
                    handle = it.pin_current_block();
                }
                break;
            }
        }
        Ok((out, handle))
    }

    /// Forward iterator over every record, honoring the iterate bounds in
    /// `ro`. Starts positioned at the first record inside the bounds.
    pub fn iter(self: &Arc<Self>, ro: &ReadOptions) -> Result<TableIter> {
        TableIter::new(
            Arc::clone(self),
            ro,
            ro.iterate_lower_bound().map(<[u8]>::to_vec),
            ro.iterate_upper_bound().map(<[u8]>::to_vec),
        )
    }

    pub(crate) fn index_block(&self, ro: &ReadOptions) -> Result<(Block, BlockRef)> {
        match &self.index {
            Some(block) => Ok((
                block.clone(),
                BlockRef {
                    data: Bytes::new(),
                    _pin: None,
                },
            )),
            None => {
                let blk = self.load_block(self.footer.index, BlockKind::Index, ro)?;
                Ok((Block::new(blk.data.clone())?, blk))
            }
        }
    }

    pub(crate) fn repin(&self, key: &CacheKey) -> Option<CacheHandle> {
        self.cache.lookup(key)
    }

    /// Fetches a block through the cache, reading and (if `fill_cache`)
    /// inserting it on a miss.
    pub(crate) fn load_block(
        &self,
        handle: BlockHandle,
        kind: BlockKind,
        ro: &ReadOptions,
    ) -> Result<BlockRef> {
        let key = CacheKey::new(self.cache_owner, self.file_number, handle.offset);
        if let Some(pin) = self.cache.lookup(&key) {
            self.record(Ticker::BlockCacheHit);
            self.record(kind.hit());
            return Ok(BlockRef {
                data: pin.value().clone(),
                _pin: Some(pin),
            });
        }
        self.record(Ticker::BlockCacheMiss);
        self.record(kind.miss());

        let stored = {
            let mut file = self.file.lock();
            read_stored(&mut file, handle, self.file_size)?
        };
        let contents = decode_block(&stored, ro.verify_checksums)?;
        if ro.fill_cache {
            let pin = self.cache.insert(key, &contents, contents.len());
            self.record(Ticker::BlockCacheAdd);
            return Ok(BlockRef {
                data: pin.value().clone(),
                _pin: Some(pin),
            });
        }
        Ok(BlockRef {
            data: Bytes::from(contents),
            _pin: None,
        })
    }
}

/// Reads the stored bytes of `handle` plus its trailer.
fn read_stored(file: &mut File, handle: BlockHandle, file_size: u64) -> Result<Vec<u8>> {
    let len = handle.size + BLOCK_TRAILER_SIZE as u64;
    let end = handle
        .offset
        .checked_add(len)
        .ok_or_else(|| corruption("block handle overflows"))?;
    if end > file_size - FOOTER_SIZE as u64 || handle.size > MAX_BLOCK_BYTES {
        return Err(corruption(format!(
            "block handle {}+{} outside table of {} bytes",
            handle.offset, handle.size, file_size
        )));
    }
    file.seek(SeekFrom::Start(handle.offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
