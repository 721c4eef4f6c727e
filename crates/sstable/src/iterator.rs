use std::sync::Arc;

use bytes::Bytes;
use cache::CacheHandle;
use config::ReadOptions;
use memtable::{compare_internal_keys, InternalKey, MAX_SEQUENCE};

use crate::block::Block;
use crate::error::{corruption, Result};
use crate::format::BlockHandle;
use crate::reader::{BlockKind, BlockRef, Table};

/// Two-level iterator: walks the index block and loads each data block on
/// demand.
///
/// The data block under the cursor stays pinned in the block cache until the
/// iterator moves past it or is dropped. User keys outside `[lower, upper)`
/// are never yielded. After an error the iterator is exhausted.
pub struct TableIter {
    table: Arc<Table>,
    ro: ReadOptions,
    index: Block,
    _index_pin: BlockRef,
    index_pos: usize,
    data: Option<(Block, BlockRef)>,
    data_pos: usize,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    done: bool,
}

impl TableIter {
    pub(crate) fn new(
        table: Arc<Table>,
        ro: &ReadOptions,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
    ) -> Result<Self> {
        let (index, index_pin) = table.index_block(ro)?;
        let mut it = Self {
            table,
            ro: ro.clone(),
            index,
            _index_pin: index_pin,
            index_pos: 0,
            data: None,
            data_pos: 0,
            lower,
            upper,
            done: false,
        };
        it.seek_to_first()?;
        Ok(it)
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        match self.lower.clone() {
            Some(lower) => self.seek(&InternalKey::seek_key(&lower, MAX_SEQUENCE)),
            None => {
                self.index_pos = 0;
                self.data = None;
                self.data_pos = 0;
                self.done = false;
                Ok(())
            }
        }
    }

    /// Positions at the first record `>= target`, clamped to the lower
    /// bound.
    pub fn seek(&mut self, target: &InternalKey) -> Result<()> {
        let mut encoded = target.encode();
        if let Some(lower) = &self.lower {
            if target.user_key[..] < lower[..] {
                encoded = InternalKey::seek_key(lower, MAX_SEQUENCE).encode();
            }
        }

        self.done = false;
        self.data = None;
        self.data_pos = 0;
        self.index_pos = self.index.seek(&encoded, compare_internal_keys)?;
        if self.index_pos >= self.index.len() {
            return Ok(());
        }
        self.load_next_block()?;
        if let Some((block, _)) = &self.data {
            self.data_pos = block.seek(&encoded, compare_internal_keys)?;
        }
        Ok(())
    }

    /// A second pin on the data block under the cursor, if it lives in the
    /// block cache.
    pub fn pin_current_block(&self) -> Option<CacheHandle> {
        let (_, blk) = self.data.as_ref()?;
        self.table.repin(&blk.cache_key()?)
    }

    fn load_next_block(&mut self) -> Result<()> {
        // drop the previous pin before taking the next one
        self.data = None;
        self.data_pos = 0;
        let (_, encoded) = self.index.entry(self.index_pos)?;
        self.index_pos += 1;
        let handle = BlockHandle::decode(&encoded)?;
        let pin = self.table.load_block(handle, BlockKind::Data, &self.ro)?;
        let block = Block::new(pin.data.clone())?;
        self.data = Some((block, pin));
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<(InternalKey, Bytes)>> {
        loop {
            if let Some((block, _)) = &self.data {
                if self.data_pos < block.len() {
                    let (key, value) = block.entry(self.data_pos)?;
                    self.data_pos += 1;
                    let ikey = InternalKey::decode_shared(&key)
                        .ok_or_else(|| corruption("malformed internal key in data block"))?;
                    if let Some(upper) = &self.upper {
                        if ikey.user_key[..] >= upper[..] {
                            return Ok(None);
                        }
                    }
                    return Ok(Some((ikey, value)));
                }
            }
            if self.index_pos >= self.index.len() {
                return Ok(None);
            }
            self.load_next_block()?;
        }
    }
}

impl Iterator for TableIter {
    type Item = Result<(InternalKey, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                self.data = None;
                None
            }
            Err(e) => {
                self.done = true;
                self.data = None;
                Some(Err(e))
            }
        }
    }
}
