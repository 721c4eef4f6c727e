//! Key/value blocks.
//!
//! Data, index and properties blocks share one layout:
//!
//! ```text
//! [key_len: u32][key][val_len: u32][val] ...   entries
//! [offset: u32] ...                             one per entry
//! [count: u32]
//! ```
//!
//! Entry offsets let [`Block::seek`] binary-search without decoding every
//! entry.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use std::cmp::Ordering;

use crate::error::{corruption, Result};

pub struct BlockBuilder {
    buf: Vec<u8>,
    offsets: Vec<u32>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            offsets: Vec::new(),
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        self.offsets.push(self.buf.len() as u32);
        self.buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Size of the block if it were finished now.
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + 4 * self.offsets.len() + 4
    }

    /// Appends the offset array and count, returns the encoded block, and
    /// resets the builder.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.buf);
        for off in &self.offsets {
            out.extend_from_slice(&off.to_le_bytes());
        }
        out.extend_from_slice(&(self.offsets.len() as u32).to_le_bytes());
        self.offsets.clear();
        out
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded block. Cloning is cheap: entries are slices of shared bytes.
#[derive(Clone)]
pub struct Block {
    data: Bytes,
    offsets_start: usize,
    count: usize,
}

impl Block {
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(corruption("block too short"));
        }
        let count = LittleEndian::read_u32(&data[data.len() - 4..]) as usize;
        let offsets_len = count
            .checked_mul(4)
            .filter(|n| n + 4 <= data.len())
            .ok_or_else(|| corruption("block entry count out of range"))?;
        let offsets_start = data.len() - 4 - offsets_len;
        let block = Self {
            data,
            offsets_start,
            count,
        };
        for i in 0..count {
            if block.offset(i) >= offsets_start {
                return Err(corruption("block entry offset out of range"));
            }
        }
        Ok(block)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Bytes held by this block, including its offset array.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn offset(&self, i: usize) -> usize {
        let at = self.offsets_start + 4 * i;
        LittleEndian::read_u32(&self.data[at..at + 4]) as usize
    }

    /// Entry `i` as `(key, value)` slices of the block.
    pub fn entry(&self, i: usize) -> Result<(Bytes, Bytes)> {
        if i >= self.count {
            return Err(corruption("block entry index out of range"));
        }
        let end = self.offsets_start;
        let mut pos = self.offset(i);

        let klen = read_len(&self.data[..end], pos)?;
        pos += 4;
        if pos + klen > end {
            return Err(corruption("block key overruns entries"));
        }
        let key = self.data.slice(pos..pos + klen);
        pos += klen;

        let vlen = read_len(&self.data[..end], pos)?;
        pos += 4;
        if pos + vlen > end {
            return Err(corruption("block value overruns entries"));
        }
        let value = self.data.slice(pos..pos + vlen);
        Ok((key, value))
    }

    fn key_at(&self, i: usize) -> Result<&[u8]> {
        let end = self.offsets_start;
        let pos = self.offset(i);
        let klen = read_len(&self.data[..end], pos)?;
        if pos + 4 + klen > end {
            return Err(corruption("block key overruns entries"));
        }
        Ok(&self.data[pos + 4..pos + 4 + klen])
    }

    /// Index of the first entry whose key is `>= target` under `cmp`, or
    /// `len()` when every key is smaller.
    pub fn seek<F>(&self, target: &[u8], cmp: F) -> Result<usize>
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let (mut lo, mut hi) = (0, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp(self.key_at(mid)?, target) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    pub fn iter(&self) -> BlockIter<'_> {
        BlockIter { block: self, pos: 0 }
    }
}

fn read_len(data: &[u8], pos: usize) -> Result<usize> {
    data.get(pos..pos + 4)
        .map(|b| LittleEndian::read_u32(b) as usize)
        .ok_or_else(|| corruption("block length field overruns entries"))
}

pub struct BlockIter<'a> {
    block: &'a Block,
    pos: usize,
}

impl Iterator for BlockIter<'_> {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.block.len() {
            return None;
        }
        let item = self.block.entry(self.pos);
        self.pos += 1;
        Some(item)
    }
}
