//! Table file layout, block handles and the footer.
//!
//! ```text
//! [data block 0][trailer] ... [data block N][trailer]
//! [filter block][trailer]          (absent when no filter policy)
//! [index block][trailer]
//! [properties block][trailer]
//! [footer: 64 bytes]
//! ```
//!
//! Every block is followed by a 5-byte trailer:
//!
//! ```text
//! [compression: u8][crc32: u32 LE]
//! ```
//!
//! The CRC covers the stored (possibly compressed) block bytes followed by
//! the compression byte. A [`BlockHandle`] points at the stored bytes and
//! does not include the trailer.
//!
//! ## Footer
//!
//! ```text
//! [filter: handle][properties: handle][index: handle]
//! [version: u32 LE][reserved: u32][magic: u64 LE]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::io::Write;

use config::CompressionType;

use crate::compress;
use crate::error::{corruption, Result};

/// Magic number closing every table file (ASCII "SHALESST").
pub const TABLE_MAGIC: u64 = 0x5453_5345_4C41_4853;

pub const FORMAT_VERSION: u32 = 1;

pub const BLOCK_TRAILER_SIZE: usize = 5;

pub const BLOCK_HANDLE_SIZE: usize = 16;

pub const FOOTER_SIZE: usize = 64;

/// Location of one stored block inside a table file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn is_null(&self) -> bool {
        self.size == 0 && self.offset == 0
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
    }

    pub fn decode(mut src: &[u8]) -> Result<Self> {
        if src.len() != BLOCK_HANDLE_SIZE {
            return Err(corruption("bad block handle length"));
        }
        let offset = src.read_u64::<LittleEndian>()?;
        let size = src.read_u64::<LittleEndian>()?;
        Ok(Self { offset, size })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub filter: BlockHandle,
    pub properties: BlockHandle,
    pub index: BlockHandle,
    pub version: u32,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.filter.encode_into(&mut buf);
        self.properties.encode_into(&mut buf);
        self.index.encode_into(&mut buf);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&TABLE_MAGIC.to_le_bytes());

        let mut out = [0u8; FOOTER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != FOOTER_SIZE {
            return Err(corruption("bad footer length"));
        }
        let mut tail = &src[56..];
        let magic = tail.read_u64::<LittleEndian>()?;
        if magic != TABLE_MAGIC {
            return Err(corruption(format!("bad table magic {:#x}", magic)));
        }
        let mut vr = &src[48..52];
        let version = vr.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(corruption(format!("unsupported table version {}", version)));
        }
        Ok(Self {
            filter: BlockHandle::decode(&src[0..16])?,
            properties: BlockHandle::decode(&src[16..32])?,
            index: BlockHandle::decode(&src[32..48])?,
            version,
        })
    }
}

fn block_crc(stored: &[u8], compression: u8) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(stored);
    hasher.update(&[compression]);
    hasher.finalize()
}

/// Compresses `raw` (when it pays off), writes it plus its trailer at
/// `offset`, and returns its handle.
///
/// Falls back to storing the block uncompressed if compression does not
/// shrink it.
pub fn write_block<W: Write>(
    w: &mut W,
    offset: u64,
    raw: &[u8],
    compression: CompressionType,
) -> Result<BlockHandle> {
    let mut algo = compression;
    let compressed;
    let stored: &[u8] = match compression {
        CompressionType::None => raw,
        _ => {
            compressed = compress::compress(raw, compression)?;
            if compressed.len() < raw.len() {
                &compressed
            } else {
                algo = CompressionType::None;
                raw
            }
        }
    };

    w.write_all(stored)?;
    w.write_u8(algo.as_u8())?;
    w.write_u32::<LittleEndian>(block_crc(stored, algo.as_u8()))?;
    Ok(BlockHandle::new(offset, stored.len() as u64))
}

/// Validates the trailer of a stored block (`handle.size` bytes plus the
/// trailer) and returns the decompressed contents.
pub fn decode_block(stored_with_trailer: &[u8], verify_checksum: bool) -> Result<Vec<u8>> {
    if stored_with_trailer.len() < BLOCK_TRAILER_SIZE {
        return Err(corruption("block shorter than its trailer"));
    }
    let split = stored_with_trailer.len() - BLOCK_TRAILER_SIZE;
    let (stored, trailer) = stored_with_trailer.split_at(split);
    let tag = trailer[0];
    if verify_checksum {
        let mut cr = &trailer[1..];
        let expected = cr.read_u32::<LittleEndian>()?;
        if block_crc(stored, tag) != expected {
            return Err(corruption("block checksum mismatch"));
        }
    }
    let algo = CompressionType::from_u8(tag)
        .ok_or_else(|| corruption(format!("unknown compression tag {}", tag)))?;
    compress::decompress(stored, algo)
}
