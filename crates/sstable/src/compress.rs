//! Block compression codecs.
//!
//! Blocks are compressed one at a time right before they are written, and
//! decompressed once per cache miss; the block cache always holds
//! decompressed bytes.

use config::CompressionType;

use crate::error::{Result, SstError};

/// Zstd level used for every block.
const ZSTD_LEVEL: i32 = 3;

pub fn compress(data: &[u8], algo: CompressionType) -> Result<Vec<u8>> {
    match algo {
        CompressionType::None => Ok(data.to_vec()),
        // size-prefixed so decompression needs no out-of-band length
        CompressionType::Lz4 => lz4::block::compress(data, None, true)
            .map_err(|e| SstError::Compression(e.to_string())),
        CompressionType::Zstd => {
            zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| SstError::Compression(e.to_string()))
        }
    }
}

pub fn decompress(data: &[u8], algo: CompressionType) -> Result<Vec<u8>> {
    match algo {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => lz4::block::decompress(data, None)
            .map_err(|e| SstError::Corruption(format!("lz4 block: {}", e))),
        CompressionType::Zstd => {
            zstd::decode_all(data).map_err(|e| SstError::Corruption(format!("zstd block: {}", e)))
        }
    }
}
