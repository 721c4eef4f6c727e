use byteorder::{ByteOrder, LittleEndian};

use crate::block::{Block, BlockBuilder};
use crate::error::{corruption, Result};

/// Summary statistics stored in every table's properties block.
///
/// `smallest_key` and `largest_key` are encoded internal keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProperties {
    pub num_entries: u64,
    pub num_deletions: u64,
    pub num_merge_operands: u64,
    pub num_data_blocks: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub data_size: u64,
    pub index_size: u64,
    pub filter_size: u64,
    pub smallest_seq: u64,
    pub largest_seq: u64,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub compression: String,
    pub filter_policy: String,
}

const DATA_SIZE: &str = "shale.data.size";
const FILTER_POLICY: &str = "shale.filter.policy";
const FILTER_SIZE: &str = "shale.filter.size";
const INDEX_SIZE: &str = "shale.index.size";
const LARGEST_KEY: &str = "shale.largest.key";
const LARGEST_SEQ: &str = "shale.largest.seqno";
const COMPRESSION: &str = "shale.compression";
const NUM_DATA_BLOCKS: &str = "shale.num.data.blocks";
const NUM_DELETIONS: &str = "shale.num.deletions";
const NUM_ENTRIES: &str = "shale.num.entries";
const NUM_MERGES: &str = "shale.num.merge.operands";
const RAW_KEY_SIZE: &str = "shale.raw.key.size";
const RAW_VALUE_SIZE: &str = "shale.raw.value.size";
const SMALLEST_KEY: &str = "shale.smallest.key";
const SMALLEST_SEQ: &str = "shale.smallest.seqno";

impl TableProperties {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut props: Vec<(&str, Vec<u8>)> = vec![
            (COMPRESSION, self.compression.as_bytes().to_vec()),
            (DATA_SIZE, self.data_size.to_le_bytes().to_vec()),
            (FILTER_POLICY, self.filter_policy.as_bytes().to_vec()),
            (FILTER_SIZE, self.filter_size.to_le_bytes().to_vec()),
            (INDEX_SIZE, self.index_size.to_le_bytes().to_vec()),
            (LARGEST_KEY, self.largest_key.clone()),
            (LARGEST_SEQ, self.largest_seq.to_le_bytes().to_vec()),
            (NUM_DATA_BLOCKS, self.num_data_blocks.to_le_bytes().to_vec()),
            (NUM_DELETIONS, self.num_deletions.to_le_bytes().to_vec()),
            (NUM_ENTRIES, self.num_entries.to_le_bytes().to_vec()),
            (NUM_MERGES, self.num_merge_operands.to_le_bytes().to_vec()),
            (RAW_KEY_SIZE, self.raw_key_size.to_le_bytes().to_vec()),
            (RAW_VALUE_SIZE, self.raw_value_size.to_le_bytes().to_vec()),
            (SMALLEST_KEY, self.smallest_key.clone()),
            (SMALLEST_SEQ, self.smallest_seq.to_le_bytes().to_vec()),
        ];
        props.sort_by(|a, b| a.0.cmp(b.0));

        let mut builder = BlockBuilder::new();
        for (name, value) in &props {
            builder.add(name.as_bytes(), value);
        }
        builder.finish()
    }

    /// Unknown property names are skipped.
    pub(crate) fn decode(block: &Block) -> Result<Self> {
        let mut props = TableProperties::default();
        for entry in block.iter() {
            let (name, value) = entry?;
            let num = || -> Result<u64> {
                if value.len() != 8 {
                    return Err(corruption("bad numeric table property"));
                }
                Ok(LittleEndian::read_u64(&value))
            };
            let text = || String::from_utf8_lossy(&value).into_owned();
            match std::str::from_utf8(&name).unwrap_or("") {
                COMPRESSION => props.compression = text(),
                DATA_SIZE => props.data_size = num()?,
                FILTER_POLICY => props.filter_policy = text(),
                FILTER_SIZE => props.filter_size = num()?,
                INDEX_SIZE => props.index_size = num()?,
                LARGEST_KEY => props.largest_key = value.to_vec(),
                LARGEST_SEQ => props.largest_seq = num()?,
                NUM_DATA_BLOCKS => props.num_data_blocks = num()?,
                NUM_DELETIONS => props.num_deletions = num()?,
                NUM_ENTRIES => props.num_entries = num()?,
                NUM_MERGES => props.num_merge_operands = num()?,
                RAW_KEY_SIZE => props.raw_key_size = num()?,
                RAW_VALUE_SIZE => props.raw_value_size = num()?,
                SMALLEST_KEY => props.smallest_key = value.to_vec(),
                SMALLEST_SEQ => props.smallest_seq = num()?,
                _ => {}
            }
        }
        Ok(props)
    }
}
