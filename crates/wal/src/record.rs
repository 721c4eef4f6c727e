use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

use crate::WalError;

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;
const OP_MERGE: u8 = 2;

/// One mutation inside a batch, tagged with its column family id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { cf: u32, key: Vec<u8>, value: Vec<u8> },
    Delete { cf: u32, key: Vec<u8> },
    Merge { cf: u32, key: Vec<u8>, value: Vec<u8> },
}

impl BatchOp {
    pub fn cf(&self) -> u32 {
        match self {
            BatchOp::Put { cf, .. } | BatchOp::Delete { cf, .. } | BatchOp::Merge { cf, .. } => {
                *cf
            }
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key, .. } | BatchOp::Merge { key, .. } => {
                key
            }
        }
    }

    /// Value or merge operand; empty for deletes.
    pub fn value(&self) -> &[u8] {
        match self {
            BatchOp::Put { value, .. } | BatchOp::Merge { value, .. } => value,
            BatchOp::Delete { .. } => &[],
        }
    }

    fn encoded_len(&self) -> usize {
        let head = 1 + 4 + 4 + self.key().len();
        match self {
            BatchOp::Delete { .. } => head,
            _ => head + 4 + self.value().len(),
        }
    }
}

/// An atomically applied batch. Op `i` is assigned sequence `seq + i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub seq: u64,
    pub ops: Vec<BatchOp>,
}

impl WalRecord {
    pub fn new(seq: u64, ops: Vec<BatchOp>) -> Self {
        Self { seq, ops }
    }

    /// Sequence of the last op in the batch.
    pub fn last_seq(&self) -> u64 {
        self.seq + self.ops.len().saturating_sub(1) as u64
    }

    pub fn encoded_len(&self) -> usize {
        8 + 4 + self.ops.iter().map(BatchOp::encoded_len).sum::<usize>()
    }

    /// Body layout:
    ///
    /// ```text
    /// [seq: u64][count: u32] then per op
    /// [op: u8][cf: u32][key_len: u32][key]([val_len: u32][val])?
    /// ```
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), WalError> {
        buf.write_u64::<LittleEndian>(self.seq)?;
        buf.write_u32::<LittleEndian>(self.ops.len() as u32)?;
        for op in &self.ops {
            match op {
                BatchOp::Put { cf, key, value } => {
                    buf.write_u8(OP_PUT)?;
                    buf.write_u32::<LittleEndian>(*cf)?;
                    write_slice(buf, key)?;
                    write_slice(buf, value)?;
                }
                BatchOp::Delete { cf, key } => {
                    buf.write_u8(OP_DELETE)?;
                    buf.write_u32::<LittleEndian>(*cf)?;
                    write_slice(buf, key)?;
                }
                BatchOp::Merge { cf, key, value } => {
                    buf.write_u8(OP_MERGE)?;
                    buf.write_u32::<LittleEndian>(*cf)?;
                    write_slice(buf, key)?;
                    write_slice(buf, value)?;
                }
            }
        }
        Ok(())
    }

    /// Parses a body that already passed its CRC check. Any structural
    /// problem is reported as `Corrupt` at `offset`.
    pub fn decode(body: &[u8], offset: u64) -> Result<Self, WalError> {
        let corrupt = || WalError::Corrupt { offset };
        let mut br = body;
        let seq = br.read_u64::<LittleEndian>().map_err(|_| corrupt())?;
        let count = br.read_u32::<LittleEndian>().map_err(|_| corrupt())? as usize;
        // every op needs at least 9 bytes
        if count > br.len() / 9 {
            return Err(corrupt());
        }
        let mut ops = Vec::with_capacity(count);
        for _ in 0..count {
            let op = br.read_u8().map_err(|_| corrupt())?;
            let cf = br.read_u32::<LittleEndian>().map_err(|_| corrupt())?;
            let key = read_slice(&mut br).ok_or_else(corrupt)?;
            let decoded = match op {
                OP_PUT => BatchOp::Put {
                    cf,
                    key,
                    value: read_slice(&mut br).ok_or_else(corrupt)?,
                },
                OP_DELETE => BatchOp::Delete { cf, key },
                OP_MERGE => BatchOp::Merge {
                    cf,
                    key,
                    value: read_slice(&mut br).ok_or_else(corrupt)?,
                },
                _ => return Err(corrupt()),
            };
            ops.push(decoded);
        }
        if !br.is_empty() {
            return Err(corrupt());
        }
        Ok(Self { seq, ops })
    }
}

fn write_slice(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), WalError> {
    buf.write_u32::<LittleEndian>(data.len() as u32)?;
    buf.extend_from_slice(data);
    Ok(())
}

fn read_slice(br: &mut &[u8]) -> Option<Vec<u8>> {
    let len = br.read_u32::<LittleEndian>().ok()? as usize;
    if len > br.len() {
        return None;
    }
    let mut out = vec![0u8; len];
    br.read_exact(&mut out).ok()?;
    Some(out)
}
