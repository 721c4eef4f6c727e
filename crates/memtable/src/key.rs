use std::cmp::Ordering;

use bytes::Bytes;

/// Largest sequence number that fits the 56-bit field of an encoded key.
pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

/// Width of the packed `(seq << 8) | type` trailer.
pub const TRAILER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
    Merge = 2,
}

impl ValueType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            2 => Some(ValueType::Merge),
            _ => None,
        }
    }
}

/// `(user_key, seq, type)`, ordered by user key ascending, then sequence
/// descending, then type descending.
///
/// Encoded form: `user_key ‖ u64_le((seq << 8) | type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    pub user_key: Bytes,
    pub seq: u64,
    pub vtype: ValueType,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Bytes>, seq: u64, vtype: ValueType) -> Self {
        Self {
            user_key: user_key.into(),
            seq,
            vtype,
        }
    }

    /// The first internal key for `user_key` visible at `seq`: seeking to it
    /// lands on the newest version with sequence `<= seq`.
    pub fn seek_key(user_key: &[u8], seq: u64) -> Self {
        Self::new(Bytes::copy_from_slice(user_key), seq, ValueType::Merge)
    }

    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + TRAILER_LEN
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.user_key);
        buf.extend_from_slice(&pack_trailer(self.seq, self.vtype).to_le_bytes());
    }

    pub fn decode(encoded: &[u8]) -> Option<Self> {
        let parsed = ParsedKey::parse(encoded)?;
        Some(Self {
            user_key: Bytes::copy_from_slice(parsed.user_key),
            seq: parsed.seq,
            vtype: parsed.vtype,
        })
    }

    /// Like [`InternalKey::decode`] but shares the user key with `encoded`.
    pub fn decode_shared(encoded: &Bytes) -> Option<Self> {
        let parsed = ParsedKey::parse(encoded)?;
        let user_len = parsed.user_key.len();
        Some(Self {
            user_key: encoded.slice(..user_len),
            seq: parsed.seq,
            vtype: parsed.vtype,
        })
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| other.vtype.cmp(&self.vtype))
    }
}

/// Zero-copy view of an encoded internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub user_key: &'a [u8],
    pub seq: u64,
    pub vtype: ValueType,
}

impl<'a> ParsedKey<'a> {
    pub fn parse(encoded: &'a [u8]) -> Option<Self> {
        if encoded.len() < TRAILER_LEN {
            return None;
        }
        let split = encoded.len() - TRAILER_LEN;
        let (user_key, trailer) = encoded.split_at(split);
        let packed = u64::from_le_bytes(trailer.try_into().ok()?);
        Some(Self {
            user_key,
            seq: packed >> 8,
            vtype: ValueType::from_u8((packed & 0xff) as u8)?,
        })
    }
}

fn pack_trailer(seq: u64, vtype: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE);
    (seq << 8) | vtype as u64
}

/// Orders two encoded internal keys the same way [`InternalKey`] does.
/// Malformed keys sort by raw bytes after every well-formed key.
pub fn compare_internal_keys(a: &[u8], b: &[u8]) -> Ordering {
    match (ParsedKey::parse(a), ParsedKey::parse(b)) {
        (Some(pa), Some(pb)) => pa
            .user_key
            .cmp(pb.user_key)
            .then_with(|| pb.seq.cmp(&pa.seq))
            .then_with(|| pb.vtype.cmp(&pa.vtype)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// User-key part of an encoded internal key (the whole slice if malformed).
pub fn user_key_of(encoded: &[u8]) -> &[u8] {
    if encoded.len() < TRAILER_LEN {
        return encoded;
    }
    &encoded[..encoded.len() - TRAILER_LEN]
}
