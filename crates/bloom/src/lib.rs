//! # Bloom - table filter policies
//!
//! A filter answers "might this table contain `key`?" so that point lookups
//! can skip a sorted table without touching its index or data blocks. A
//! filter never produces false negatives; false positives only cost a
//! regular lookup.
//!
//! Filters are built through the [`FilterPolicy`] capability so the table
//! builder does not care which variant the column family was configured with.
//! [`BloomFilterPolicy`] is the variant shipped with ShaleKV.
//!
//! ## Encoding
//!
//! ```text
//! [bit array: N bytes][probe count: u8]
//! ```
//!
//! The encoded filter is probed in place by [`may_match`]; nothing is
//! decoded or copied on the read path. A probe count outside `1..=30` is
//! reserved and matches every key.
//!
//! ## Example
//!
//! ```rust
//! use bloom::{BloomFilterPolicy, FilterPolicy};
//!
//! let policy = BloomFilterPolicy::new(10);
//! let filter = policy.create_filter(&[b"hello".as_slice(), b"world".as_slice()]);
//! assert!(policy.key_may_match(b"hello", &filter));
//! ```

/// Builds and probes per-table membership filters.
///
/// The serialized filter produced by [`create_filter`](Self::create_filter)
/// is stored verbatim in the table's filter block and handed back to
/// [`key_may_match`](Self::key_may_match) on reads.
pub trait FilterPolicy: Send + Sync {
    /// Stable name persisted in table properties. Tables whose filter was
    /// written by a differently named policy have their filter ignored.
    fn name(&self) -> &'static str;

    /// Builds a serialized filter covering every key in `keys`.
    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8>;

    /// Returns `false` only if `key` was definitely not passed to
    /// `create_filter` when `filter` was built.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// Bloom filter policy sized by bits per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomFilterPolicy {
    bits_per_key: u32,
}

impl BloomFilterPolicy {
    /// # Panics
    ///
    /// Panics if `bits_per_key` is 0.
    pub fn new(bits_per_key: u32) -> Self {
        assert!(bits_per_key > 0, "bits_per_key must be > 0");
        Self { bits_per_key }
    }

    #[must_use]
    pub fn bits_per_key(&self) -> u32 {
        self.bits_per_key
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "shale.BloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
        let mut bf = BloomFilter::with_bits_per_key(keys.len(), self.bits_per_key);
        for key in keys {
            bf.insert(key);
        }
        bf.encode()
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        may_match(filter, key)
    }
}

const MIN_BITS: usize = 64;
const MAX_PROBES: u8 = 30;

/// A bloom filter under construction.
///
/// Probe positions come from double hashing, `h + i * delta`, where both
/// terms are derived from one 64-bit FNV-1a hash of the key.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_probes: u8,
}

impl BloomFilter {
    /// A filter with `bits_per_key * expected_items` bits (at least 64).
    pub fn with_bits_per_key(expected_items: usize, bits_per_key: u32) -> Self {
        let num_bits = (expected_items.saturating_mul(bits_per_key as usize)).max(MIN_BITS);
        // k = bits_per_key * ln(2) minimizes the false positive rate
        let k = (f64::from(bits_per_key) * std::f64::consts::LN_2).round() as u32;
        Self {
            bits: vec![0u8; num_bits.div_ceil(8)],
            num_probes: k.clamp(1, u32::from(MAX_PROBES)) as u8,
        }
    }

    /// A filter sized so that `expected_items` keys give roughly
    /// `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `false_positive_rate` is not in `(0, 1)`.
    pub fn for_false_positive_rate(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );
        // bits per key = -ln(p) / ln(2)^2
        let bits_per_key =
            (-false_positive_rate.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u32;
        Self::with_bits_per_key(expected_items, bits_per_key.max(1))
    }

    pub fn insert(&mut self, key: &[u8]) {
        let num_bits = self.num_bits();
        for bit in probes(key, self.num_probes, num_bits) {
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        probe_bits(&self.bits, self.num_probes, key)
    }

    #[must_use]
    pub fn num_bits(&self) -> usize {
        self.bits.len() * 8
    }

    #[must_use]
    pub fn num_probes(&self) -> u8 {
        self.num_probes
    }

    /// The bit array followed by the probe count.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bits.len() + 1);
        out.extend_from_slice(&self.bits);
        out.push(self.num_probes);
        out
    }

    /// Parses an encoded filter. `None` when the probe count is reserved or
    /// the bit array is empty.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let (&num_probes, bits) = data.split_last()?;
        if bits.is_empty() || !(1..=MAX_PROBES).contains(&num_probes) {
            return None;
        }
        Some(Self {
            bits: bits.to_vec(),
            num_probes,
        })
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits())
            .field("num_probes", &self.num_probes)
            .finish()
    }
}

/// Probes an encoded filter for `key` without decoding it. Malformed or
/// reserved encodings match everything.
#[must_use]
pub fn may_match(filter: &[u8], key: &[u8]) -> bool {
    match filter.split_last() {
        Some((&num_probes, bits)) if !bits.is_empty() && (1..=MAX_PROBES).contains(&num_probes) => {
            probe_bits(bits, num_probes, key)
        }
        _ => true,
    }
}

fn probe_bits(bits: &[u8], num_probes: u8, key: &[u8]) -> bool {
    probes(key, num_probes, bits.len() * 8).all(|bit| bits[bit / 8] & (1 << (bit % 8)) != 0)
}

/// Bit positions probed for `key`.
fn probes(key: &[u8], num_probes: u8, num_bits: usize) -> impl Iterator<Item = usize> {
    let h = fnv1a_64(key);
    // odd, so successive probes cycle through every residue
    let delta = h.rotate_left(21) | 1;
    let num_bits = num_bits as u64;
    (0..u64::from(num_probes))
        .map(move |i| (h.wrapping_add(i.wrapping_mul(delta)) % num_bits) as usize)
}

fn fnv1a_64(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    data.iter()
        .fold(OFFSET_BASIS, |hash, &byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests;
