/// Combines a chain of merge operands into a single value.
///
/// `operands` are ordered oldest first. `existing` is the base value the
/// chain applies to, or `None` when the chain starts at a tombstone or at the
/// beginning of history. Returning `None` reports a merge failure, which the
/// engine surfaces as corruption.
pub trait MergeOperator: Send + Sync {
    /// Stable name persisted with the column family.
    fn name(&self) -> &str;

    fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>>;
}

/// Joins the existing value and every operand with a delimiter.
///
/// `existing = "a"`, operands `["b", "c"]`, delimiter `,` yields `"a,b,c"`.
#[derive(Debug, Clone)]
pub struct StringAppendOperator {
    delimiter: Vec<u8>,
}

impl StringAppendOperator {
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }
}

impl Default for StringAppendOperator {
    fn default() -> Self {
        Self::new(",")
    }
}

impl MergeOperator for StringAppendOperator {
    fn name(&self) -> &str {
        "StringAppendOperator"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        let mut first = true;
        for part in existing.into_iter().chain(operands.iter().copied()) {
            if !first {
                out.extend_from_slice(&self.delimiter);
            }
            out.extend_from_slice(part);
            first = false;
        }
        Some(out)
    }
}

/// Treats values and operands as little-endian `u64` counters and adds them.
///
/// Any value that is not exactly 8 bytes fails the merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct UInt64AddOperator;

impl UInt64AddOperator {
    fn decode(bytes: &[u8]) -> Option<u64> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(u64::from_le_bytes(arr))
    }
}

impl MergeOperator for UInt64AddOperator {
    fn name(&self) -> &str {
        "UInt64AddOperator"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        let mut total = match existing {
            Some(v) => Self::decode(v)?,
            None => 0,
        };
        for op in operands {
            total = total.wrapping_add(Self::decode(op)?);
        }
        Some(total.to_le_bytes().to_vec())
    }
}
