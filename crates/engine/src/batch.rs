use wal::BatchOp;

use crate::column_family::{ColumnFamilyHandle, DEFAULT_CF_ID};

/// An ordered set of mutations applied atomically by [`Db::write`].
///
/// Operations may target different column families; the whole batch is one
/// WAL record, so after a crash either every operation is recovered or none
/// is. Op `i` of a batch is assigned sequence `first + i`, so a later op on
/// the same key shadows an earlier one.
///
/// [`Db::write`]: crate::Db::write
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) {
        self.push_put(DEFAULT_CF_ID, key.as_ref(), value.as_ref());
    }

    pub fn put_cf<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &mut self,
        cf: &ColumnFamilyHandle,
        key: K,
        value: V,
    ) {
        self.push_put(cf.id(), key.as_ref(), value.as_ref());
    }

    pub fn delete<K: AsRef<[u8]>>(&mut self, key: K) {
        self.push_delete(DEFAULT_CF_ID, key.as_ref());
    }

    pub fn delete_cf<K: AsRef<[u8]>>(&mut self, cf: &ColumnFamilyHandle, key: K) {
        self.push_delete(cf.id(), key.as_ref());
    }

    pub fn merge<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, operand: V) {
        self.ops.push(BatchOp::Merge {
            cf: DEFAULT_CF_ID,
            key: key.as_ref().to_vec(),
            value: operand.as_ref().to_vec(),
        });
    }

    pub fn merge_cf<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &mut self,
        cf: &ColumnFamilyHandle,
        key: K,
        operand: V,
    ) {
        self.ops.push(BatchOp::Merge {
            cf: cf.id(),
            key: key.as_ref().to_vec(),
            value: operand.as_ref().to_vec(),
        });
    }

    pub(crate) fn push_put(&mut self, cf: u32, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put {
            cf,
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    pub(crate) fn push_delete(&mut self, cf: u32, key: &[u8]) {
        self.ops.push(BatchOp::Delete {
            cf,
            key: key.to_vec(),
        });
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub(crate) fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}
