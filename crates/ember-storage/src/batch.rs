//! Atomic write batches.

use crate::ColumnFamily;

/// A batch of writes applied atomically.
#[derive(Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<BatchOp>,
}

pub(crate) enum BatchOp {
    Put(ColumnFamily, Vec<u8>, Vec<u8>),
    Delete(ColumnFamily, Vec<u8>),
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn put(&mut self, cf: ColumnFamily, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put(cf, key.to_vec(), value.to_vec()));
    }

    pub fn delete(&mut self, cf: ColumnFamily, key: &[u8]) {
        self.ops.push(BatchOp::Delete(cf, key.to_vec()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
