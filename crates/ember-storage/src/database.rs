//! RocksDB database wrapper.

use crate::batch::BatchOp;
use crate::{StorageError, StorageResult, WriteBatch};
use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options};
use std::path::Path;
use tracing::info;

/// Column families for organising data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// Token ledger snapshot.
    Ledger,
    /// Node metadata.
    Metadata,
    /// Default column family (required by RocksDB).
    Default,
}

impl ColumnFamily {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Ledger => "ledger",
            ColumnFamily::Metadata => "metadata",
            ColumnFamily::Default => "default",
        }
    }

    pub fn all() -> &'static [ColumnFamily] {
        &[
            ColumnFamily::Ledger,
            ColumnFamily::Metadata,
            ColumnFamily::Default,
        ]
    }
}

/// RocksDB database wrapper.
pub struct Database {
    db: DBWithThreadMode<MultiThreaded>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(64);
        opts.set_keep_log_file_num(1);

        let descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamily::all()
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), Options::default()))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&opts, path, descriptors)?;
        Ok(Database { db })
    }

    fn handle(
        &self,
        cf: ColumnFamily,
    ) -> StorageResult<std::sync::Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(cf.name())
            .ok_or(StorageError::MissingColumnFamily(cf.name()))
    }

    pub fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let handle = self.handle(cf)?;
        Ok(self.db.get_cf(&handle, key)?)
    }

    pub fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let handle = self.handle(cf)?;
        Ok(self.db.put_cf(&handle, key, value)?)
    }

    pub fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        let handle = self.handle(cf)?;
        Ok(self.db.delete_cf(&handle, key)?)
    }

    pub fn contains(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Apply a batch of writes atomically.
    pub fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut inner = rocksdb::WriteBatch::default();
        for op in batch.ops {
            match op {
                BatchOp::Put(cf, key, value) => {
                    let handle = self.handle(cf)?;
                    inner.put_cf(&handle, key, value);
                }
                BatchOp::Delete(cf, key) => {
                    let handle = self.handle(cf)?;
                    inner.delete_cf(&handle, key);
                }
            }
        }
        Ok(self.db.write(inner)?)
    }
}
