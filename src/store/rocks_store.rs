//! RocksDB backend: one column family per bucket

use super::{BatchOp, Bucket, KvBackend, WriteBatch};
use crate::config::TreeConfig;
use crate::{Error, Result};
use rocksdb::{
    ColumnFamily, DBCompressionType, IteratorMode, Options, WriteBatch as RocksBatch,
    WriteOptions, DB,
};
use std::collections::HashMap;
use std::path::Path;

/// A [`KvBackend`] stored in a RocksDB directory
///
/// Buckets map to column families, created on first open. A [`WriteBatch`]
/// becomes a single RocksDB write batch, which RocksDB commits atomically.
/// The database handle is released when the store is dropped.
pub struct RocksStore {
    db: DB,
    sync_writes: bool,
}

impl RocksStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>, config: &TreeConfig) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(10);
        if config.compression {
            opts.set_compression_type(DBCompressionType::Lz4);
        } else {
            opts.set_compression_type(DBCompressionType::None);
        }

        let names = Bucket::ALL.iter().map(|bucket| bucket.name());
        let db = DB::open_cf(&opts, path, names)?;

        Ok(RocksStore {
            db,
            sync_writes: config.sync_writes,
        })
    }

    fn cf(&self, bucket: Bucket) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(bucket.name())
            .ok_or_else(|| Error::StoreIo(format!("missing column family '{}'", bucket.name())))
    }

    /// Smallest and largest key currently stored in a column family
    fn key_bounds(&self, cf: &ColumnFamily) -> Result<Option<(Box<[u8]>, Box<[u8]>)>> {
        let first = match self.db.iterator_cf(cf, IteratorMode::Start).next() {
            Some(item) => item?.0,
            None => return Ok(None),
        };
        let last = match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => item?.0,
            None => return Ok(None),
        };
        Ok(Some((first, last)))
    }
}

impl KvBackend for RocksStore {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(bucket)?, key)?)
    }

    fn keys(&self, bucket: Bucket) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for item in self.db.iterator_cf(self.cf(bucket)?, IteratorMode::Start) {
            let (key, _) = item?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut rocks_batch = RocksBatch::default();
        // Keys put earlier in this batch, so a later clear also removes them.
        let mut pending: HashMap<Bucket, Vec<Vec<u8>>> = HashMap::new();

        for op in batch.into_ops() {
            match op {
                BatchOp::Put { bucket, key, value } => {
                    rocks_batch.put_cf(self.cf(bucket)?, &key, &value);
                    pending.entry(bucket).or_default().push(key);
                }
                BatchOp::Delete { bucket, key } => {
                    rocks_batch.delete_cf(self.cf(bucket)?, &key);
                }
                BatchOp::Clear(bucket) => {
                    let cf = self.cf(bucket)?;
                    // delete_range_cf excludes its upper bound
                    if let Some((first, last)) = self.key_bounds(cf)? {
                        rocks_batch.delete_range_cf(cf, &first, &last);
                        rocks_batch.delete_cf(cf, &last);
                    }
                    for key in pending.remove(&bucket).unwrap_or_default() {
                        rocks_batch.delete_cf(cf, &key);
                    }
                }
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db.write_opt(rocks_batch, &write_opts)?;
        Ok(())
    }
}
