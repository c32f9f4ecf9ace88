//! Bucketed key-value storage behind the Merkle tree
//!
//! A tree persists into three named buckets (`metadata`, `nodes`, `keydata`).
//! Every backend accepts an ordered [`WriteBatch`] and applies it atomically:
//! either all of its puts and deletes land, or none do.

mod batch;
mod memory;
mod rocks_store;

pub use batch::{BatchOp, Bucket, WriteBatch};
pub use memory::MemoryStore;
pub use rocks_store::RocksStore;

use crate::Result;

/// A transactional key-value store with named buckets
pub trait KvBackend: Send + Sync {
    /// Read a value, `None` if the key is absent
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All keys currently stored in a bucket, in ascending order
    fn keys(&self, bucket: Bucket) -> Result<Vec<Vec<u8>>>;

    /// Apply every operation of the batch atomically
    fn write_batch(&self, batch: WriteBatch) -> Result<()>;

    fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(bucket, key.to_vec(), value.to_vec());
        self.write_batch(batch)
    }

    fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(bucket, key.to_vec());
        self.write_batch(batch)
    }

    /// Drop every entry of a bucket, leaving it empty but present
    fn clear_bucket(&self, bucket: Bucket) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.clear(bucket);
        self.write_batch(batch)
    }
}
