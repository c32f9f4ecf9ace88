//! In-process backend for ephemeral trees and tests

use super::{BatchOp, Bucket, KvBackend, WriteBatch};
use crate::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type Buckets = HashMap<Bucket, BTreeMap<Vec<u8>, Vec<u8>>>;

/// A [`KvBackend`] that keeps every bucket in memory
///
/// Batches are applied while holding a single write lock, so readers never
/// observe half of a batch.
pub struct MemoryStore {
    buckets: RwLock<Buckets>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let buckets = Bucket::ALL
            .iter()
            .map(|bucket| (*bucket, BTreeMap::new()))
            .collect();
        MemoryStore {
            buckets: RwLock::new(buckets),
        }
    }

    /// Number of entries in a bucket
    pub fn len(&self, bucket: Bucket) -> usize {
        self.buckets.read().get(&bucket).map_or(0, |b| b.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for MemoryStore {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let buckets = self.buckets.read();
        Ok(buckets.get(&bucket).and_then(|b| b.get(key).cloned()))
    }

    fn keys(&self, bucket: Bucket) -> Result<Vec<Vec<u8>>> {
        let buckets = self.buckets.read();
        Ok(buckets
            .get(&bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut buckets = self.buckets.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { bucket, key, value } => {
                    buckets.entry(bucket).or_default().insert(key, value);
                }
                BatchOp::Delete { bucket, key } => {
                    if let Some(b) = buckets.get_mut(&bucket) {
                        b.remove(&key);
                    }
                }
                BatchOp::Clear(bucket) => {
                    buckets.insert(bucket, BTreeMap::new());
                }
            }
        }
        Ok(())
    }
}
