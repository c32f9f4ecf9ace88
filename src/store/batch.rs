//! Buckets and atomic write batches

/// A named partition of the backing store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    /// Root hash, leaf count, depth and hanging nodes
    Metadata,
    /// Node hash → encoded children and parent
    Nodes,
    /// Caller key → caller data, verbatim
    KeyData,
}

impl Bucket {
    /// Every bucket a tree uses
    pub const ALL: [Bucket; 3] = [Bucket::Metadata, Bucket::Nodes, Bucket::KeyData];

    pub fn name(&self) -> &'static str {
        match self {
            Bucket::Metadata => "metadata",
            Bucket::Nodes => "nodes",
            Bucket::KeyData => "keydata",
        }
    }
}

/// One operation inside a [`WriteBatch`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        bucket: Bucket,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        bucket: Bucket,
        key: Vec<u8>,
    },
    /// Remove every key in the bucket, including keys put earlier in the same batch
    Clear(Bucket),
}

/// An ordered set of operations applied atomically by a backend
///
/// Operations apply in insertion order, so a put that follows a delete or
/// clear of the same key wins.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch { ops: Vec::new() }
    }

    pub fn put(&mut self, bucket: Bucket, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { bucket, key, value });
    }

    pub fn delete(&mut self, bucket: Bucket, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { bucket, key });
    }

    pub fn clear(&mut self, bucket: Bucket) {
        self.ops.push(BatchOp::Clear(bucket));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}
