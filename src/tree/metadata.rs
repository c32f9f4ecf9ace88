//! Tree metadata and the hanging-node frontier
//!
//! Persisted layout in the `metadata` bucket:
//! ```text
//!   rootHash        → 32-byte root hash (absent for an empty tree)
//!   numLeaves       → u32 BE
//!   depth           → u32 BE
//!   hangingNode{L}  → 32-byte hash of the hanging node at level L
//! ```

use crate::model::Hash;
use crate::store::{Bucket, KvBackend, WriteBatch};
use crate::{Error, Result};

const KEY_ROOT_HASH: &[u8] = b"rootHash";
const KEY_NUM_LEAVES: &[u8] = b"numLeaves";
const KEY_DEPTH: &[u8] = b"depth";
const KEY_HANGING_NODE_PREFIX: &str = "hangingNode";

/// Levels a tree can have: a u32 leaf count never needs more than 32 levels
/// above the leaves.
pub const MAX_LEVELS: usize = 33;

/// One optional hanging node per level
///
/// Works like the carry chain of a binary counter: an entry at level L means
/// the most recent node produced at L is still waiting for a sibling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frontier {
    levels: [Option<Hash>; MAX_LEVELS],
}

impl Default for Frontier {
    fn default() -> Self {
        Frontier {
            levels: [None; MAX_LEVELS],
        }
    }
}

impl Frontier {
    pub fn get(&self, level: usize) -> Option<Hash> {
        self.levels.get(level).copied().flatten()
    }

    pub fn set(&mut self, level: usize, hash: Hash) -> Result<()> {
        let slot = self.levels.get_mut(level).ok_or_else(|| {
            Error::Corruption(format!("level {} exceeds maximum tree height", level))
        })?;
        *slot = Some(hash);
        Ok(())
    }

    pub fn clear(&mut self, level: usize) {
        if let Some(slot) = self.levels.get_mut(level) {
            *slot = None;
        }
    }

    /// Point the entry holding `old` at `new`; returns whether one was found
    pub fn repoint(&mut self, old: &Hash, new: Hash) -> bool {
        match self.levels.iter_mut().find(|slot| **slot == Some(*old)) {
            Some(slot) => {
                *slot = Some(new);
                true
            }
            None => false,
        }
    }

    /// Occupied levels, lowest first
    pub fn iter(&self) -> impl Iterator<Item = (usize, Hash)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter_map(|(level, slot)| slot.map(|hash| (level, hash)))
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Option::is_none)
    }
}

/// Summary of the whole tree
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeMetadata {
    /// Hash of the root node, `None` iff the tree is empty
    pub root_hash: Option<Hash>,
    /// Keys ever inserted; updates do not count
    pub num_leaves: u32,
    /// Highest level holding a node, 0 for a single leaf
    pub depth: u32,
    pub hanging: Frontier,
}

impl TreeMetadata {
    /// Read metadata as last flushed; hanging hashes are not resolved here
    pub(crate) fn load(backend: &dyn KvBackend) -> Result<Self> {
        let mut meta = TreeMetadata::default();

        if let Some(bytes) = backend.get(Bucket::Metadata, KEY_ROOT_HASH)? {
            meta.root_hash = Some(decode_hash(&bytes, "root hash")?);
        }
        if let Some(bytes) = backend.get(Bucket::Metadata, KEY_NUM_LEAVES)? {
            meta.num_leaves = decode_u32(&bytes, "leaf count")?;
        }
        if let Some(bytes) = backend.get(Bucket::Metadata, KEY_DEPTH)? {
            meta.depth = decode_u32(&bytes, "depth")?;
        }

        if meta.depth as usize >= MAX_LEVELS {
            return Err(Error::Corruption(format!(
                "stored depth {} exceeds maximum tree height",
                meta.depth
            )));
        }

        for level in 0..=meta.depth as usize {
            if let Some(bytes) = backend.get(Bucket::Metadata, &hanging_key(level))? {
                let hash = decode_hash(&bytes, "hanging node hash")?;
                meta.hanging.set(level, hash)?;
            }
        }

        Ok(meta)
    }

    /// Replace every metadata entry with the current values
    pub(crate) fn write_to(&self, batch: &mut WriteBatch) {
        batch.clear(Bucket::Metadata);

        if let Some(root) = &self.root_hash {
            batch.put(Bucket::Metadata, KEY_ROOT_HASH.to_vec(), root.as_bytes().to_vec());
        }
        batch.put(
            Bucket::Metadata,
            KEY_NUM_LEAVES.to_vec(),
            self.num_leaves.to_be_bytes().to_vec(),
        );
        batch.put(
            Bucket::Metadata,
            KEY_DEPTH.to_vec(),
            self.depth.to_be_bytes().to_vec(),
        );
        for (level, hash) in self.hanging.iter() {
            batch.put(Bucket::Metadata, hanging_key(level), hash.as_bytes().to_vec());
        }
    }
}

fn hanging_key(level: usize) -> Vec<u8> {
    format!("{}{}", KEY_HANGING_NODE_PREFIX, level).into_bytes()
}

fn decode_u32(bytes: &[u8], what: &str) -> Result<u32> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("{}: expected 4 bytes, got {}", what, bytes.len())))?;
    Ok(u32::from_be_bytes(arr))
}

fn decode_hash(bytes: &[u8], what: &str) -> Result<Hash> {
    Hash::from_slice(bytes).map_err(|_| {
        Error::Decode(format!("{}: expected 32 bytes, got {}", what, bytes.len()))
    })
}
