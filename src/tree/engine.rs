//! Incremental Merkle tree engine
//!
//! Leaves are appended without rebuilding anything: the frontier of hanging
//! nodes behaves like the carry bits of a binary counter, so each append
//! touches O(log n) nodes. Updating a leaf rewrites its hash in place and
//! pushes the change up the parent chain to the root.
//!
//! All changes accumulate in memory (the dirty cache) until [`TreeEngine::flush`]
//! commits them in one atomic batch, or [`TreeEngine::revert`] throws them away.

use super::metadata::TreeMetadata;
use super::node::{Node, NodeArena, NodeId, StoredNode};
use crate::model::Hash;
use crate::store::{Bucket, KvBackend, WriteBatch};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tree state for one open store; callers provide the locking
pub(crate) struct TreeEngine {
    backend: Arc<dyn KvBackend>,
    meta: TreeMetadata,
    /// Nodes created, changed or loaded since the last flush
    arena: NodeArena,
    /// Key data written since the last flush
    key_data: HashMap<Vec<u8>, Vec<u8>>,
    dirty: bool,
}

impl TreeEngine {
    /// Load the last flushed state from a backend
    pub fn open(backend: Arc<dyn KvBackend>) -> Result<Self> {
        let mut engine = TreeEngine {
            backend,
            meta: TreeMetadata::default(),
            arena: NodeArena::default(),
            key_data: HashMap::new(),
            dirty: false,
        };
        engine.reload()?;
        Ok(engine)
    }

    pub fn metadata(&self) -> &TreeMetadata {
        &self.meta
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty
    }

    /// Data stored under a key, checking unflushed writes first
    pub fn get_data(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.key_data.get(key) {
            return Ok(Some(data.clone()));
        }
        self.backend.get(Bucket::KeyData, key)
    }

    /// Store data under a key; returns whether anything changed
    pub fn put(&mut self, key: &[u8], data: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::InvalidInput("key cannot be empty".into()));
        }
        if data.is_empty() {
            return Err(Error::InvalidInput("data cannot be empty".into()));
        }

        let old_leaf = self.get_data(key)?.map(|existing| Hash::leaf(key, &existing));
        let new_leaf = Hash::leaf(key, data);
        if old_leaf == Some(new_leaf) {
            return Ok(false);
        }

        // A failed mutation is undone completely so flush never sees half of it.
        let meta = self.meta.clone();
        self.arena.begin();
        let applied = match old_leaf {
            None => self.append_leaf(new_leaf),
            Some(old_leaf) => self.update_leaf(old_leaf, new_leaf),
        };
        if let Err(e) = applied {
            self.arena.rollback();
            self.meta = meta;
            return Err(e);
        }
        self.arena.commit();

        self.dirty = true;
        self.key_data.insert(key.to_vec(), data.to_vec());
        Ok(true)
    }

    /// Commit every dirty node, key and the metadata in one batch
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        self.meta.write_to(&mut batch);

        let entries = self.arena.dirty_entries();
        // Deletes go first so a hash that moved away and back survives.
        for (hash, superseded, _) in &entries {
            if let Some(old) = superseded.filter(|old| old != hash) {
                batch.delete(Bucket::Nodes, old.as_bytes().to_vec());
            }
        }
        for (hash, _, stored) in &entries {
            batch.put(Bucket::Nodes, hash.as_bytes().to_vec(), stored.encode()?);
        }
        for (key, data) in &self.key_data {
            batch.put(Bucket::KeyData, key.clone(), data.clone());
        }

        let ops = batch.len();
        self.backend.write_batch(batch)?;

        debug!(
            nodes = entries.len(),
            keys = self.key_data.len(),
            ops,
            root = ?self.meta.root_hash,
            "flushed merkle tree"
        );

        self.arena.clear();
        self.key_data.clear();
        self.dirty = false;
        Ok(())
    }

    /// Drop unflushed changes and return to the last flushed state
    pub fn revert(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let discarded = (self.arena.len(), self.key_data.len());
        self.reload()?;
        debug!(
            nodes = discarded.0,
            keys = discarded.1,
            "reverted unsaved changes"
        );
        Ok(())
    }

    /// Empty every bucket and reset to an empty tree
    pub fn clear(&mut self) -> Result<()> {
        let mut batch = WriteBatch::new();
        for bucket in Bucket::ALL {
            batch.clear(bucket);
        }
        self.backend.write_batch(batch)?;

        self.meta = TreeMetadata::default();
        self.arena.clear();
        self.key_data.clear();
        self.dirty = false;
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        self.arena.clear();
        self.key_data.clear();

        let meta = TreeMetadata::load(self.backend.as_ref())?;
        for (_, hash) in meta.hanging.iter() {
            self.load_node(&hash)?;
        }

        self.meta = meta;
        self.dirty = false;
        Ok(())
    }

    /// Resolve a hash to a live node, loading it (and its parents) from the store
    fn load_node(&mut self, hash: &Hash) -> Result<NodeId> {
        if let Some(id) = self.arena.lookup(hash) {
            return Ok(id);
        }

        let bytes = self
            .backend
            .get(Bucket::Nodes, hash.as_bytes())?
            .ok_or_else(|| Error::NodeNotFound(hash.to_hex()))?;
        let stored = StoredNode::decode(&bytes)?;

        let node = match (stored.left, stored.right) {
            (None, None) => Node::leaf(*hash),
            (left, right) => Node::internal(left, right)?,
        };
        if node.hash() != *hash {
            return Err(Error::Corruption(format!(
                "node stored under {} hashes to {}",
                hash,
                node.hash()
            )));
        }

        let parent = match stored.parent {
            Some(parent_hash) => Some(self.load_node(&parent_hash)?),
            None => None,
        };
        Ok(self.arena.insert(node.with_parent(parent), false))
    }

    /// Add a new leaf at the right edge of the tree
    fn append_leaf(&mut self, leaf_hash: Hash) -> Result<()> {
        let leaf = self.arena.insert(Node::leaf(leaf_hash), true);

        if self.meta.root_hash.is_none() {
            self.meta.hanging.set(0, leaf_hash)?;
            self.meta.root_hash = Some(leaf_hash);
        } else {
            match self.meta.hanging.get(0) {
                None => {
                    self.meta.hanging.set(0, leaf_hash)?;
                    let parent = self.wrap(leaf)?;
                    self.propagate(1, parent)?;
                }
                Some(hanging_hash) => {
                    let hanging = self.load_node(&hanging_hash)?;
                    match self.arena[hanging].parent() {
                        None => {
                            let parent = self.join(hanging, leaf)?;
                            self.meta.hanging.clear(0);
                            self.propagate(1, parent)?;
                        }
                        Some(parent) => {
                            self.attach(parent, leaf)?;
                            self.meta.hanging.clear(0);
                        }
                    }
                }
            }
        }

        self.meta.num_leaves += 1;
        Ok(())
    }

    /// Place a node produced at `level`, carrying upward while levels pair up
    fn propagate(&mut self, level: usize, node: NodeId) -> Result<()> {
        if level as u32 > self.meta.depth {
            self.meta.depth = level as u32;
        }

        let node_hash = self.arena[node].hash();
        match self.meta.hanging.get(level) {
            None => {
                self.meta.hanging.set(level, node_hash)?;
                if level as u32 == self.meta.depth {
                    self.meta.root_hash = Some(node_hash);
                    Ok(())
                } else {
                    let parent = self.wrap(node)?;
                    self.propagate(level + 1, parent)
                }
            }
            Some(hanging_hash) => {
                let hanging = self.load_node(&hanging_hash)?;
                match self.arena[hanging].parent() {
                    None => {
                        let parent = self.join(hanging, node)?;
                        self.meta.hanging.clear(level);
                        self.propagate(level + 1, parent)
                    }
                    Some(parent) => {
                        self.attach(parent, node)?;
                        self.meta.hanging.clear(level);
                        Ok(())
                    }
                }
            }
        }
    }

    /// New single-child parent above `child`
    fn wrap(&mut self, child: NodeId) -> Result<NodeId> {
        let node = Node::internal(Some(self.arena[child].hash()), None)?;
        let parent = self.arena.insert(node, true);
        self.arena.set_parent(child, parent);
        Ok(parent)
    }

    /// New parent over two siblings
    fn join(&mut self, left: NodeId, right: NodeId) -> Result<NodeId> {
        let node = Node::internal(
            Some(self.arena[left].hash()),
            Some(self.arena[right].hash()),
        )?;
        let parent = self.arena.insert(node, true);
        self.arena.set_parent(left, parent);
        self.arena.set_parent(right, parent);
        Ok(parent)
    }

    /// Give a waiting parent its missing child and rehash up to the root
    fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let child_hash = self.arena[child].hash();
        self.arena.node_mut(parent).attach_child(child_hash)?;
        self.arena.set_parent(child, parent);
        let new_hash = self.recomputed(parent)?;
        self.update_hash(parent, new_hash)
    }

    fn update_leaf(&mut self, old_leaf: Hash, new_leaf: Hash) -> Result<()> {
        let leaf = self.load_node(&old_leaf)?;
        self.update_hash(leaf, new_leaf)
    }

    /// Rehash a node in place and carry the change to the root
    fn update_hash(&mut self, id: NodeId, new_hash: Hash) -> Result<()> {
        let old_hash = self.arena[id].hash();
        if old_hash == new_hash {
            return Ok(());
        }

        // Children persist their parent's hash, so they are rewritten too.
        // Resolve them while the old hash still indexes this node.
        let children: Vec<Hash> = self.arena[id].children().collect();
        for child in children {
            let child = self.load_node(&child)?;
            self.arena.mark_dirty(child);
        }

        self.meta.hanging.repoint(&old_hash, new_hash);
        self.arena.rehash(id, new_hash);

        match self.arena[id].parent() {
            None => {
                self.meta.root_hash = Some(new_hash);
                Ok(())
            }
            Some(parent) => {
                self.arena
                    .node_mut(parent)
                    .replace_child(&old_hash, new_hash)?;
                let parent_hash = self.recomputed(parent)?;
                self.update_hash(parent, parent_hash)
            }
        }
    }

    fn recomputed(&self, id: NodeId) -> Result<Hash> {
        self.arena[id].recompute_hash().ok_or_else(|| {
            Error::Corruption(format!("node {} has no children", self.arena[id].hash()))
        })
    }
}
