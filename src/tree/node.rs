//! Tree nodes and the arena that owns them
//!
//! Nodes are mutable cells: when a descendant changes, the same slot gets a
//! new hash instead of being replaced. Children are referenced by content
//! hash, the parent by arena slot, so upward links never own anything.

use crate::model::Hash;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Index;

/// Stable handle to a node slot in a [`NodeArena`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A node of the Merkle tree
///
/// A node without children is a leaf, a node with one or two children is
/// internal, and a node without a parent is the current root.
#[derive(Clone, Debug)]
pub struct Node {
    hash: Hash,
    left: Option<Hash>,
    right: Option<Hash>,
    parent: Option<NodeId>,
    /// Hash this node had when last persisted, pending deletion from the store
    superseded: Option<Hash>,
}

impl Node {
    /// Create a leaf with a known hash
    pub fn leaf(hash: Hash) -> Self {
        Node {
            hash,
            left: None,
            right: None,
            parent: None,
            superseded: None,
        }
    }

    /// Create an internal node, deriving its hash from the children
    pub fn internal(left: Option<Hash>, right: Option<Hash>) -> Result<Self> {
        let hash = combine(left.as_ref(), right.as_ref()).ok_or_else(|| {
            Error::InvalidInput("at least one of left or right must be present".into())
        })?;

        Ok(Node {
            hash,
            left,
            right,
            parent: None,
            superseded: None,
        })
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Present children, left first
    pub fn children(&self) -> impl Iterator<Item = Hash> {
        self.left.into_iter().chain(self.right)
    }

    /// Hash implied by the current children, `None` for a node without any
    pub fn recompute_hash(&self) -> Option<Hash> {
        combine(self.left.as_ref(), self.right.as_ref())
    }

    /// Swap the child currently equal to `old` for `new`
    pub fn replace_child(&mut self, old: &Hash, new: Hash) -> Result<()> {
        if self.left.as_ref() == Some(old) {
            self.left = Some(new);
        } else if self.right.as_ref() == Some(old) {
            self.right = Some(new);
        } else {
            return Err(Error::ChildNotFound {
                parent: self.hash.to_hex(),
                child: old.to_hex(),
            });
        }
        Ok(())
    }

    /// Fill the first empty child slot
    pub fn attach_child(&mut self, child: Hash) -> Result<()> {
        if self.left.is_none() {
            self.left = Some(child);
        } else if self.right.is_none() {
            self.right = Some(child);
        } else {
            return Err(Error::Corruption(format!(
                "node {} already has two children",
                self.hash
            )));
        }
        Ok(())
    }

    pub(crate) fn with_parent(mut self, parent: Option<NodeId>) -> Self {
        self.parent = parent;
        self
    }

    fn to_stored(&self, parent: Option<Hash>) -> StoredNode {
        StoredNode {
            left: self.left,
            right: self.right,
            parent,
        }
    }
}

/// Internal hash rule: a lone child stands in for both positions
fn combine(left: Option<&Hash>, right: Option<&Hash>) -> Option<Hash> {
    match (left, right) {
        (None, None) => None,
        (Some(l), Some(r)) => Some(Hash::pair(l, r)),
        (Some(only), None) | (None, Some(only)) => Some(Hash::pair(only, only)),
    }
}

/// On-disk form of a node, keyed by its hash in the `nodes` bucket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredNode {
    pub left: Option<Hash>,
    pub right: Option<Hash>,
    pub parent: Option<Hash>,
}

impl StoredNode {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(Clone)]
struct Slot {
    node: Node,
    dirty: bool,
}

/// Undo log for one mutation: slots as they were before first being touched
/// and every overwritten index entry, oldest first
#[derive(Default)]
struct Journal {
    len: usize,
    slots: HashMap<NodeId, Slot>,
    index: Vec<(Hash, Option<NodeId>)>,
}

/// Owner of every node loaded or created since the last flush
///
/// Slots are addressed by [`NodeId`]; a secondary index maps each node's
/// current hash to its slot and is patched whenever a hash changes.
///
/// Between [`NodeArena::begin`] and [`NodeArena::commit`] every change is
/// journaled, so [`NodeArena::rollback`] can restore the arena exactly.
#[derive(Default)]
pub(crate) struct NodeArena {
    slots: Vec<Slot>,
    index: HashMap<Hash, NodeId>,
    journal: Option<Journal>,
}

impl NodeArena {
    /// Add a node; `dirty` nodes are written on the next flush
    pub fn insert(&mut self, node: Node, dirty: bool) -> NodeId {
        let id = NodeId(self.slots.len());
        self.index_insert(node.hash, id);
        self.slots.push(Slot { node, dirty });
        id
    }

    /// Start journaling a mutation
    pub fn begin(&mut self) {
        self.journal = Some(Journal {
            len: self.slots.len(),
            ..Default::default()
        });
    }

    /// Keep everything changed since [`NodeArena::begin`]
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Undo everything changed since [`NodeArena::begin`]
    pub fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };

        for (hash, previous) in journal.index.into_iter().rev() {
            match previous {
                Some(id) => {
                    self.index.insert(hash, id);
                }
                None => {
                    self.index.remove(&hash);
                }
            }
        }
        self.slots.truncate(journal.len);
        for (id, slot) in journal.slots {
            self.slots[id.0] = slot;
        }
    }

    fn save_slot(&mut self, id: NodeId) {
        if let Some(journal) = self.journal.as_mut() {
            if id.0 < journal.len {
                let slots = &self.slots;
                journal.slots.entry(id).or_insert_with(|| slots[id.0].clone());
            }
        }
    }

    fn index_insert(&mut self, hash: Hash, id: NodeId) {
        let previous = self.index.insert(hash, id);
        if let Some(journal) = self.journal.as_mut() {
            journal.index.push((hash, previous));
        }
    }

    fn index_remove(&mut self, hash: &Hash) {
        let previous = self.index.remove(hash);
        if let Some(journal) = self.journal.as_mut() {
            journal.index.push((*hash, previous));
        }
    }

    pub fn lookup(&self, hash: &Hash) -> Option<NodeId> {
        self.index.get(hash).copied()
    }

    /// Mutable access; the node will be rewritten on flush
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.save_slot(id);
        let slot = &mut self.slots[id.0];
        slot.dirty = true;
        &mut slot.node
    }

    pub fn mark_dirty(&mut self, id: NodeId) {
        self.save_slot(id);
        self.slots[id.0].dirty = true;
    }

    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) {
        self.node_mut(child).parent = Some(parent);
    }

    /// Give a node a new hash, remembering the first hash it superseded.
    /// Children and parent links are left untouched. Returns the old hash.
    pub fn rehash(&mut self, id: NodeId, new_hash: Hash) -> Hash {
        let node = self.node_mut(id);
        let old = node.hash;
        if node.superseded.is_none() {
            node.superseded = Some(old);
        }
        node.hash = new_hash;

        if self.index.get(&old) == Some(&id) {
            self.index_remove(&old);
        }
        self.index_insert(new_hash, id);
        old
    }

    /// Dirty nodes in their persisted form: `(current hash, superseded hash, encoding)`
    pub fn dirty_entries(&self) -> Vec<(Hash, Option<Hash>, StoredNode)> {
        self.slots
            .iter()
            .filter(|slot| slot.dirty)
            .map(|slot| {
                let node = &slot.node;
                let parent = node.parent.map(|p| self[p].hash);
                (node.hash, node.superseded, node.to_stored(parent))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.journal = None;
    }
}

impl Index<NodeId> for NodeArena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.slots[id.0].node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(s: &str) -> Hash {
        Hash::digest(s.as_bytes())
    }

    #[test]
    fn test_internal_duplicates_lone_child() {
        let a = h("a");
        let left_only = Node::internal(Some(a), None).unwrap();
        let right_only = Node::internal(None, Some(a)).unwrap();

        assert_eq!(left_only.hash(), Hash::pair(&a, &a));
        assert_eq!(right_only.hash(), left_only.hash());
        assert!(left_only.children().next().is_some());
    }

    #[test]
    fn test_internal_requires_a_child() {
        assert!(matches!(
            Node::internal(None, None),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_leaf_has_no_recomputed_hash() {
        let leaf = Node::leaf(h("leaf"));
        assert!(leaf.children().next().is_none());
        assert_eq!(leaf.recompute_hash(), None);
    }

    #[test]
    fn test_replace_child() {
        let (a, b, c) = (h("a"), h("b"), h("c"));
        let mut node = Node::internal(Some(a), Some(b)).unwrap();
        let before = node.hash();

        node.replace_child(&b, c).unwrap();
        assert_eq!(node.right, Some(c));
        assert_eq!(node.recompute_hash(), Some(Hash::pair(&a, &c)));
        // hash only moves when the caller applies it
        assert_eq!(node.hash(), before);

        let err = node.replace_child(&b, a).unwrap_err();
        assert!(matches!(err, Error::ChildNotFound { .. }));
    }

    #[test]
    fn test_attach_child_fills_then_rejects() {
        let (a, b) = (h("a"), h("b"));
        let mut node = Node::internal(Some(a), None).unwrap();

        node.attach_child(b).unwrap();
        assert_eq!(node.children().collect::<Vec<_>>(), vec![a, b]);
        assert!(matches!(node.attach_child(a), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_arena_rehash_tracks_first_superseded() {
        let mut arena = NodeArena::default();
        let id = arena.insert(Node::leaf(h("v1")), false);

        let old = arena.rehash(id, h("v2"));
        assert_eq!(old, h("v1"));
        arena.rehash(id, h("v3"));

        assert_eq!(arena[id].superseded, Some(h("v1")));
        assert_eq!(arena.lookup(&h("v3")), Some(id));
        assert_eq!(arena.lookup(&h("v1")), None);
        assert_eq!(arena.lookup(&h("v2")), None);
        assert_eq!(arena.dirty_entries().len(), 1);
    }

    #[test]
    fn test_rollback_restores_arena() {
        let mut arena = NodeArena::default();
        let (a, b) = (h("a"), h("b"));
        let leaf = arena.insert(Node::leaf(a), false);

        arena.begin();
        let parent = arena.insert(Node::internal(Some(a), None).unwrap(), true);
        arena.set_parent(leaf, parent);
        arena.rehash(leaf, b);
        arena.rollback();

        assert_eq!(arena.len(), 1);
        assert_eq!(arena.lookup(&a), Some(leaf));
        assert_eq!(arena.lookup(&b), None);
        assert_eq!(arena.lookup(&Hash::pair(&a, &a)), None);
        assert_eq!(arena[leaf].parent(), None);
        assert_eq!(arena[leaf].superseded, None);
        assert!(arena.dirty_entries().is_empty());

        // committed work survives a later rollback
        arena.begin();
        arena.rehash(leaf, b);
        arena.commit();
        arena.rollback();
        assert_eq!(arena.lookup(&b), Some(leaf));
    }

    #[test]
    fn test_dirty_entries_carry_parent_hash() {
        let mut arena = NodeArena::default();
        let (a, b) = (h("a"), h("b"));
        let leaf = arena.insert(Node::leaf(a), false);
        let parent = arena.insert(Node::internal(Some(a), Some(b)).unwrap(), false);
        assert!(arena.dirty_entries().is_empty());

        arena.set_parent(leaf, parent);
        let entries = arena.dirty_entries();
        assert_eq!(entries.len(), 1);
        let (hash, superseded, stored) = &entries[0];
        assert_eq!(*hash, a);
        assert_eq!(*superseded, None);
        assert_eq!(stored.parent, Some(Hash::pair(&a, &b)));

        let decoded = StoredNode::decode(&stored.encode().unwrap()).unwrap();
        assert_eq!(&decoded, stored);
    }
}
