//! Incrementally updated Merkle tree
//!
//! - Leaf hash is `H(key ‖ data)`
//! - Internal hash is `H(left ‖ right)`, a lone child counting as both
//! - Appends are O(log n): hanging nodes on the frontier wait for siblings
//! - Updates rewrite node hashes in place along the path to the root

mod engine;
mod metadata;
mod node;

pub(crate) use engine::TreeEngine;
pub use metadata::{Frontier, TreeMetadata, MAX_LEVELS};
pub use node::{Node, NodeId};
