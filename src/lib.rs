//! # merkle_db
//!
//! A persistent, incrementally updated Merkle tree over an embedded
//! key-value store.
//!
//! Each stored key/data pair becomes a leaf hashed with Keccak-256. New keys
//! are appended at the right edge of the tree in O(log n) without rebuilding
//! it, and changing the data of an existing key rehashes only the path from
//! its leaf to the root.
//!
//! ## Core Concepts
//!
//! - **Leaves**: `H(key ‖ data)`, one per distinct key, in insertion order
//! - **Internal nodes**: `H(left ‖ right)`, a lone child paired with itself
//! - **Hanging nodes**: the per-level frontier still waiting for a sibling
//! - **Flush / revert**: changes are buffered until committed atomically
//!
//! ## Example
//!
//! ```ignore
//! use merkle_db::MerkleTree;
//!
//! let tree = MerkleTree::open("accounts")?;
//! tree.put(b"alice", b"100")?;
//! tree.put(b"bob", b"50")?;
//! tree.flush()?;
//! println!("root = {}", tree.root_hash()?.unwrap());
//! ```

pub mod config;
pub mod model;
pub mod registry;
pub mod store;
pub mod tree;

mod error;
mod merkle_tree;

pub use config::TreeConfig;
pub use error::{Error, Result};
pub use merkle_tree::MerkleTree;
pub use model::{Hash, HASH_LENGTH};
pub use registry::Registry;
pub use store::{KvBackend, MemoryStore, RocksStore};
pub use tree::TreeMetadata;
