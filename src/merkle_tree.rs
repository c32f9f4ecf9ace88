//! High-level Merkle tree API
//!
//! This module provides the main entry point for working with merkle_db.

use crate::config::TreeConfig;
use crate::model::Hash;
use crate::registry::Registry;
use crate::store::{KvBackend, RocksStore};
use crate::tree::{TreeEngine, TreeMetadata};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A named, persistent Merkle tree
///
/// Provides:
/// - Appending and updating key/data pairs
/// - Root hash, leaf count and depth queries
/// - Explicit `flush` / `revert` of buffered changes
///
/// Only one handle per name may be open in a [`Registry`] at a time. The
/// handle is `Sync`: queries share a read lock and mutations take the write
/// lock. Dropping the handle closes it, flushing whatever is still pending.
pub struct MerkleTree {
    name: String,
    path: Option<PathBuf>,
    registry: Registry,
    /// `None` once closed
    engine: RwLock<Option<TreeEngine>>,
}

impl MerkleTree {
    /// Open a tree stored under the user's configured data directory,
    /// guarded by the process-wide registry
    pub fn open(name: &str) -> Result<Self> {
        let config = TreeConfig::from_user_config()?;
        Self::open_with_config(name, &config, Registry::global())
    }

    /// Open a tree stored at `config.tree_path(name)`
    pub fn open_with_config(name: &str, config: &TreeConfig, registry: &Registry) -> Result<Self> {
        validate_name(name)?;
        let path = config.tree_path(name);

        Self::claim_then(name, registry, Some(path.clone()), || {
            let store: Arc<dyn KvBackend> = Arc::new(RocksStore::open(&path, config)?);
            Ok(store)
        })
    }

    /// Open a tree over an already constructed backend
    pub fn with_backend(
        name: &str,
        backend: Arc<dyn KvBackend>,
        registry: &Registry,
    ) -> Result<Self> {
        validate_name(name)?;
        Self::claim_then(name, registry, None, || Ok(backend))
    }

    fn claim_then(
        name: &str,
        registry: &Registry,
        path: Option<PathBuf>,
        backend: impl FnOnce() -> Result<Arc<dyn KvBackend>>,
    ) -> Result<Self> {
        registry.claim(name)?;

        let engine = match backend().and_then(TreeEngine::open) {
            Ok(engine) => engine,
            Err(e) => {
                registry.release(name);
                return Err(e);
            }
        };

        let meta = engine.metadata();
        info!(
            tree = name,
            leaves = meta.num_leaves,
            depth = meta.depth,
            "opened merkle tree"
        );

        Ok(MerkleTree {
            name: name.to_string(),
            path,
            registry: registry.clone(),
            engine: RwLock::new(Some(engine)),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&TreeEngine) -> Result<T>) -> Result<T> {
        let guard = self.engine.read();
        let engine = guard.as_ref().ok_or(Error::ClosedTree)?;
        f(engine)
    }

    fn write<T>(&self, f: impl FnOnce(&mut TreeEngine) -> Result<T>) -> Result<T> {
        let mut guard = self.engine.write();
        let engine = guard.as_mut().ok_or(Error::ClosedTree)?;
        f(engine)
    }

    // === Queries ===

    /// Current root hash, `None` for an empty tree
    pub fn root_hash(&self) -> Result<Option<Hash>> {
        self.read(|engine| Ok(engine.metadata().root_hash))
    }

    /// Number of distinct keys ever inserted
    pub fn leaf_count(&self) -> Result<u32> {
        self.read(|engine| Ok(engine.metadata().num_leaves))
    }

    pub fn depth(&self) -> Result<u32> {
        self.read(|engine| Ok(engine.metadata().depth))
    }

    /// Snapshot of root, counts and frontier
    pub fn metadata(&self) -> Result<TreeMetadata> {
        self.read(|engine| Ok(engine.metadata().clone()))
    }

    /// Data stored under a key, including unflushed writes
    pub fn get_data(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(|engine| engine.get_data(key))
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get_data(key)?.is_some())
    }

    // === Mutations ===

    /// Insert a new key or replace the data of an existing one
    ///
    /// Returns `false` when the key already holds exactly this data.
    /// Changes stay in memory until [`MerkleTree::flush`].
    pub fn put(&self, key: &[u8], data: &[u8]) -> Result<bool> {
        self.write(|engine| engine.put(key, data))
    }

    /// Persist all pending changes atomically
    pub fn flush(&self) -> Result<()> {
        self.write(|engine| engine.flush())
    }

    /// Discard pending changes, returning to the last flushed state
    pub fn revert(&self) -> Result<()> {
        self.write(|engine| engine.revert())
    }

    /// Remove every key and node, leaving an empty tree
    pub fn clear(&self) -> Result<()> {
        self.write(|engine| engine.clear())?;
        info!(tree = %self.name, "cleared merkle tree");
        Ok(())
    }

    /// Flush what is pending and release the name
    ///
    /// Closing twice is a no-op. A flush failure is logged and the pending
    /// changes are lost.
    pub fn close(&self) {
        let Some(mut engine) = self.engine.write().take() else {
            return;
        };

        if let Err(e) = engine.flush() {
            warn!(tree = %self.name, error = %e, "failed to flush merkle tree on close");
        }
        drop(engine);

        self.registry.release(&self.name);
        info!(tree = %self.name, "closed merkle tree");
    }

    // === Accessors ===

    pub fn name(&self) -> &str {
        &self.name
    }

    /// On-disk location, `None` for trees over a caller-supplied backend
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.engine
            .read()
            .as_ref()
            .is_some_and(|engine| engine.has_unsaved_changes())
    }

    pub fn is_closed(&self) -> bool {
        self.engine.read().is_none()
    }
}

impl Drop for MerkleTree {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleTree")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("tree name cannot be empty".into()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::InvalidInput(format!(
            "tree name must not be a path: {}",
            name
        )));
    }
    Ok(())
}
