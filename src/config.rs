//! Tree configuration
//!
//! Stored as JSON in ~/.config/merkle_db/config.json when present.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where trees live on disk and how their stores are opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Directory holding one `<name>.db` store per tree
    pub data_dir: PathBuf,
    /// fsync every committed batch
    pub sync_writes: bool,
    /// LZ4-compress store blocks
    pub compression: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            data_dir: PathBuf::from("merkleTree"),
            sync_writes: true,
            compression: true,
        }
    }
}

impl TreeConfig {
    /// Config rooted at a specific data directory, other fields default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        TreeConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load a config from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config {}: {}", path.display(), e)))
    }

    /// Load ~/.config/merkle_db/config.json, falling back to defaults if it does not exist
    pub fn from_user_config() -> Result<Self> {
        match Self::user_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Location of the per-user config file, if the platform has a config directory
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("merkle_db").join("config.json"))
    }

    /// Store directory for a named tree
    pub fn tree_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.db", name))
    }
}
