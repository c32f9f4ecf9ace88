//! Content-addressed hash type using Keccak-256

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Length in bytes of every node and leaf hash
pub const HASH_LENGTH: usize = 32;

/// A 32-byte Keccak-256 hash identifying a tree node
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    /// Create a hash from a byte slice, rejecting anything that is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HASH_LENGTH {
            return Err(Error::InvalidInput(format!(
                "hash must be {} bytes, got {}",
                HASH_LENGTH,
                bytes.len()
            )));
        }
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(bytes);
        Ok(Hash(arr))
    }

    /// Hash arbitrary data
    pub fn digest(data: &[u8]) -> Self {
        Self::digest_many(&[data])
    }

    /// Hash the concatenation of several pieces of data
    pub fn digest_many(parts: &[&[u8]]) -> Self {
        let mut hasher = Keccak256::new();
        for part in parts {
            hasher.update(part);
        }
        Hash(hasher.finalize().into())
    }

    /// Leaf hash of a stored key/data pair: `H(key ‖ data)`
    pub fn leaf(key: &[u8], data: &[u8]) -> Self {
        Self::digest_many(&[key, data])
    }

    /// Hash of an internal node from its two child hashes
    pub fn pair(left: &Hash, right: &Hash) -> Self {
        Self::digest_many(&[&left.0, &right.0])
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_LENGTH {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }

    /// Get a short prefix for display (first 8 chars)
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
