//! Error types for merkle_db

use thiserror::Error;

/// Result type alias for merkle_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in merkle_db operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("There is already an open instance of tree '{0}'")]
    AlreadyOpen(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Merkle tree is closed")]
    ClosedTree,

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Child {child} not found under node {parent}")]
    ChildNotFound { parent: String, child: String },

    #[error("Store I/O error: {0}")]
    StoreIo(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Cannot decode {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StoreIo(err.into_string())
    }
}
