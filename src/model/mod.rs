//! Core data model types for merkle_db

mod hash;

pub use hash::{Hash, HASH_LENGTH};
