//! Single-writer guard for named trees
//!
//! A tree name may be held by at most one open handle per registry. The
//! process-wide default lives behind [`Registry::global`]; tests and embedders
//! that want isolation create their own with [`Registry::new`].

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

/// Set of tree names that currently have an open handle
#[derive(Clone, Default)]
pub struct Registry {
    open: Arc<Mutex<HashSet<String>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every tree opened through [`crate::MerkleTree::open`]
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Reserve a name, failing if it is already held
    pub fn claim(&self, name: &str) -> Result<()> {
        let mut open = self.open.lock();
        if !open.insert(name.to_string()) {
            return Err(Error::AlreadyOpen(name.to_string()));
        }
        Ok(())
    }

    /// Give a name back; releasing a name that is not held is a no-op
    pub fn release(&self, name: &str) {
        self.open.lock().remove(name);
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open.lock().contains(name)
    }

    /// Names currently held, sorted
    pub fn open_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.open.lock().iter().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive() {
        let registry = Registry::new();

        registry.claim("t").unwrap();
        assert!(matches!(registry.claim("t"), Err(Error::AlreadyOpen(name)) if name == "t"));
        assert!(registry.is_open("t"));

        registry.release("t");
        assert!(!registry.is_open("t"));
        registry.claim("t").unwrap();
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Registry::new();
        let b = Registry::new();

        a.claim("shared").unwrap();
        b.claim("shared").unwrap();

        let a2 = a.clone();
        assert!(a2.claim("shared").is_err());
        assert_eq!(a.open_names(), vec!["shared".to_string()]);
    }

    #[test]
    fn test_concurrent_claims_admit_one() {
        let registry = Registry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.claim("race").is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
