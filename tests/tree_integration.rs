//! Tree Integration Tests
//!
//! End-to-end behavior of named trees persisted in RocksDB.
//!
//! Run with:
//! ```bash
//! cargo test --test tree_integration
//! ```

use merkle_db::{Error, Hash, MerkleTree, Registry, TreeConfig};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn setup() -> (TempDir, TreeConfig, Registry) {
    let dir = tempdir().unwrap();
    let config = TreeConfig::with_data_dir(dir.path());
    (dir, config, Registry::new())
}

fn open(name: &str, config: &TreeConfig, registry: &Registry) -> MerkleTree {
    MerkleTree::open_with_config(name, config, registry).unwrap()
}

fn leaf(key: &str, data: &str) -> Hash {
    Hash::leaf(key.as_bytes(), data.as_bytes())
}

fn pair(l: &Hash, r: &Hash) -> Hash {
    Hash::pair(l, r)
}

// ============================================================================
// Hashing and shape
// ============================================================================

#[test]
fn test_empty_tree() {
    let (_dir, config, registry) = setup();
    let tree = open("empty", &config, &registry);

    assert_eq!(tree.root_hash().unwrap(), None);
    assert_eq!(tree.leaf_count().unwrap(), 0);
    assert_eq!(tree.depth().unwrap(), 0);
    assert!(!tree.contains_key(b"anything").unwrap());
}

#[test]
fn test_single_leaf_is_root() {
    let (_dir, config, registry) = setup();
    let tree = open("single", &config, &registry);

    tree.put(b"alice", b"100").unwrap();

    assert_eq!(tree.root_hash().unwrap(), Some(leaf("alice", "100")));
    assert_eq!(tree.depth().unwrap(), 0);
}

#[test]
fn test_three_leaves_duplicate_lone_child() {
    let (_dir, config, registry) = setup();
    let tree = open("three", &config, &registry);

    tree.put(b"a", b"1").unwrap();
    tree.put(b"b", b"2").unwrap();
    tree.put(b"c", b"3").unwrap();

    let (a, b, c) = (leaf("a", "1"), leaf("b", "2"), leaf("c", "3"));
    let expected = pair(&pair(&a, &b), &pair(&c, &c));
    assert_eq!(tree.root_hash().unwrap(), Some(expected));
    assert_eq!(tree.depth().unwrap(), 2);
    assert_eq!(tree.leaf_count().unwrap(), 3);
}

#[test]
fn test_update_matches_fresh_build() {
    let (_dir, config, registry) = setup();
    let updated = open("updated", &config, &registry);
    let fresh = open("fresh", &config, &registry);

    for (k, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")] {
        updated.put(k.as_bytes(), v.as_bytes()).unwrap();
    }
    assert!(updated.put(b"c", b"changed").unwrap());

    for (k, v) in [("a", "1"), ("b", "2"), ("c", "changed"), ("d", "4"), ("e", "5")] {
        fresh.put(k.as_bytes(), v.as_bytes()).unwrap();
    }

    assert_eq!(updated.root_hash().unwrap(), fresh.root_hash().unwrap());
    assert_eq!(updated.leaf_count().unwrap(), 5);
    assert_eq!(updated.get_data(b"c").unwrap(), Some(b"changed".to_vec()));
}

#[test]
fn test_insertion_order_matters() {
    let (_dir, config, registry) = setup();
    let forward = open("forward", &config, &registry);
    let backward = open("backward", &config, &registry);

    forward.put(b"x", b"1").unwrap();
    forward.put(b"y", b"2").unwrap();
    backward.put(b"y", b"2").unwrap();
    backward.put(b"x", b"1").unwrap();

    assert_ne!(forward.root_hash().unwrap(), backward.root_hash().unwrap());
}

#[test]
fn test_identical_put_does_not_dirty() {
    let (_dir, config, registry) = setup();
    let tree = open("noop", &config, &registry);

    tree.put(b"k", b"v").unwrap();
    tree.flush().unwrap();

    assert!(!tree.put(b"k", b"v").unwrap());
    assert!(!tree.has_unsaved_changes());
}

#[test]
fn test_rejects_empty_key_and_data() {
    let (_dir, config, registry) = setup();
    let tree = open("invalid", &config, &registry);

    assert!(matches!(tree.put(b"", b"v"), Err(Error::InvalidInput(_))));
    assert!(matches!(tree.put(b"k", b""), Err(Error::InvalidInput(_))));
    assert_eq!(tree.leaf_count().unwrap(), 0);
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_flush_survives_reopen() {
    let (_dir, config, registry) = setup();

    let tree = open("ledger", &config, &registry);
    for i in 0..20 {
        tree.put(format!("key-{}", i).as_bytes(), b"value").unwrap();
    }
    tree.flush().unwrap();
    let root = tree.root_hash().unwrap();
    let depth = tree.depth().unwrap();
    tree.close();

    let tree = open("ledger", &config, &registry);
    assert_eq!(tree.root_hash().unwrap(), root);
    assert_eq!(tree.leaf_count().unwrap(), 20);
    assert_eq!(tree.depth().unwrap(), depth);
    for i in 0..20 {
        let key = format!("key-{}", i);
        assert_eq!(
            tree.get_data(key.as_bytes()).unwrap(),
            Some(b"value".to_vec()),
            "{} lost across reopen",
            key
        );
    }
    assert!(config.tree_path("ledger").exists());
}

#[test]
fn test_appends_and_updates_after_reopen() {
    let (_dir, config, registry) = setup();
    let reference = open("reference", &config, &registry);

    let tree = open("resumed", &config, &registry);
    for i in 0..6 {
        tree.put(format!("k{}", i).as_bytes(), b"v").unwrap();
    }
    tree.flush().unwrap();
    tree.close();

    let tree = open("resumed", &config, &registry);
    for i in 6..13 {
        tree.put(format!("k{}", i).as_bytes(), b"v").unwrap();
    }
    tree.put(b"k2", b"updated").unwrap();
    tree.put(b"k12", b"updated").unwrap();

    for i in 0..13 {
        let data: &[u8] = if i == 2 || i == 12 { b"updated" } else { b"v" };
        reference.put(format!("k{}", i).as_bytes(), data).unwrap();
    }

    assert_eq!(tree.root_hash().unwrap(), reference.root_hash().unwrap());
    assert_eq!(tree.depth().unwrap(), reference.depth().unwrap());
}

#[test]
fn test_revert_returns_to_last_flush() {
    let (_dir, config, registry) = setup();
    let tree = open("revert", &config, &registry);

    tree.put(b"a", b"1").unwrap();
    tree.put(b"b", b"2").unwrap();
    tree.flush().unwrap();
    let root = tree.root_hash().unwrap();

    tree.put(b"c", b"3").unwrap();
    tree.put(b"a", b"changed").unwrap();
    assert!(tree.has_unsaved_changes());

    tree.revert().unwrap();
    assert_eq!(tree.root_hash().unwrap(), root);
    assert_eq!(tree.leaf_count().unwrap(), 2);
    assert_eq!(tree.get_data(b"a").unwrap(), Some(b"1".to_vec()));
    assert!(!tree.contains_key(b"c").unwrap());
}

#[test]
fn test_failed_put_does_not_reach_the_store() {
    let (_dir, config, registry) = setup();

    {
        let tree = open("aborted", &config, &registry);
        // same leaf hash for both keys, so updating one cannot resolve the other
        tree.put(b"a", b"bc").unwrap();
        tree.put(b"ab", b"c").unwrap();
        tree.put(b"x", b"1").unwrap();
        let root = tree.root_hash().unwrap();

        assert!(matches!(tree.put(b"a", b"zz"), Err(Error::NodeNotFound(_))));
        assert_eq!(tree.root_hash().unwrap(), root);
        assert_eq!(tree.leaf_count().unwrap(), 3);
    }

    let tree = open("aborted", &config, &registry);
    assert_eq!(tree.get_data(b"a").unwrap(), Some(b"bc".to_vec()));
    tree.put(b"x", b"2").unwrap();
    tree.put(b"new", b"1").unwrap();
    tree.flush().unwrap();

    let shared = leaf("a", "bc");
    let expected = pair(
        &pair(&shared, &shared),
        &pair(&leaf("x", "2"), &leaf("new", "1")),
    );
    assert_eq!(tree.root_hash().unwrap(), Some(expected));
}

#[test]
fn test_drop_flushes_pending_changes() {
    let (_dir, config, registry) = setup();

    {
        let tree = open("dropped", &config, &registry);
        tree.put(b"pending", b"yes").unwrap();
    }

    let tree = open("dropped", &config, &registry);
    assert_eq!(tree.get_data(b"pending").unwrap(), Some(b"yes".to_vec()));
    assert_eq!(tree.root_hash().unwrap(), Some(leaf("pending", "yes")));
}

#[test]
fn test_clear_empties_store() {
    let (_dir, config, registry) = setup();

    let tree = open("cleared", &config, &registry);
    tree.put(b"a", b"1").unwrap();
    tree.put(b"b", b"2").unwrap();
    tree.flush().unwrap();
    tree.clear().unwrap();

    assert_eq!(tree.root_hash().unwrap(), None);
    assert_eq!(tree.leaf_count().unwrap(), 0);
    assert_eq!(tree.get_data(b"a").unwrap(), None);
    tree.close();

    let tree = open("cleared", &config, &registry);
    assert_eq!(tree.root_hash().unwrap(), None);
    tree.put(b"fresh", b"start").unwrap();
    assert_eq!(tree.root_hash().unwrap(), Some(leaf("fresh", "start")));
}

// ============================================================================
// Handles and concurrency
// ============================================================================

#[test]
fn test_one_handle_per_name() {
    let (_dir, config, registry) = setup();
    let tree = open("exclusive", &config, &registry);

    let err = MerkleTree::open_with_config("exclusive", &config, &registry).unwrap_err();
    assert!(matches!(err, Error::AlreadyOpen(name) if name == "exclusive"));

    tree.close();
    assert!(matches!(tree.leaf_count(), Err(Error::ClosedTree)));
    let _again = open("exclusive", &config, &registry);
}

#[test]
fn test_concurrent_puts() {
    let (_dir, config, registry) = setup();
    let tree = Arc::new(open("concurrent", &config, &registry));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                for i in 0..25 {
                    tree.put(format!("t{}-{}", t, i).as_bytes(), b"x").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.leaf_count().unwrap(), 100);
    tree.flush().unwrap();
    assert!(tree.contains_key(b"t3-24").unwrap());
}
