//! B+Tree index.
//!
//! This module provides a disk-based B+Tree over `(key, Rid)` entries that
//! supports:
//! - Insertions, with duplicate keys
//! - Deletions of a single entry (no rebalancing)
//! - Range scans along the leaf chain

mod cursor;
mod key;
mod meta;
mod node;
mod tree;

pub use cursor::IndexScan;
pub use key::{Key, MAX_KEY_SIZE};
pub use tree::{IndexFile, IndexManager, TreeNode};
