//! Index range scan.
//!
//! The scan descends once to the leaf holding the first candidate entry,
//! then follows the `next` links of the leaf chain. It keeps a copy of the
//! current leaf, so entries inserted or deleted behind the cursor are not
//! observed until it moves to the next leaf.

use crate::error::{Result, StorageError};
use crate::index::key::Key;
use crate::index::node::LeafNode;
use crate::index::IndexFile;
use crate::types::Rid;
use std::cmp::Ordering;
use std::ops::Bound;

/// Iterator over the `(Rid, Key)` entries of an index range
pub struct IndexScan<'a> {
    index: &'a IndexFile,
    low: Bound<Key>,
    high: Bound<Key>,
    /// Current leaf, `None` once the scan is exhausted
    leaf: Option<LeafNode>,
    /// Next entry within the current leaf
    pos: usize,
    /// Leaves visited so far, bounded by the file size
    hops: u32,
}

impl<'a> IndexScan<'a> {
    pub(crate) fn new(index: &'a IndexFile, low: Bound<Key>, high: Bound<Key>) -> Result<Self> {
        let start = match &low {
            Bound::Included(k) | Bound::Excluded(k) => Some(k),
            Bound::Unbounded => None,
        };
        let (_, leaf) = index.find_leaf(start)?;
        let pos = start.map_or(0, |k| leaf.lower_bound(k));

        Ok(Self {
            index,
            low,
            high,
            leaf: Some(leaf),
            pos,
            hops: 0,
        })
    }

    /// End the scan early
    pub fn close(self) {}

    fn above_low(&self, key: &Key) -> bool {
        match &self.low {
            Bound::Included(low) => key.compare(low) != Ordering::Less,
            Bound::Excluded(low) => key.compare(low) == Ordering::Greater,
            Bound::Unbounded => true,
        }
    }

    fn below_high(&self, key: &Key) -> bool {
        match &self.high {
            Bound::Included(high) => key.compare(high) != Ordering::Greater,
            Bound::Excluded(high) => key.compare(high) == Ordering::Less,
            Bound::Unbounded => true,
        }
    }

    fn advance(&mut self) -> Result<Option<(Rid, Key)>> {
        loop {
            let Some(leaf) = &self.leaf else {
                return Ok(None);
            };

            let Some((key, rid)) = leaf.entries.get(self.pos).cloned() else {
                let next = leaf.next;
                if next.is_none() {
                    self.leaf = None;
                    return Ok(None);
                }

                self.hops += 1;
                if self.hops > self.index.page_count() {
                    return Err(StorageError::corruption("leaf chain does not terminate"));
                }
                self.leaf = Some(self.index.read_leaf(next)?);
                self.pos = 0;
                continue;
            };
            self.pos += 1;

            // duplicates of an exclusive low bound may spill into later leaves
            if !self.above_low(&key) {
                continue;
            }
            if !self.below_high(&key) {
                self.leaf = None;
                return Ok(None);
            }
            return Ok(Some((rid, key)));
        }
    }
}

impl Iterator for IndexScan<'_> {
    type Item = Result<(Rid, Key)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(item) => item.map(Ok),
            Err(e) => {
                self.leaf = None;
                Some(Err(e))
            }
        }
    }
}
