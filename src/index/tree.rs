//! B+Tree core implementation.
//!
//! This module provides the IndexFile struct with operations for:
//! - insert_entry: Insertions, splitting full nodes on the way back up
//! - delete_entry: Removals (nodes are never merged)
//! - scan / range: Range queries over the leaf chain
//! - dump_tree / verify: Diagnostics
//!
//! Page 0 is the meta page, page 1 the initial root (always an internal
//! node) and page 2 the initial, empty leaf. New nodes are appended at the
//! end of the file; pages are never reused.

use crate::error::{Result, StorageError};
use crate::index::key::Key;
use crate::index::meta::IndexMeta;
use crate::index::node::{
    internal_entry_size, leaf_entry_size, ChildPos, InternalNode, LeafNode, Node,
    INTERNAL_HEADER_SIZE, LEAF_HEADER_SIZE,
};
use crate::index::IndexScan;
use crate::page::PageBuf;
use crate::storage::{IoCounters, MemoryPageStore, PageStore, PagedFileManager};
use crate::types::{AttrType, PageNum, Rid, PAGE_SIZE};
use crate::Config;
use log::debug;
use serde::Serialize;
use std::cmp::Ordering;
use std::ops::{Bound, RangeBounds};
use std::path::Path;

/// Node type for visualization
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    /// Page number of the node
    #[serde(skip)]
    pub page: PageNum,
    /// Whether this is a leaf node
    #[serde(skip)]
    pub is_leaf: bool,
    /// Separator keys, or for leaves `key:[(page,slot),...]` per distinct key
    pub keys: Vec<String>,
    /// Child nodes (only for internal nodes)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// An open B+Tree index
pub struct IndexFile {
    store: Box<dyn PageStore>,
    config: Config,
    meta: IndexMeta,
}

impl IndexFile {
    /// Lay out an empty index in an empty store
    pub fn create(store: Box<dyn PageStore>, key_type: AttrType, config: Config) -> Result<Self> {
        if store.page_count() != 0 {
            return Err(StorageError::invalid_operation(
                "an index can only be created in an empty file",
            ));
        }

        let meta = IndexMeta::new(key_type, PageNum::new(1));
        store.append_page(&meta.to_page()?)?;
        store.append_page(&InternalNode::new(PageNum::new(2)).to_page()?)?;
        store.append_page(&LeafNode::default().to_page()?)?;

        Ok(Self {
            store,
            config,
            meta,
        })
    }

    /// Open an index laid out by `create`
    pub fn open(store: Box<dyn PageStore>, config: Config) -> Result<Self> {
        if store.page_count() < 3 {
            return Err(StorageError::invalid_db(format!(
                "index file has {} pages",
                store.page_count()
            )));
        }
        let meta = IndexMeta::read(&store.read_page(PageNum::NONE)?)?;

        Ok(Self {
            store,
            config,
            meta,
        })
    }

    /// An index that lives only in memory
    pub fn in_memory(key_type: AttrType, config: Config) -> Result<Self> {
        Self::create(Box::new(MemoryPageStore::new()), key_type, config)
    }

    pub fn key_type(&self) -> AttrType {
        self.meta.key_type
    }

    /// Get the root page number
    pub fn root(&self) -> PageNum {
        self.meta.root
    }

    pub fn page_count(&self) -> u32 {
        self.store.page_count()
    }

    pub fn counters(&self) -> IoCounters {
        self.store.counters()
    }

    /// Flush the underlying store and release the handle
    pub fn close(self) -> Result<()> {
        self.store.sync()
    }

    fn read_node(&self, page: PageNum) -> Result<Node> {
        Node::read(&self.store.read_page(page)?, self.meta.key_type)
    }

    pub(crate) fn read_leaf(&self, page: PageNum) -> Result<LeafNode> {
        match self.read_node(page)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(StorageError::corruption(format!(
                "page {} is linked as a leaf but holds an internal node",
                page
            ))),
        }
    }

    fn write(&self, page: PageNum, data: &PageBuf) -> Result<()> {
        self.store.write_page(page, data)
    }

    fn too_deep(&self) -> StorageError {
        StorageError::corruption(format!(
            "tree deeper than {} levels",
            self.config.max_tree_depth
        ))
    }

    /// Insert a (key, rid) entry. Duplicate keys are kept in insertion
    /// order.
    pub fn insert_entry(&mut self, key: &Key, rid: Rid) -> Result<()> {
        key.check(self.meta.key_type)?;

        // Descend, remembering each internal node and the child taken
        let mut path: Vec<(PageNum, InternalNode, ChildPos)> = Vec::new();
        let mut page = self.meta.root;
        let mut leaf = loop {
            if path.len() >= self.config.max_tree_depth {
                return Err(self.too_deep());
            }
            match self.read_node(page)? {
                Node::Internal(node) => {
                    let pos = node.route(key);
                    let child = node.child(pos)?;
                    path.push((page, node, pos));
                    page = child;
                }
                Node::Leaf(leaf) => break leaf,
            }
        };

        let at = leaf.upper_bound(key);
        leaf.entries.insert(at, (key.clone(), rid));
        let mut promoted = if leaf.fits() {
            self.write(page, &leaf.to_page()?)?;
            None
        } else {
            Some(self.split_leaf(page, leaf)?)
        };

        // Walk back up while children keep splitting
        while let Some((separator, right)) = promoted.take() {
            let Some((page, mut node, pos)) = path.pop() else {
                return self.grow_root(separator, right);
            };

            node.entries.insert(pos.map_or(0, |i| i + 1), (separator, right));
            if node.fits() {
                self.write(page, &node.to_page()?)?;
            } else {
                promoted = Some(self.split_internal(page, node)?);
            }
        }

        Ok(())
    }

    /// Split an overfull leaf; the upper part moves to a new page appended
    /// at the end of the file. Returns the separator and the new page.
    fn split_leaf(&mut self, page: PageNum, mut leaf: LeafNode) -> Result<(Key, PageNum)> {
        let at = leaf_split_point(&leaf.entries)?;
        let right = LeafNode {
            next: leaf.next,
            prev: page,
            entries: leaf.entries.split_off(at),
        };
        let separator = right.entries[0].0.clone();
        let right_page = self.store.append_page(&right.to_page()?)?;

        let old_next = leaf.next;
        leaf.next = right_page;
        self.write(page, &leaf.to_page()?)?;

        if !old_next.is_none() {
            let mut next = self.read_leaf(old_next)?;
            next.prev = right_page;
            self.write(old_next, &next.to_page()?)?;
        }

        debug!(
            "split leaf {} ({} entries) into {} ({} entries) at {}",
            page,
            leaf.entries.len(),
            right_page,
            right.entries.len(),
            separator
        );
        Ok((separator, right_page))
    }

    /// Split an overfull internal node. The middle entry moves up to the
    /// parent and is kept in neither half.
    fn split_internal(&mut self, page: PageNum, mut node: InternalNode) -> Result<(Key, PageNum)> {
        let mid = internal_split_point(&node.entries)?;
        let mut upper = node.entries.split_off(mid);
        let (separator, leftmost) = upper.remove(0);
        let right = InternalNode {
            leftmost,
            entries: upper,
        };

        let right_page = self.store.append_page(&right.to_page()?)?;
        self.write(page, &node.to_page()?)?;

        debug!(
            "split internal node {} into {} at {}",
            page, right_page, separator
        );
        Ok((separator, right_page))
    }

    /// Put a new root above the current one
    fn grow_root(&mut self, separator: Key, right: PageNum) -> Result<()> {
        let old_root = self.meta.root;
        let mut root = InternalNode::new(old_root);
        root.entries.push((separator, right));

        let new_root = self.store.append_page(&root.to_page()?)?;
        let meta = IndexMeta::new(self.meta.key_type, new_root);
        self.write(PageNum::NONE, &meta.to_page()?)?;
        self.meta = meta;

        debug!("grew new root {} over {} and {}", new_root, old_root, right);
        Ok(())
    }

    /// Descend to the leaf that holds the first entry `>= key`, or to the
    /// leftmost leaf when `key` is `None`.
    pub(crate) fn find_leaf(&self, key: Option<&Key>) -> Result<(PageNum, LeafNode)> {
        let mut page = self.meta.root;
        for _ in 0..=self.config.max_tree_depth {
            match self.read_node(page)? {
                Node::Internal(node) => page = node.child(key.and_then(|k| node.route_first(k)))?,
                Node::Leaf(leaf) => return Ok((page, leaf)),
            }
        }
        Err(self.too_deep())
    }

    /// Remove one (key, rid) entry. Underfull nodes are left as they are.
    pub fn delete_entry(&mut self, key: &Key, rid: Rid) -> Result<()> {
        key.check(self.meta.key_type)?;
        let (mut page, mut leaf) = self.find_leaf(Some(key))?;

        for _ in 0..self.store.page_count() {
            for i in leaf.lower_bound(key)..leaf.entries.len() {
                let (k, r) = &leaf.entries[i];
                if k.compare(key) != Ordering::Equal {
                    return Err(StorageError::EntryNotFound);
                }
                if *r == rid {
                    leaf.entries.remove(i);
                    return self.write(page, &leaf.to_page()?);
                }
            }

            if leaf.next.is_none() {
                return Err(StorageError::EntryNotFound);
            }
            page = leaf.next;
            leaf = self.read_leaf(page)?;
        }

        Err(StorageError::corruption("leaf chain does not terminate"))
    }

    /// Scan entries between `low` and `high`; `None` leaves that side
    /// unbounded.
    pub fn scan(
        &self,
        low: Option<&Key>,
        high: Option<&Key>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Result<IndexScan<'_>> {
        let bound = |key: Option<&Key>, inclusive: bool| match key {
            None => Bound::Unbounded,
            Some(k) if inclusive => Bound::Included(k.clone()),
            Some(k) => Bound::Excluded(k.clone()),
        };
        self.range((bound(low, low_inclusive), bound(high, high_inclusive)))
    }

    /// Scan the entries whose keys fall in `range`
    pub fn range<R: RangeBounds<Key>>(&self, range: R) -> Result<IndexScan<'_>> {
        let low = range.start_bound().cloned();
        let high = range.end_bound().cloned();
        for key in [&low, &high] {
            if let Bound::Included(k) | Bound::Excluded(k) = key {
                k.check(self.meta.key_type)?;
            }
        }
        IndexScan::new(self, low, high)
    }

    /// Export the tree structure for debugging
    pub fn dump_tree(&self) -> Result<TreeNode> {
        self.dump_node(self.meta.root, 0)
    }

    /// Render the tree as nested `{"keys": [...], "children": [...]}` JSON
    pub fn dump_tree_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.dump_tree()?)?)
    }

    fn dump_node(&self, page: PageNum, depth: usize) -> Result<TreeNode> {
        if depth > self.config.max_tree_depth {
            return Err(self.too_deep());
        }

        match self.read_node(page)? {
            Node::Leaf(leaf) => {
                let mut groups: Vec<(&Key, Vec<String>)> = Vec::new();
                for (key, rid) in &leaf.entries {
                    match groups.last_mut() {
                        Some((last, rids)) if last.compare(key) == Ordering::Equal => {
                            rids.push(rid.to_string())
                        }
                        _ => groups.push((key, vec![rid.to_string()])),
                    }
                }
                let keys = groups
                    .into_iter()
                    .map(|(key, rids)| format!("{}:[{}]", key, rids.join(",")))
                    .collect();

                Ok(TreeNode {
                    page,
                    is_leaf: true,
                    keys,
                    children: Vec::new(),
                })
            }
            Node::Internal(node) => Ok(TreeNode {
                page,
                is_leaf: false,
                keys: node.entries.iter().map(|(k, _)| k.to_string()).collect(),
                children: node
                    .children()
                    .map(|child| self.dump_node(child, depth + 1))
                    .collect::<Result<_>>()?,
            }),
        }
    }

    /// Check the tree invariants: keys are ordered within each node,
    /// every subtree stays within its separators, and the leaf chain links
    /// the leaves in tree order in both directions. Returns the number of
    /// entries.
    pub fn verify(&self) -> Result<usize> {
        let mut leaves = Vec::new();
        let count = self.verify_node(self.meta.root, None, None, 0, &mut leaves)?;

        let mut prev = PageNum::NONE;
        let mut last_key: Option<Key> = None;
        for (i, &page) in leaves.iter().enumerate() {
            let leaf = self.read_leaf(page)?;
            if leaf.prev != prev {
                return Err(StorageError::corruption(format!(
                    "leaf {} links back to {} instead of {}",
                    page, leaf.prev, prev
                )));
            }
            if let (Some(last), Some((first, _))) = (&last_key, leaf.entries.first()) {
                if first.compare(last) == Ordering::Less {
                    return Err(StorageError::corruption(format!(
                        "leaf {} starts below the previous leaf",
                        page
                    )));
                }
            }
            if let Some((key, _)) = leaf.entries.last() {
                last_key = Some(key.clone());
            }
            let expected_next = leaves.get(i + 1).copied().unwrap_or(PageNum::NONE);
            if leaf.next != expected_next {
                return Err(StorageError::corruption(format!(
                    "leaf {} links forward to {} instead of {}",
                    page, leaf.next, expected_next
                )));
            }
            prev = page;
        }

        Ok(count)
    }

    fn verify_node(
        &self,
        page: PageNum,
        low: Option<&Key>,
        high: Option<&Key>,
        depth: usize,
        leaves: &mut Vec<PageNum>,
    ) -> Result<usize> {
        if depth > self.config.max_tree_depth {
            return Err(self.too_deep());
        }

        let in_bounds = |key: &Key| {
            low.map_or(true, |l| key.compare(l) != Ordering::Less)
                && high.map_or(true, |h| key.compare(h) != Ordering::Greater)
        };
        let out_of_order = |page: PageNum| {
            StorageError::corruption(format!("node {} has keys out of order or out of range", page))
        };

        match self.read_node(page)? {
            Node::Leaf(leaf) => {
                let keys: Vec<&Key> = leaf.entries.iter().map(|(k, _)| k).collect();
                if !is_sorted(&keys) || !keys.iter().all(|k| in_bounds(*k)) {
                    return Err(out_of_order(page));
                }
                leaves.push(page);
                Ok(leaf.entries.len())
            }
            Node::Internal(node) => {
                let keys: Vec<&Key> = node.entries.iter().map(|(k, _)| k).collect();
                if !is_sorted(&keys) || !keys.iter().all(|k| in_bounds(*k)) {
                    return Err(out_of_order(page));
                }

                let mut count = self.verify_node(
                    node.leftmost,
                    low,
                    keys.first().copied().or(high),
                    depth + 1,
                    leaves,
                )?;
                for (i, (key, child)) in node.entries.iter().enumerate() {
                    let upper = keys.get(i + 1).copied().or(high);
                    count += self.verify_node(*child, Some(key), upper, depth + 1, leaves)?;
                }
                Ok(count)
            }
        }
    }
}

fn is_sorted(keys: &[&Key]) -> bool {
    keys.windows(2)
        .all(|pair| pair[0].compare(pair[1]) != Ordering::Greater)
}

/// Where to cut an overfull leaf.
///
/// Starts from the point where the cumulative entry size passes half of
/// the total, then moves to the nearest boundary between two different
/// keys so duplicates stay together. When no such boundary leaves both
/// halves within a page, the duplicates straddle the split.
fn leaf_split_point(entries: &[(Key, Rid)]) -> Result<usize> {
    let sizes: Vec<usize> = entries.iter().map(|(k, _)| leaf_entry_size(k)).collect();
    let mid = size_midpoint(&sizes)?;

    let boundary = |at: usize| entries[at - 1].0.compare(&entries[at].0) != Ordering::Equal;
    let fits = |at: usize| {
        LEAF_HEADER_SIZE + sizes[..at].iter().sum::<usize>() <= PAGE_SIZE
            && LEAF_HEADER_SIZE + sizes[at..].iter().sum::<usize>() <= PAGE_SIZE
    };
    if boundary(mid) {
        return Ok(mid);
    }

    let before = (1..mid).rev().find(|&at| boundary(at));
    let after = (mid + 1..entries.len()).find(|&at| boundary(at));
    let mut candidates: Vec<usize> = before.into_iter().chain(after).collect();
    candidates.sort_by_key(|&at| at.abs_diff(mid));

    Ok(candidates.into_iter().find(|&at| fits(at)).unwrap_or(mid))
}

/// Index of the entry promoted out of an overfull internal node
fn internal_split_point(entries: &[(Key, PageNum)]) -> Result<usize> {
    if entries.len() < 3 {
        return Err(StorageError::corruption(format!(
            "internal node with {} entries cannot overflow",
            entries.len()
        )));
    }
    let sizes: Vec<usize> = entries.iter().map(|(k, _)| internal_entry_size(k)).collect();
    debug_assert!(INTERNAL_HEADER_SIZE + sizes.iter().sum::<usize>() > PAGE_SIZE);
    Ok(size_midpoint(&sizes)?.clamp(1, entries.len() - 2))
}

/// First cut `at` such that `sizes[..at]` holds at least half of the total
/// bytes, kept within `1..len`.
fn size_midpoint(sizes: &[usize]) -> Result<usize> {
    if sizes.len() < 2 {
        return Err(StorageError::corruption(format!(
            "node with {} entries cannot overflow",
            sizes.len()
        )));
    }

    let total: usize = sizes.iter().sum();
    let mut acc = 0;
    let mut at = sizes.len() - 1;
    for (i, size) in sizes.iter().enumerate() {
        acc += size;
        if acc * 2 >= total {
            at = i + 1;
            break;
        }
    }
    Ok(at.clamp(1, sizes.len() - 1))
}

/// Creates, destroys, opens and closes index files
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    pfm: PagedFileManager,
    config: Config,
}

impl IndexManager {
    pub fn new(config: Config) -> Self {
        Self {
            pfm: PagedFileManager::new().with_sync_on_write(config.sync_on_write),
            config,
        }
    }

    /// Create an empty index over keys of `key_type`
    pub fn create_file(&self, path: impl AsRef<Path>, key_type: AttrType) -> Result<()> {
        let path = path.as_ref();
        self.pfm.create_file(path)?;

        let file = self.pfm.open_file(path)?;
        IndexFile::create(Box::new(file), key_type, self.config.clone())?.close()
    }

    pub fn destroy_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.pfm.destroy_file(path)
    }

    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<IndexFile> {
        let file = self.pfm.open_file(path)?;
        IndexFile::open(Box::new(file), self.config.clone())
    }

    pub fn close_file(&self, index: IndexFile) -> Result<()> {
        index.close()
    }
}
