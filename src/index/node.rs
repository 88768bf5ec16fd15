//! B+Tree node encoding and decoding.
//!
//! Every node fills one page. Byte 0 is the node type, followed by a
//! type-specific header and a directory of fixed-size slots kept in key
//! order. VarChar keys live in a variable-length area growing backward
//! from the end of the page; their slot holds the area offset instead of
//! the key.
//!
//! Leaf node:
//! ```text
//! Offset  Size  Description
//! 0       1     Node type (0)
//! 1       4     Next leaf page (0 = none)
//! 5       4     Previous leaf page (0 = none)
//! 9       2     Slot count
//! 11      2     Free-space offset (start of the variable area)
//! 13      12*n  Slots: key (4), rid page (4), rid slot (4)
//! ```
//!
//! Internal node:
//! ```text
//! Offset  Size  Description
//! 0       1     Node type (1)
//! 1       2     Slot count
//! 3       2     Free-space offset
//! 5       4     Leftmost child page
//! 9       8*n   Slots: key (4), child page (4)
//! ```

use crate::error::{Result, StorageError};
use crate::index::key::{Key, KEY_SLOT_SIZE};
use crate::page::PageBuf;
use crate::types::{utf8, AttrType, PageNum, Rid, PAGE_SIZE};
use std::cmp::Ordering;

pub const LEAF_HEADER_SIZE: usize = 13;
pub const LEAF_SLOT_SIZE: usize = KEY_SLOT_SIZE + 8;
pub const INTERNAL_HEADER_SIZE: usize = 9;
pub const INTERNAL_SLOT_SIZE: usize = KEY_SLOT_SIZE + 4;

const LEAF_TYPE: u8 = 0;
const INTERNAL_TYPE: u8 = 1;

/// Position of a child within an internal node: `None` is the leftmost
/// child, `Some(i)` the child of slot `i`.
pub type ChildPos = Option<usize>;

/// A decoded leaf node
#[derive(Debug, Clone, Default)]
pub struct LeafNode {
    pub next: PageNum,
    pub prev: PageNum,
    pub entries: Vec<(Key, Rid)>,
}

/// A decoded internal node
#[derive(Debug, Clone)]
pub struct InternalNode {
    pub leftmost: PageNum,
    pub entries: Vec<(Key, PageNum)>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

/// Number of leading entries whose key is below `key` (`strict`) or at or
/// below it.
fn partition<T>(entries: &[(Key, T)], key: &Key, strict: bool) -> usize {
    entries.partition_point(|(k, _)| match k.compare(key) {
        Ordering::Less => true,
        Ordering::Equal => !strict,
        Ordering::Greater => false,
    })
}

impl LeafNode {
    /// Position after the last entry with a key `<= key`
    pub fn upper_bound(&self, key: &Key) -> usize {
        partition(&self.entries, key, false)
    }

    /// Position of the first entry with a key `>= key`
    pub fn lower_bound(&self, key: &Key) -> usize {
        partition(&self.entries, key, true)
    }

    pub fn size(&self) -> usize {
        LEAF_HEADER_SIZE + self.entries.iter().map(|(k, _)| leaf_entry_size(k)).sum::<usize>()
    }

    pub fn fits(&self) -> bool {
        self.size() <= PAGE_SIZE
    }

    pub fn to_page(&self) -> Result<PageBuf> {
        if !self.fits() {
            return Err(StorageError::PageFull {
                page: PageNum::NONE,
                needed: self.size(),
                available: PAGE_SIZE,
            });
        }

        let mut page = PageBuf::new();
        let mut var = VarArea::new();
        page.write_u8(0, LEAF_TYPE)?;
        page.write_u32(1, self.next.value())?;
        page.write_u32(5, self.prev.value())?;
        page.write_u16(9, self.entries.len() as u16)?;

        for (i, (key, rid)) in self.entries.iter().enumerate() {
            let at = LEAF_HEADER_SIZE + i * LEAF_SLOT_SIZE;
            var.write_key(&mut page, at, key)?;
            page.write_u32(at + 4, rid.page.value())?;
            page.write_u32(at + 8, rid.slot)?;
        }

        page.write_u16(11, var.offset as u16)?;
        Ok(page)
    }

    fn read(page: &PageBuf, key_type: AttrType) -> Result<Self> {
        let count = page.read_u16(9)? as usize;
        let entries = (0..count)
            .map(|i| {
                let at = LEAF_HEADER_SIZE + i * LEAF_SLOT_SIZE;
                let key = read_key(page, at, key_type)?;
                let rid = Rid {
                    page: PageNum::new(page.read_u32(at + 4)?),
                    slot: page.read_u32(at + 8)?,
                };
                Ok((key, rid))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            next: PageNum::new(page.read_u32(1)?),
            prev: PageNum::new(page.read_u32(5)?),
            entries,
        })
    }
}

impl InternalNode {
    pub fn new(leftmost: PageNum) -> Self {
        Self {
            leftmost,
            entries: Vec::new(),
        }
    }

    /// Child covering `key` for insertion: the last slot whose key is
    /// `<= key`, or the leftmost child.
    pub fn route(&self, key: &Key) -> ChildPos {
        partition(&self.entries, key, false).checked_sub(1)
    }

    /// Child holding the first occurrence of `key`: the last slot whose key
    /// is `< key`, or the leftmost child. Duplicates of a separator may
    /// remain in the child to its left after a split.
    pub fn route_first(&self, key: &Key) -> ChildPos {
        partition(&self.entries, key, true).checked_sub(1)
    }

    pub fn child(&self, pos: ChildPos) -> Result<PageNum> {
        match pos {
            None => Ok(self.leftmost),
            Some(i) => self
                .entries
                .get(i)
                .map(|(_, child)| *child)
                .ok_or_else(|| StorageError::corruption(format!("child slot {} out of range", i))),
        }
    }

    /// Children in key order
    pub fn children(&self) -> impl Iterator<Item = PageNum> + '_ {
        std::iter::once(self.leftmost).chain(self.entries.iter().map(|(_, child)| *child))
    }

    pub fn size(&self) -> usize {
        INTERNAL_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|(k, _)| internal_entry_size(k))
                .sum::<usize>()
    }

    pub fn fits(&self) -> bool {
        self.size() <= PAGE_SIZE
    }

    pub fn to_page(&self) -> Result<PageBuf> {
        if !self.fits() {
            return Err(StorageError::PageFull {
                page: PageNum::NONE,
                needed: self.size(),
                available: PAGE_SIZE,
            });
        }

        let mut page = PageBuf::new();
        let mut var = VarArea::new();
        page.write_u8(0, INTERNAL_TYPE)?;
        page.write_u16(1, self.entries.len() as u16)?;
        page.write_u32(5, self.leftmost.value())?;

        for (i, (key, child)) in self.entries.iter().enumerate() {
            let at = INTERNAL_HEADER_SIZE + i * INTERNAL_SLOT_SIZE;
            var.write_key(&mut page, at, key)?;
            page.write_u32(at + 4, child.value())?;
        }

        page.write_u16(3, var.offset as u16)?;
        Ok(page)
    }

    fn read(page: &PageBuf, key_type: AttrType) -> Result<Self> {
        let count = page.read_u16(1)? as usize;
        let entries = (0..count)
            .map(|i| {
                let at = INTERNAL_HEADER_SIZE + i * INTERNAL_SLOT_SIZE;
                Ok((read_key(page, at, key_type)?, PageNum::new(page.read_u32(at + 4)?)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            leftmost: PageNum::new(page.read_u32(5)?),
            entries,
        })
    }
}

impl Node {
    /// Decode a node page
    pub fn read(page: &PageBuf, key_type: AttrType) -> Result<Self> {
        match page.read_u8(0)? {
            LEAF_TYPE => Ok(Self::Leaf(LeafNode::read(page, key_type)?)),
            INTERNAL_TYPE => Ok(Self::Internal(InternalNode::read(page, key_type)?)),
            other => Err(StorageError::invalid_page(format!("unknown node type {}", other))),
        }
    }
}

pub fn leaf_entry_size(key: &Key) -> usize {
    LEAF_SLOT_SIZE + key.var_len()
}

pub fn internal_entry_size(key: &Key) -> usize {
    INTERNAL_SLOT_SIZE + key.var_len()
}

/// Backward-growing variable-length area of a node being encoded
struct VarArea {
    offset: usize,
}

impl VarArea {
    fn new() -> Self {
        Self { offset: PAGE_SIZE }
    }

    /// Write `key` into the slot key field at `at`
    fn write_key(&mut self, page: &mut PageBuf, at: usize, key: &Key) -> Result<()> {
        match key {
            Key::Int(v) => page.write_i32(at, *v),
            Key::Real(v) => page.write_f32(at, *v),
            Key::VarChar(s) => {
                self.offset -= key.var_len();
                page.write_prefixed(self.offset, s.as_bytes())?;
                page.write_u32(at, self.offset as u32)
            }
        }
    }
}

fn read_key(page: &PageBuf, at: usize, key_type: AttrType) -> Result<Key> {
    Ok(match key_type {
        AttrType::Int => Key::Int(page.read_i32(at)?),
        AttrType::Real => Key::Real(page.read_f32(at)?),
        AttrType::VarChar => {
            let offset = page.read_u32(at)? as usize;
            Key::VarChar(utf8(page.read_prefixed(offset)?)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_roundtrip() -> Result<()> {
        let leaf = LeafNode {
            next: PageNum::new(9),
            prev: PageNum::new(4),
            entries: vec![
                (Key::from("apple"), Rid::new(1, 0)),
                (Key::from("banana"), Rid::new(1, 1)),
                (Key::from("banana"), Rid::new(3, 7)),
            ],
        };

        let page = leaf.to_page()?;
        assert_eq!(page.read_u16(11)? as usize, PAGE_SIZE - (4 + 5) - 2 * (4 + 6));

        let Node::Leaf(decoded) = Node::read(&page, AttrType::VarChar)? else {
            panic!("expected a leaf");
        };
        assert_eq!(decoded.next, leaf.next);
        assert_eq!(decoded.prev, leaf.prev);
        assert_eq!(decoded.entries, leaf.entries);
        Ok(())
    }

    #[test]
    fn test_internal_roundtrip_and_routing() -> Result<()> {
        let node = InternalNode {
            leftmost: PageNum::new(100),
            entries: vec![
                (Key::Int(10), PageNum::new(10)),
                (Key::Int(20), PageNum::new(20)),
                (Key::Int(20), PageNum::new(21)),
            ],
        };

        let Node::Internal(decoded) = Node::read(&node.to_page()?, AttrType::Int)? else {
            panic!("expected an internal node");
        };
        assert_eq!(decoded.leftmost, node.leftmost);
        assert_eq!(decoded.entries, node.entries);

        assert_eq!(node.route(&Key::Int(5)), None);
        assert_eq!(node.route(&Key::Int(10)), Some(0));
        assert_eq!(node.route(&Key::Int(20)), Some(2));
        assert_eq!(node.route_first(&Key::Int(10)), None);
        assert_eq!(node.route_first(&Key::Int(20)), Some(0));
        assert_eq!(node.child(Some(1))?, PageNum::new(20));
        assert!(node.child(Some(5)).is_err());
        Ok(())
    }

    #[test]
    fn test_leaf_bounds() {
        let leaf = LeafNode {
            entries: [1, 3, 3, 3, 5]
                .iter()
                .enumerate()
                .map(|(i, &k)| (Key::Int(k), Rid::new(1, i as u32)))
                .collect(),
            ..Default::default()
        };
        assert_eq!(leaf.lower_bound(&Key::Int(3)), 1);
        assert_eq!(leaf.upper_bound(&Key::Int(3)), 4);
        assert_eq!(leaf.lower_bound(&Key::Int(6)), 5);
    }

    #[test]
    fn test_overfull_node_rejected() {
        let leaf = LeafNode {
            entries: (0..400).map(|i| (Key::Int(i), Rid::new(1, i as u32))).collect(),
            ..Default::default()
        };
        assert!(!leaf.fits());
        assert!(matches!(leaf.to_page(), Err(StorageError::PageFull { .. })));
    }

    #[test]
    fn test_unknown_node_type() {
        let mut page = PageBuf::new();
        page.as_bytes_mut()[0] = 7;
        assert!(matches!(
            Node::read(&page, AttrType::Int),
            Err(StorageError::InvalidPage(_))
        ));
    }
}
