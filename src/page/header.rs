//! Slot directory header and entries.
//!
//! The header occupies the first bytes of each record page; the slot
//! directory follows it.

use crate::error::Result;
use crate::page::PageBuf;
use crate::types::{PageNum, Rid, PAGE_SIZE};

/// Size of the record page header
pub const SLOT_HEADER_SIZE: usize = 4;

/// Size of one slot directory entry
pub const SLOT_ENTRY_SIZE: usize = 8;

/// Length bit set on the slot of a relocated record
const RELOCATED: u32 = 1 << 31;

/// Record page header
///
/// Layout (4 bytes):
/// ```text
/// Offset  Size  Description
/// 0       2     Free-space offset (start of the record area)
/// 2       2     Number of slot directory entries
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    /// Start of the backward-growing record area
    pub free_space_offset: u16,
    /// Number of entries in the slot directory
    pub slot_count: u16,
}

impl SlotHeader {
    /// Header of an empty page
    pub fn new() -> Self {
        Self {
            free_space_offset: PAGE_SIZE as u16,
            slot_count: 0,
        }
    }

    /// Read a header from a page
    pub fn read(page: &PageBuf) -> Result<Self> {
        Ok(Self {
            free_space_offset: page.read_u16(0)?,
            slot_count: page.read_u16(2)?,
        })
    }

    /// Write this header to a page
    pub fn write(&self, page: &mut PageBuf) -> Result<()> {
        page.write_bytes(0, &self.to_bytes())
    }

    /// Encode the header
    pub fn to_bytes(&self) -> [u8; SLOT_HEADER_SIZE] {
        let mut buf = [0u8; SLOT_HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.free_space_offset.to_be_bytes());
        buf[2..4].copy_from_slice(&self.slot_count.to_be_bytes());
        buf
    }

    /// End of the slot directory
    pub fn directory_end(&self) -> usize {
        SLOT_HEADER_SIZE + self.slot_count as usize * SLOT_ENTRY_SIZE
    }

    /// Bytes between the slot directory and the record area
    pub fn free_space(&self) -> usize {
        (self.free_space_offset as usize).saturating_sub(self.directory_end())
    }
}

impl Default for SlotHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// One slot directory entry
///
/// Layout (8 bytes):
/// ```text
/// Offset  Size  Description
/// 0       4     Record offset (0 = empty, negative = forwarding tombstone)
/// 4       4     Record length (or target slot for a tombstone); the high
///               bit marks a record relocated here from another RID
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub offset: i32,
    pub length: u32,
}

/// Decoded meaning of a slot entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// A record lives on this page
    Normal { offset: usize, length: usize },
    /// Deleted or never used; reusable by a later insert
    Empty,
    /// The record was relocated to another RID
    Forward(Rid),
}

impl SlotEntry {
    pub const EMPTY: SlotEntry = SlotEntry {
        offset: 0,
        length: 0,
    };

    /// Entry for a record stored on this page
    pub fn normal(offset: usize, length: usize) -> Self {
        Self {
            offset: offset as i32,
            length: length as u32,
        }
    }

    /// Same entry with its record moved to `offset`; the relocated mark
    /// is kept
    pub fn moved_to(self, offset: usize) -> Self {
        Self {
            offset: offset as i32,
            ..self
        }
    }

    /// Mark a normal entry as the target of a forwarding tombstone
    pub fn mark_relocated(self) -> Self {
        Self {
            length: self.length | RELOCATED,
            ..self
        }
    }

    /// Whether this normal entry holds a record relocated from another RID
    pub fn is_relocated(&self) -> bool {
        self.offset > 0 && self.length & RELOCATED != 0
    }

    /// Tombstone pointing at `target`
    pub fn forward(target: Rid) -> Self {
        Self {
            offset: -(target.page.value() as i32),
            length: target.slot,
        }
    }

    /// Byte position of entry `slot` within the page
    pub fn position(slot: usize) -> usize {
        SLOT_HEADER_SIZE + slot * SLOT_ENTRY_SIZE
    }

    /// Read entry `slot`
    pub fn read(page: &PageBuf, slot: usize) -> Result<Self> {
        let pos = Self::position(slot);
        Ok(Self {
            offset: page.read_i32(pos)?,
            length: page.read_u32(pos + 4)?,
        })
    }

    /// Write this entry as entry `slot`
    pub fn write(&self, page: &mut PageBuf, slot: usize) -> Result<()> {
        let pos = Self::position(slot);
        page.write_i32(pos, self.offset)?;
        page.write_u32(pos + 4, self.length)
    }

    pub fn state(&self) -> SlotState {
        match self.offset {
            0 => SlotState::Empty,
            o if o > 0 => SlotState::Normal {
                offset: o as usize,
                length: (self.length & !RELOCATED) as usize,
            },
            o => SlotState::Forward(Rid {
                page: PageNum::new(o.unsigned_abs()),
                slot: self.length,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0 && self.length == 0
    }
}
