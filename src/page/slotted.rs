//! Slotted record page.
//!
//! A record page uses the following layout:
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │          Header (free-space offset, slots)          │
//! ├────────────────────────────────────────────────────┤
//! │                   Slot Directory                    │
//! │  [slot0][slot1][slot2]...      →                   │
//! ├────────────────────────────────────────────────────┤
//! │                                                    │
//! │                   Free Space                        │
//! │                                                    │
//! ├────────────────────────────────────────────────────┤
//! │                    Record Area                      │
//! │      ←  [rec2][rec1][rec0]                         │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! The record area is kept contiguous: deleting, shrinking or growing a
//! record shifts every record stored below it and patches their slot
//! offsets, so the free-space offset always equals the lowest record
//! offset and no space is ever fragmented.

use crate::error::{Result, StorageError};
use crate::page::header::{SlotEntry, SlotHeader, SlotState, SLOT_ENTRY_SIZE, SLOT_HEADER_SIZE};
use crate::page::{record, PageBuf};
use crate::types::{Attribute, PageNum, Rid, Tuple, PAGE_SIZE};

/// Largest encoded record that fits in an empty page
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - SLOT_HEADER_SIZE - SLOT_ENTRY_SIZE;

/// Result of an in-place update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The new version now lives in the same slot on this page
    Updated,
    /// The new version does not fit; the caller must move it elsewhere
    NeedsRelocation,
}

/// A record page together with the page number it was read from
#[derive(Clone)]
pub struct RecordPage {
    page: PageNum,
    data: PageBuf,
    /// Cached header (kept in sync with data)
    header: SlotHeader,
}

impl RecordPage {
    /// Create a new empty record page
    pub fn new(page: PageNum) -> Self {
        let header = SlotHeader::new();
        let mut data = PageBuf::new();
        data.as_bytes_mut()[..SLOT_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        Self { page, data, header }
    }

    /// Wrap a page buffer read from a store
    pub fn from_buf(page: PageNum, data: PageBuf) -> Result<Self> {
        let header = SlotHeader::read(&data)?;
        if header.free_space_offset as usize > PAGE_SIZE
            || header.directory_end() > header.free_space_offset as usize
        {
            return Err(StorageError::invalid_page(format!(
                "page {} has a bad record page header (free space offset {}, {} slots)",
                page, header.free_space_offset, header.slot_count
            )));
        }
        Ok(Self { page, data, header })
    }

    /// Load a page from raw bytes
    pub fn from_bytes(page: PageNum, bytes: &[u8]) -> Result<Self> {
        Self::from_buf(page, PageBuf::from_bytes(bytes))
    }

    pub fn page_num(&self) -> PageNum {
        self.page
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn buf(&self) -> &PageBuf {
        &self.data
    }

    pub fn header(&self) -> &SlotHeader {
        &self.header
    }

    pub fn slot_count(&self) -> u32 {
        self.header.slot_count as u32
    }

    /// Bytes between the slot directory and the record area
    pub fn free_space(&self) -> usize {
        self.header.free_space()
    }

    /// Whether a new record of `record_size` bytes (plus its slot entry) fits
    pub fn can_fit(&self, record_size: usize) -> bool {
        self.free_space() >= SLOT_ENTRY_SIZE + record_size
    }

    fn rid(&self, slot: u32) -> Rid {
        Rid {
            page: self.page,
            slot,
        }
    }

    /// Raw state of `slot`, including empty slots
    pub fn slot_state(&self, slot: u32) -> Result<SlotState> {
        if slot >= self.slot_count() {
            return Err(StorageError::SlotDoesNotExist(self.rid(slot)));
        }
        Ok(SlotEntry::read(&self.data, slot as usize)?.state())
    }

    /// State of a slot that must hold a record or a forward
    pub fn live_slot(&self, slot: u32) -> Result<SlotState> {
        match self.slot_state(slot)? {
            SlotState::Empty => Err(StorageError::RecordDoesNotExist(self.rid(slot))),
            state => Ok(state),
        }
    }

    /// Offset and length of a record stored on this page
    fn record_extent(&self, slot: u32) -> Result<(usize, usize)> {
        match self.live_slot(slot)? {
            SlotState::Normal { offset, length } => Ok((offset, length)),
            SlotState::Forward(target) => Err(StorageError::invalid_operation(format!(
                "slot {} is forwarded to {}",
                self.rid(slot),
                target
            ))),
            SlotState::Empty => Err(StorageError::RecordDoesNotExist(self.rid(slot))),
        }
    }

    /// Decode the record in `slot`
    pub fn read(&self, slot: u32, schema: &[Attribute]) -> Result<Tuple> {
        let (offset, _) = self.record_extent(slot)?;
        record::decode(self.as_bytes(), offset, schema)
    }

    /// Decode a single named field of the record in `slot`
    pub fn read_field(&self, slot: u32, schema: &[Attribute], name: &str) -> Result<Tuple> {
        let (offset, _) = self.record_extent(slot)?;
        record::decode_field(self.as_bytes(), offset, schema, name)
    }

    /// Whether `slot` holds a record relocated here from another RID
    pub fn is_relocated(&self, slot: u32) -> Result<bool> {
        self.slot_state(slot)?;
        Ok(SlotEntry::read(&self.data, slot as usize)?.is_relocated())
    }

    /// Mark the record in `slot` as the target of a forwarding tombstone
    pub fn mark_relocated(&mut self, slot: u32) -> Result<()> {
        self.record_extent(slot)?;
        let entry = SlotEntry::read(&self.data, slot as usize)?;
        entry.mark_relocated().write(&mut self.data, slot as usize)
    }

    /// Encoded bytes of the record in `slot`
    pub fn raw_record(&self, slot: u32) -> Result<&[u8]> {
        let (offset, length) = self.record_extent(slot)?;
        self.data.slice(offset, length)
    }

    /// Insert a record, reusing the first empty slot if there is one.
    ///
    /// Returns the slot number.
    pub fn insert(&mut self, schema: &[Attribute], tuple: &Tuple) -> Result<u32> {
        let size = record::record_size(schema, tuple)?;
        if !self.can_fit(size) {
            return Err(StorageError::PageFull {
                page: self.page,
                needed: SLOT_ENTRY_SIZE + size,
                available: self.free_space(),
            });
        }

        let slot = self.first_empty_slot()?.unwrap_or(self.slot_count());
        if slot == self.slot_count() {
            self.header.slot_count += 1;
        }

        let offset = self.header.free_space_offset as usize - size;
        record::encode(schema, tuple, self.data.slice_mut(offset, size)?)?;
        SlotEntry::normal(offset, size).write(&mut self.data, slot as usize)?;

        self.header.free_space_offset = offset as u16;
        self.sync_header()?;
        Ok(slot)
    }

    fn first_empty_slot(&self) -> Result<Option<u32>> {
        for slot in 0..self.slot_count() {
            if SlotEntry::read(&self.data, slot as usize)?.is_empty() {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Place already encoded record bytes into an existing non-normal slot
    pub fn insert_raw_into_slot(&mut self, slot: u32, bytes: &[u8]) -> Result<()> {
        if let SlotState::Normal { .. } = self.slot_state(slot)? {
            return Err(StorageError::invalid_operation(format!(
                "slot {} already holds a record",
                self.rid(slot)
            )));
        }
        if self.free_space() < bytes.len() {
            return Err(StorageError::PageFull {
                page: self.page,
                needed: bytes.len(),
                available: self.free_space(),
            });
        }

        let offset = self.header.free_space_offset as usize - bytes.len();
        self.data.write_bytes(offset, bytes)?;
        SlotEntry::normal(offset, bytes.len()).write(&mut self.data, slot as usize)?;

        self.header.free_space_offset = offset as u16;
        self.sync_header()
    }

    /// Encode `tuple` into an existing non-normal slot
    pub fn write_into_slot(&mut self, slot: u32, schema: &[Attribute], tuple: &Tuple) -> Result<()> {
        let size = record::record_size(schema, tuple)?;
        let mut bytes = vec![0u8; size];
        record::encode(schema, tuple, &mut bytes)?;
        self.insert_raw_into_slot(slot, &bytes)
    }

    /// Delete the record or forward in `slot`, compacting the record area
    pub fn delete(&mut self, slot: u32) -> Result<()> {
        match self.live_slot(slot)? {
            SlotState::Normal { offset, length } => self.remove_record(slot, offset, length),
            SlotState::Forward(_) | SlotState::Empty => {
                SlotEntry::EMPTY.write(&mut self.data, slot as usize)
            }
        }
    }

    fn remove_record(&mut self, slot: u32, offset: usize, length: usize) -> Result<()> {
        SlotEntry::EMPTY.write(&mut self.data, slot as usize)?;
        self.shift_records(offset, length as isize)
    }

    /// Turn `slot` into a forwarding tombstone pointing at `target`.
    ///
    /// Any record bytes still held by the slot are removed first.
    pub fn set_forward(&mut self, slot: u32, target: Rid) -> Result<()> {
        if target.page.is_none() {
            return Err(StorageError::invalid_operation(
                "records cannot be forwarded to page 0",
            ));
        }
        if let SlotState::Normal { offset, length } = self.slot_state(slot)? {
            self.remove_record(slot, offset, length)?;
        }
        SlotEntry::forward(target).write(&mut self.data, slot as usize)
    }

    /// Replace the record in `slot` with `tuple` if the page has room
    pub fn update(&mut self, slot: u32, schema: &[Attribute], tuple: &Tuple) -> Result<UpdateOutcome> {
        let (offset, length) = self.record_extent(slot)?;
        let size = record::record_size(schema, tuple)?;
        let relocated = self.is_relocated(slot)?;

        let new_offset = if size == length {
            offset
        } else if size < length {
            let diff = length - size;
            self.shift_records(offset, diff as isize)?;
            offset + diff
        } else {
            let diff = size - length;
            if self.free_space() < diff {
                return Ok(UpdateOutcome::NeedsRelocation);
            }
            self.shift_records(offset, -(diff as isize))?;
            offset - diff
        };

        record::encode(schema, tuple, self.data.slice_mut(new_offset, size)?)?;
        let entry = SlotEntry::normal(new_offset, size);
        let entry = if relocated { entry.mark_relocated() } else { entry };
        entry.write(&mut self.data, slot as usize)?;
        Ok(UpdateOutcome::Updated)
    }

    /// Move the records stored in `[free_space_offset, boundary)` by `delta`
    /// bytes and patch the offsets of the normal slots that point there.
    fn shift_records(&mut self, boundary: usize, delta: isize) -> Result<()> {
        let start = self.header.free_space_offset as usize;
        let len = boundary.checked_sub(start).ok_or_else(|| {
            StorageError::corruption(format!(
                "record at {} lies above the free space offset {} on page {}",
                boundary, start, self.page
            ))
        })?;
        let dest = start
            .checked_add_signed(delta)
            .ok_or(StorageError::OutOfBounds { offset: start, len })?;
        self.data.move_bytes(start, dest, len)?;

        for slot in 0..self.header.slot_count as usize {
            let entry = SlotEntry::read(&self.data, slot)?;
            if let SlotState::Normal { offset, length } = entry.state() {
                if offset < boundary {
                    let moved = offset
                        .checked_add_signed(delta)
                        .ok_or(StorageError::OutOfBounds { offset, len: length })?;
                    entry.moved_to(moved).write(&mut self.data, slot)?;
                }
            }
        }

        self.header.free_space_offset = dest as u16;
        self.sync_header()
    }

    /// Check the record area invariants: the free-space offset equals the
    /// lowest record offset, records do not overlap and stay inside the
    /// page, and the record area has no holes.
    pub fn validate(&self) -> Result<()> {
        let fso = self.header.free_space_offset as usize;
        if self.header.directory_end() > fso || fso > PAGE_SIZE {
            return Err(StorageError::corruption(format!(
                "page {}: slot directory ends at {} past free space offset {}",
                self.page,
                self.header.directory_end(),
                fso
            )));
        }

        let mut extents = Vec::new();
        for slot in 0..self.slot_count() {
            if let SlotState::Normal { offset, length } = self.slot_state(slot)? {
                if offset < fso || offset + length > PAGE_SIZE {
                    return Err(StorageError::corruption(format!(
                        "page {}: record {} at {}+{} lies outside the record area",
                        self.page, slot, offset, length
                    )));
                }
                extents.push((offset, length));
            }
        }
        extents.sort_unstable();

        let mut expected = fso;
        for (offset, length) in extents {
            if offset != expected {
                return Err(StorageError::corruption(format!(
                    "page {}: record at {} does not follow the previous record ending at {}",
                    self.page, offset, expected
                )));
            }
            expected = offset + length;
        }
        if expected != PAGE_SIZE {
            return Err(StorageError::corruption(format!(
                "page {}: record area ends at {}",
                self.page, expected
            )));
        }

        Ok(())
    }

    pub fn into_buf(self) -> PageBuf {
        self.data
    }

    /// Sync the header to the raw page data
    fn sync_header(&mut self) -> Result<()> {
        self.header.write(&mut self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn schema() -> Vec<Attribute> {
        vec![Attribute::int("id"), Attribute::varchar("name", 0)]
    }

    fn row(id: i32, name: &str) -> Tuple {
        Tuple::new(vec![Value::Int(id), Value::VarChar(name.to_string())])
    }

    #[test]
    fn test_new_page() {
        let page = RecordPage::new(PageNum::new(3));
        assert_eq!(page.slot_count(), 0);
        assert_eq!(page.free_space(), PAGE_SIZE - SLOT_HEADER_SIZE);
        assert_eq!(page.header().free_space_offset as usize, PAGE_SIZE);
    }

    #[test]
    fn test_insert_and_read() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(1));

        let a = page.insert(&schema, &row(1, "apple"))?;
        let b = page.insert(&schema, &row(2, "banana"))?;
        assert_eq!((a, b), (0, 1));

        assert_eq!(page.read(a, &schema)?, row(1, "apple"));
        assert_eq!(page.read(b, &schema)?, row(2, "banana"));
        assert_eq!(
            page.read_field(b, &schema, "name")?,
            Tuple::new(vec![Value::VarChar("banana".into())])
        );
        page.validate()
    }

    #[test]
    fn test_missing_slots() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(1));
        let slot = page.insert(&schema, &row(1, "a"))?;

        assert!(matches!(page.read(5, &schema), Err(StorageError::SlotDoesNotExist(_))));
        page.delete(slot)?;
        assert!(matches!(
            page.read(slot, &schema),
            Err(StorageError::RecordDoesNotExist(_))
        ));
        assert!(matches!(page.delete(slot), Err(StorageError::RecordDoesNotExist(_))));
        Ok(())
    }

    #[test]
    fn test_insert_delete_inverse() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(1));
        page.insert(&schema, &row(1, "first"))?;
        let before = *page.header();

        let slot = page.insert(&schema, &row(2, "second"))?;
        page.delete(slot)?;

        assert_eq!(page.header().free_space_offset, before.free_space_offset);
        // the emptied slot stays in the directory and is reused
        assert_eq!(page.insert(&schema, &row(3, "third"))?, slot);
        page.validate()
    }

    #[test]
    fn test_delete_compacts() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(1));
        let slots: Vec<u32> = (0..5)
            .map(|i| page.insert(&schema, &row(i, &"x".repeat(i as usize * 10))))
            .collect::<Result<_>>()?;

        page.delete(slots[1])?;
        page.delete(slots[3])?;
        page.validate()?;

        for &i in &[0usize, 2, 4] {
            assert_eq!(page.read(slots[i], &schema)?, row(i as i32, &"x".repeat(i * 10)));
        }
        Ok(())
    }

    #[test]
    fn test_update_same_shrink_grow() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(1));
        let a = page.insert(&schema, &row(1, "aaaa"))?;
        let b = page.insert(&schema, &row(2, "bbbb"))?;
        let c = page.insert(&schema, &row(3, "cccc"))?;

        assert_eq!(page.update(b, &schema, &row(20, "BBBB"))?, UpdateOutcome::Updated);
        page.validate()?;
        assert_eq!(page.update(a, &schema, &row(10, "a"))?, UpdateOutcome::Updated);
        page.validate()?;
        assert_eq!(
            page.update(b, &schema, &row(21, &"b".repeat(300)))?,
            UpdateOutcome::Updated
        );
        page.validate()?;

        assert_eq!(page.read(a, &schema)?, row(10, "a"));
        assert_eq!(page.read(b, &schema)?, row(21, &"b".repeat(300)));
        assert_eq!(page.read(c, &schema)?, row(3, "cccc"));
        Ok(())
    }

    #[test]
    fn test_update_needs_relocation() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(1));
        let big = "z".repeat(1900);
        let a = page.insert(&schema, &row(1, &big))?;
        page.insert(&schema, &row(2, &big))?;

        let huge = row(1, &"y".repeat(2500));
        assert_eq!(page.update(a, &schema, &huge)?, UpdateOutcome::NeedsRelocation);
        // page untouched
        assert_eq!(page.read(a, &schema)?, row(1, &big));
        page.validate()
    }

    #[test]
    fn test_page_full() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(4));
        let mut inserted = 0;
        loop {
            match page.insert(&schema, &row(inserted, "filler-filler-filler")) {
                Ok(_) => inserted += 1,
                Err(e) => {
                    assert!(e.is_capacity());
                    break;
                }
            }
        }
        assert!(inserted > 50);
        assert!(!page.can_fit(4 + 2 + 1 + 4 + 20));
        page.validate()
    }

    #[test]
    fn test_forward_and_write_back() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(1));
        let a = page.insert(&schema, &row(1, "home"))?;
        let b = page.insert(&schema, &row(2, "neighbour"))?;

        page.set_forward(a, Rid::new(9, 4))?;
        assert_eq!(page.live_slot(a)?, SlotState::Forward(Rid::new(9, 4)));
        page.validate()?;
        assert_eq!(page.read(b, &schema)?, row(2, "neighbour"));

        page.write_into_slot(a, &schema, &row(1, "back home"))?;
        assert_eq!(page.read(a, &schema)?, row(1, "back home"));
        page.validate()?;

        assert!(page.set_forward(b, Rid::new(0, 1)).is_err());
        Ok(())
    }

    #[test]
    fn test_raw_record_roundtrip() -> Result<()> {
        let schema = schema();
        let mut home = RecordPage::new(PageNum::new(1));
        let mut away = RecordPage::new(PageNum::new(2));

        let slot = home.insert(&schema, &row(1, "placeholder"))?;
        home.set_forward(slot, Rid::new(2, 0))?;
        let moved = away.insert(&schema, &row(7, "travelling"))?;

        let bytes = away.raw_record(moved)?.to_vec();
        home.insert_raw_into_slot(slot, &bytes)?;
        away.delete(moved)?;

        assert_eq!(home.read(slot, &schema)?, row(7, "travelling"));
        home.validate()?;
        away.validate()
    }

    #[test]
    fn test_from_bytes_roundtrip() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(6));
        page.insert(&schema, &row(42, "persisted"))?;

        let restored = RecordPage::from_bytes(PageNum::new(6), page.as_bytes())?;
        assert_eq!(restored.slot_count(), 1);
        assert_eq!(restored.read(0, &schema)?, row(42, "persisted"));

        assert!(RecordPage::from_bytes(PageNum::new(6), &[0u8; PAGE_SIZE]).is_err());
        Ok(())
    }

    #[test]
    fn test_relocated_mark_survives_compaction() -> Result<()> {
        let schema = schema();
        let mut page = RecordPage::new(PageNum::new(3));
        let before = page.insert(&schema, &row(1, "older"))?;
        let moved = page.insert(&schema, &row(2, "relocated"))?;
        page.mark_relocated(moved)?;
        assert!(page.is_relocated(moved)?);
        assert!(!page.is_relocated(before)?);

        // shrinking and growing shifts the record; deleting a neighbour shifts it again
        page.update(moved, &schema, &row(2, "r"))?;
        page.update(moved, &schema, &row(2, &"r".repeat(100)))?;
        page.delete(before)?;
        assert!(page.is_relocated(moved)?);
        assert_eq!(page.read(moved, &schema)?, row(2, &"r".repeat(100)));
        page.validate()?;

        // a slot reused by a plain insert starts unmarked
        page.delete(moved)?;
        let reused = page.insert(&schema, &row(3, "new"))?;
        assert!(!page.is_relocated(reused)?);
        assert!(page.mark_relocated(7).is_err());
        Ok(())
    }
}
