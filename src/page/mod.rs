//! Page layer: raw page buffers, the slotted record page, and the on-page
//! record codec.
//!
//! Record pages use a slotted format where:
//! - A fixed header holds the free-space offset and slot count
//! - The slot directory grows from the header toward the end
//! - Record bytes grow from the end toward the header
//! - Free space is in the middle

mod header;
pub mod record;
mod slotted;

pub use header::{SlotEntry, SlotHeader, SlotState, SLOT_ENTRY_SIZE, SLOT_HEADER_SIZE};
pub use slotted::{RecordPage, UpdateOutcome, MAX_RECORD_SIZE};

use crate::error::{Result, StorageError};
use crate::types::PAGE_SIZE;
use std::ops::Range;

/// A raw page buffer.
///
/// All multi-byte accessors are big-endian and bound-checked: reaching
/// outside the page is an `OutOfBounds` error rather than a panic.
#[derive(Clone)]
pub struct PageBuf {
    data: [u8; PAGE_SIZE],
}

impl PageBuf {
    /// Create a new zeroed page buffer
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Create a page buffer from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; PAGE_SIZE];
        let len = bytes.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero the whole page
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    fn range(offset: usize, len: usize) -> Result<Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= PAGE_SIZE => Ok(offset..end),
            _ => Err(StorageError::OutOfBounds { offset, len }),
        }
    }

    /// Borrow `len` bytes at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        Ok(&self.data[Self::range(offset, len)?])
    }

    /// Mutably borrow `len` bytes at `offset`
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        Ok(&mut self.data[Self::range(offset, len)?])
    }

    /// Copy `bytes` into the page at `offset`
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.slice_mut(offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Move `len` bytes from `src` to `dest` (ranges may overlap)
    pub fn move_bytes(&mut self, src: usize, dest: usize, len: usize) -> Result<()> {
        let from = Self::range(src, len)?;
        Self::range(dest, len)?;
        self.data.copy_within(from, dest);
        Ok(())
    }

    fn word<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.word::<1>(offset)?[0])
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.write_bytes(offset, &[value])
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        Ok(u16::from_be_bytes(self.word(offset)?))
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.write_bytes(offset, &value.to_be_bytes())
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_be_bytes(self.word(offset)?))
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_bytes(offset, &value.to_be_bytes())
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        Ok(i32::from_be_bytes(self.word(offset)?))
    }

    pub fn write_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        self.write_bytes(offset, &value.to_be_bytes())
    }

    pub fn read_f32(&self, offset: usize) -> Result<f32> {
        Ok(f32::from_be_bytes(self.word(offset)?))
    }

    pub fn write_f32(&mut self, offset: usize, value: f32) -> Result<()> {
        self.write_bytes(offset, &value.to_be_bytes())
    }

    /// Read a u32 length prefix followed by that many bytes
    pub fn read_prefixed(&self, offset: usize) -> Result<&[u8]> {
        let len = self.read_u32(offset)? as usize;
        self.slice(offset + 4, len)
    }

    /// Write a u32 length prefix followed by `bytes`
    pub fn write_prefixed(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.write_u32(offset, bytes.len() as u32)?;
        self.write_bytes(offset + 4, bytes)
    }
}

impl Default for PageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuf").field("len", &PAGE_SIZE).finish()
    }
}

impl std::ops::Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl AsRef<[u8]> for PageBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
