//! Storage layer: the page store that record and index files sit on.
//!
//! This module provides an abstraction for reading, writing and appending
//! fixed-size pages by page number, with a file-backed and an in-memory
//! implementation.

mod memory;
mod paged_file;

pub use memory::MemoryPageStore;
pub use paged_file::{PagedFile, PagedFileManager};

use crate::error::Result;
use crate::page::PageBuf;
use crate::types::PageNum;
use serde::Serialize;

/// Trait for page I/O
///
/// This abstraction allows swapping the storage backend or using an
/// in-memory store for tests.
pub trait PageStore: Send + Sync {
    /// Read a page; pages past the end are `PageOutOfRange`
    fn read_page(&self, page: PageNum) -> Result<PageBuf>;

    /// Overwrite an existing page
    fn write_page(&self, page: PageNum, data: &PageBuf) -> Result<()>;

    /// Add a page at the end of the file and return its number
    fn append_page(&self, data: &PageBuf) -> Result<PageNum>;

    /// Number of pages in the file
    fn page_count(&self) -> u32;

    /// Sync all data to durable storage
    fn sync(&self) -> Result<()>;

    /// I/O performed through this handle so far
    fn counters(&self) -> IoCounters;
}

/// Page I/O counters for one open file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IoCounters {
    pub reads: u64,
    pub writes: u64,
    pub appends: u64,
}
