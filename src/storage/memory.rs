//! In-memory page store.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::{IoCounters, PageStore};
use crate::types::PageNum;
use parking_lot::{Mutex, RwLock};

/// A page store kept entirely in memory, for tests and scratch files
#[derive(Default)]
pub struct MemoryPageStore {
    pages: RwLock<Vec<PageBuf>>,
    counters: Mutex<IoCounters>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryPageStore {
    fn read_page(&self, page: PageNum) -> Result<PageBuf> {
        let pages = self.pages.read();
        let buf = pages
            .get(page.value() as usize)
            .cloned()
            .ok_or(StorageError::PageOutOfRange {
                page,
                page_count: pages.len() as u32,
            })?;
        self.counters.lock().reads += 1;
        Ok(buf)
    }

    fn write_page(&self, page: PageNum, data: &PageBuf) -> Result<()> {
        let mut pages = self.pages.write();
        let page_count = pages.len() as u32;
        let slot = pages
            .get_mut(page.value() as usize)
            .ok_or(StorageError::PageOutOfRange { page, page_count })?;
        *slot = data.clone();
        self.counters.lock().writes += 1;
        Ok(())
    }

    fn append_page(&self, data: &PageBuf) -> Result<PageNum> {
        let mut pages = self.pages.write();
        pages.push(data.clone());
        self.counters.lock().appends += 1;
        Ok(PageNum::new(pages.len() as u32 - 1))
    }

    fn page_count(&self) -> u32 {
        self.pages.read().len() as u32
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn counters(&self) -> IoCounters {
        *self.counters.lock()
    }
}
