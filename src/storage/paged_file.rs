//! File-backed page store.
//!
//! A paged file is a plain sequence of `PAGE_SIZE` blocks with no header of
//! its own; page `n` lives at byte offset `n * PAGE_SIZE`. Whatever sits in
//! page 0 belongs to the layer above (the index meta page, or the first
//! record page).

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::{IoCounters, PageStore};
use crate::types::{PageNum, PAGE_SIZE};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Set of canonical paths currently open through a manager
pub(crate) type OpenFiles = Arc<Mutex<HashSet<PathBuf>>>;

/// An open paged file
pub struct PagedFile {
    /// Canonical path of the file
    path: PathBuf,
    /// The underlying file
    file: RwLock<File>,
    /// Number of pages currently in the file
    page_count: RwLock<u32>,
    counters: Mutex<IoCounters>,
    /// Whether to sync on each write
    sync_on_write: bool,
    /// Registry this handle is recorded in, released on drop
    registry: Option<OpenFiles>,
}

impl PagedFile {
    /// Open an existing paged file without registering it with a manager
    pub fn open(path: &Path, sync_on_write: bool) -> Result<Self> {
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(StorageError::invalid_db(format!(
                "{} is {} bytes, not a whole number of pages",
                path.display(),
                len
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            page_count: RwLock::new((len / PAGE_SIZE as u64) as u32),
            counters: Mutex::new(IoCounters::default()),
            sync_on_write,
            registry: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_range(&self, page: PageNum) -> Result<()> {
        let page_count = *self.page_count.read();
        if page.value() >= page_count {
            return Err(StorageError::PageOutOfRange { page, page_count });
        }
        Ok(())
    }

    fn write_at(&self, page: PageNum, data: &PageBuf) -> Result<()> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page.file_offset(PAGE_SIZE)))?;
        file.write_all(data.as_bytes())?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        Ok(())
    }
}

impl PageStore for PagedFile {
    fn read_page(&self, page: PageNum) -> Result<PageBuf> {
        self.check_range(page)?;

        let mut buf = PageBuf::new();
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(page.file_offset(PAGE_SIZE)))?;
            file.read_exact(buf.as_bytes_mut())?;
        }

        self.counters.lock().reads += 1;
        Ok(buf)
    }

    fn write_page(&self, page: PageNum, data: &PageBuf) -> Result<()> {
        self.check_range(page)?;
        self.write_at(page, data)?;
        self.counters.lock().writes += 1;
        Ok(())
    }

    fn append_page(&self, data: &PageBuf) -> Result<PageNum> {
        let mut page_count = self.page_count.write();
        let page = PageNum::new(*page_count);
        self.write_at(page, data)?;
        *page_count += 1;

        self.counters.lock().appends += 1;
        debug!("appended page {} to {}", page, self.path.display());
        Ok(page)
    }

    fn page_count(&self) -> u32 {
        *self.page_count.read()
    }

    fn sync(&self) -> Result<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn counters(&self) -> IoCounters {
        *self.counters.lock()
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            registry.lock().remove(&self.path);
        }
    }
}

/// Creates, destroys, opens and closes paged files.
///
/// A manager remembers which files it has open and refuses to open the
/// same file twice or destroy a file that is still open. Handles release
/// their entry when dropped.
#[derive(Debug, Clone, Default)]
pub struct PagedFileManager {
    open: OpenFiles,
    sync_on_write: bool,
}

impl PagedFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open files with `sync_on_write` enabled or disabled
    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Create an empty paged file
    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(StorageError::FileExists(path.to_path_buf()));
        }

        OpenOptions::new().write(true).create_new(true).open(path)?;
        debug!("created paged file {}", path.display());
        Ok(())
    }

    /// Remove a paged file that is not open
    pub fn destroy_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }

        let canonical = path.canonicalize()?;
        if self.open.lock().contains(&canonical) {
            return Err(StorageError::FileInUse(path.to_path_buf()));
        }

        std::fs::remove_file(&canonical)?;
        debug!("destroyed paged file {}", path.display());
        Ok(())
    }

    /// Open a paged file; each file can be open through one handle at a time
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<PagedFile> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }

        let canonical = path.canonicalize()?;
        if !self.open.lock().insert(canonical.clone()) {
            return Err(StorageError::FileAlreadyOpen(path.to_path_buf()));
        }

        match PagedFile::open(&canonical, self.sync_on_write) {
            Ok(mut file) => {
                file.registry = Some(Arc::clone(&self.open));
                Ok(file)
            }
            Err(e) => {
                self.open.lock().remove(&canonical);
                Err(e)
            }
        }
    }

    /// Flush and release a handle
    pub fn close_file(&self, file: PagedFile) -> Result<()> {
        file.sync()
    }

    /// Whether `path` is currently open through this manager
    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref()
            .canonicalize()
            .map(|canonical| self.open.lock().contains(&canonical))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_read() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.dat");

        let pfm = PagedFileManager::new();
        pfm.create_file(&path)?;
        let file = pfm.open_file(&path)?;
        assert_eq!(file.page_count(), 0);

        let mut data = PageBuf::new();
        data.write_bytes(0, b"hello")?;
        let page = file.append_page(&data)?;
        assert_eq!(page, PageNum::new(0));
        assert_eq!(file.page_count(), 1);

        let read = file.read_page(page)?;
        assert_eq!(&read[0..5], b"hello");

        data.write_bytes(0, b"world")?;
        file.write_page(page, &data)?;
        assert_eq!(&file.read_page(page)?[0..5], b"world");

        assert_eq!(
            file.counters(),
            IoCounters {
                reads: 2,
                writes: 1,
                appends: 1
            }
        );
        Ok(())
    }

    #[test]
    fn test_out_of_range() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.dat");

        let pfm = PagedFileManager::new();
        pfm.create_file(&path)?;
        let file = pfm.open_file(&path)?;

        assert!(matches!(
            file.read_page(PageNum::new(0)),
            Err(StorageError::PageOutOfRange { page_count: 0, .. })
        ));
        assert!(file.write_page(PageNum::new(3), &PageBuf::new()).is_err());
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_pages() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.dat");
        let pfm = PagedFileManager::new().with_sync_on_write(true);
        pfm.create_file(&path)?;

        {
            let file = pfm.open_file(&path)?;
            let mut data = PageBuf::new();
            for i in 0..3u32 {
                data.write_u32(0, i)?;
                file.append_page(&data)?;
            }
            pfm.close_file(file)?;
        }

        let file = pfm.open_file(&path)?;
        assert_eq!(file.page_count(), 3);
        assert_eq!(file.read_page(PageNum::new(2))?.read_u32(0)?, 2);
        Ok(())
    }

    #[test]
    fn test_manager_state_errors() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.dat");
        let pfm = PagedFileManager::new();

        assert!(matches!(pfm.open_file(&path), Err(StorageError::FileNotFound(_))));
        assert!(matches!(pfm.destroy_file(&path), Err(StorageError::FileNotFound(_))));

        pfm.create_file(&path)?;
        assert!(matches!(pfm.create_file(&path), Err(StorageError::FileExists(_))));

        let file = pfm.open_file(&path)?;
        assert!(pfm.is_open(&path));
        assert!(matches!(pfm.open_file(&path), Err(StorageError::FileAlreadyOpen(_))));
        assert!(matches!(pfm.destroy_file(&path), Err(StorageError::FileInUse(_))));

        drop(file);
        assert!(!pfm.is_open(&path));
        pfm.destroy_file(&path)?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_partial_page_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.dat");
        std::fs::write(&path, [0u8; 100])?;

        let pfm = PagedFileManager::new();
        assert!(matches!(
            pfm.open_file(&path),
            Err(StorageError::InvalidDatabaseFile(_))
        ));
        // failed open does not leave the file registered
        assert!(!pfm.is_open(&path));
        Ok(())
    }
}
