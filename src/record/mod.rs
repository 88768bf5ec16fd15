//! Record layer: heap files of variable-length records.
//!
//! A record file is a sequence of slotted record pages. Records are placed
//! first-fit, addressed by `Rid`, and relocated behind a forwarding
//! tombstone when an update outgrows their page.

mod file;
mod scan;

pub use file::{CompactionStats, RecordFile};
pub use scan::RecordScan;

use crate::error::Result;
use crate::page::RecordPage;
use crate::storage::{PageStore, PagedFileManager};
use crate::types::PageNum;
use crate::Config;
use std::path::Path;

/// Creates, destroys, opens and closes record files
#[derive(Debug, Clone, Default)]
pub struct RecordFileManager {
    pfm: PagedFileManager,
    config: Config,
}

impl RecordFileManager {
    pub fn new(config: Config) -> Self {
        Self {
            pfm: PagedFileManager::new().with_sync_on_write(config.sync_on_write),
            config,
        }
    }

    /// Create a record file holding one empty record page
    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.pfm.create_file(path)?;

        let file = self.pfm.open_file(path)?;
        file.append_page(RecordPage::new(PageNum::new(0)).buf())?;
        self.pfm.close_file(file)
    }

    pub fn destroy_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.pfm.destroy_file(path)
    }

    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<RecordFile> {
        let file = self.pfm.open_file(path)?;
        RecordFile::new(Box::new(file), self.config.clone())
    }

    pub fn close_file(&self, file: RecordFile) -> Result<()> {
        file.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attribute, Tuple, Value};
    use crate::StorageError;
    use tempfile::tempdir;

    #[test]
    fn test_file_lifecycle() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.tbl");
        let rfm = RecordFileManager::new(Config::default());
        let schema = vec![Attribute::int("id"), Attribute::varchar("name", 20)];
        let tuple = Tuple::new(vec![Value::Int(1), Value::VarChar("ada".into())]);

        rfm.create_file(&path)?;
        assert!(matches!(rfm.create_file(&path), Err(StorageError::FileExists(_))));

        let rid = {
            let mut file = rfm.open_file(&path)?;
            assert_eq!(file.page_count(), 1);
            assert!(matches!(rfm.open_file(&path), Err(StorageError::FileAlreadyOpen(_))));
            assert!(matches!(rfm.destroy_file(&path), Err(StorageError::FileInUse(_))));

            let rid = file.insert_record(&schema, &tuple)?;
            rfm.close_file(file)?;
            rid
        };

        let file = rfm.open_file(&path)?;
        assert_eq!(file.read_record(rid, &schema)?, tuple);
        rfm.close_file(file)?;

        rfm.destroy_file(&path)?;
        assert!(matches!(rfm.open_file(&path), Err(StorageError::FileNotFound(_))));
        Ok(())
    }
}
