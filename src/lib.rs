//! # Slotted Storage Engine
//!
//! A single-file paged record store with a B+Tree secondary index, meant to
//! sit underneath a catalog and a query layer.
//!
//! ## Architecture
//!
//! The storage engine is composed of small layers:
//!
//! - **Page Layer** (`page`): bound-checked page buffers, the slotted record
//!   page and the on-page record codec
//! - **Storage Layer** (`storage`): the page store (read/write/append pages
//!   by number) over a file or memory
//! - **Record Layer** (`record`): first-fit record placement, forwarding,
//!   predicate scans
//! - **Index Layer** (`index`): B+Tree from keys to record ids with chained
//!   leaves for range scans
//!
//! ## Usage
//!
//! ```rust,ignore
//! use slotted_storage::{Attribute, Config, RecordFileManager, Tuple, Value};
//!
//! let rfm = RecordFileManager::new(Config::default());
//! rfm.create_file("people.tbl")?;
//! let mut file = rfm.open_file("people.tbl")?;
//!
//! let schema = vec![Attribute::int("id"), Attribute::varchar("name", 50)];
//! let rid = file.insert_record(&schema, &Tuple::new(vec![Value::Int(1), Value::VarChar("ada".into())]))?;
//! let tuple = file.read_record(rid, &schema)?;
//!
//! rfm.close_file(file)?;
//! ```

pub mod error;
pub mod index;
pub mod page;
pub mod record;
pub mod storage;
pub mod types;

pub use error::{Result, StorageError};
pub use index::{IndexFile, IndexManager, IndexScan, Key, TreeNode};
pub use record::{CompactionStats, RecordFile, RecordFileManager, RecordScan};
pub use storage::{IoCounters, MemoryPageStore, PageStore, PagedFile, PagedFileManager};
pub use types::{AttrType, Attribute, CompOp, PageNum, Rid, Tuple, Value, PAGE_SIZE};

use serde::{Deserialize, Serialize};

/// Engine configuration shared by record and index files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Whether to sync writes immediately (default: false for performance)
    pub sync_on_write: bool,
    /// Deepest B+Tree descent accepted before the tree is reported corrupt
    pub max_tree_depth: usize,
    /// Longest forwarding chain followed before giving up
    pub max_forward_hops: usize,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Enable sync on write for durability
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    /// Set the B+Tree depth limit
    pub fn max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth;
        self
    }

    /// Set the forwarding chain limit
    pub fn max_forward_hops(mut self, hops: usize) -> Self {
        self.max_forward_hops = hops;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_on_write: false,
            max_tree_depth: 32,
            max_forward_hops: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_records_span_pages() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.tbl");
        let rfm = RecordFileManager::new(Config::default());
        rfm.create_file(&path)?;
        let mut file = rfm.open_file(&path)?;

        let schema = vec![Attribute::int("id"), Attribute::varchar("name", 200)];
        let mut inserted = Vec::new();
        for i in 0..200 {
            let tuple = Tuple::new(vec![Value::Int(i), Value::VarChar("n".repeat(i as usize))]);
            let rid = file.insert_record(&schema, &tuple)?;
            inserted.push((rid, tuple));
        }
        assert!(file.page_count() > 1);

        for (rid, tuple) in &inserted {
            assert_eq!(file.read_record(*rid, &schema)?, *tuple);
        }

        // a scan reports every record once, in page then slot order
        let scanned: Vec<(Rid, Tuple)> = file.scan(&schema, None, &["id", "name"])?.collect::<Result<_>>()?;
        inserted.sort_by_key(|(rid, _)| *rid);
        assert_eq!(scanned, inserted);

        rfm.close_file(file)?;
        Ok(())
    }

    #[test]
    fn test_index_range_scan() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("id.idx");
        let im = IndexManager::new(Config::default());
        im.create_file(&path, AttrType::Int)?;
        let mut index = im.open_file(&path)?;

        for i in 1..=1000 {
            index.insert_entry(&Key::Int(i), Rid::new(1, i as u32))?;
        }

        let entries: Vec<(Rid, Key)> = index
            .scan(Some(&Key::Int(250)), Some(&Key::Int(750)), true, false)?
            .collect::<Result<_>>()?;
        assert_eq!(entries.len(), 500);
        for (offset, (rid, key)) in entries.iter().enumerate() {
            let expected = 250 + offset as i32;
            assert_eq!(*key, Key::Int(expected));
            assert_eq!(*rid, Rid::new(1, expected as u32));
        }

        im.close_file(index)?;
        Ok(())
    }

    #[test]
    fn test_record_and_index_together() -> Result<()> {
        let schema = vec![Attribute::int("id"), Attribute::real("price")];
        let mut file = RecordFile::in_memory(Config::default())?;
        let mut index = IndexFile::in_memory(AttrType::Real, Config::default())?;

        for i in 0..500 {
            let tuple = Tuple::new(vec![Value::Int(i), Value::Real((i % 50) as f32)]);
            let rid = file.insert_record(&schema, &tuple)?;
            if let Some(key) = Key::from_value(&tuple.values()[1]) {
                index.insert_entry(&key, rid)?;
            }
        }

        let cheap = Key::Real(2.0);
        for item in index.scan(None, Some(&cheap), true, false)? {
            let (rid, _) = item?;
            let tuple = file.read_attribute(rid, &schema, "price")?;
            assert!(matches!(tuple.values()[0], Value::Real(p) if p < 2.0));
        }
        assert_eq!(index.scan(None, Some(&cheap), true, false)?.count(), 20);
        Ok(())
    }

    #[test]
    fn test_config_from_json() -> Result<()> {
        let config = Config::from_json(r#"{"syncOnWrite": true, "maxTreeDepth": 8}"#)?;
        assert!(config.sync_on_write);
        assert_eq!(config.max_tree_depth, 8);
        assert_eq!(config.max_forward_hops, Config::default().max_forward_hops);

        assert_eq!(Config::new().max_forward_hops(4).max_forward_hops, 4);
        assert!(matches!(Config::from_json("{"), Err(StorageError::Config(_))));
        Ok(())
    }
}
