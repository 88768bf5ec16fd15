//! Error types for the storage engine.

use crate::types::{AttrType, PageNum, Rid};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A file with this name already exists
    #[error("file {0} already exists")]
    FileExists(PathBuf),

    /// The named file does not exist
    #[error("file {0} not found")]
    FileNotFound(PathBuf),

    /// The file is already open through another handle
    #[error("file {0} is already open")]
    FileAlreadyOpen(PathBuf),

    /// The file cannot be destroyed while a handle is open
    #[error("file {0} is in use")]
    FileInUse(PathBuf),

    /// Requested page is past the end of the file
    #[error("page {page} out of range (page count: {page_count})")]
    PageOutOfRange { page: PageNum, page_count: u32 },

    /// Page does not have enough space for the operation
    #[error("page {page} is full, need {needed} bytes but only {available} available")]
    PageFull {
        page: PageNum,
        needed: usize,
        available: usize,
    },

    /// A typed page accessor was asked to touch bytes outside the page
    #[error("access of {len} bytes at offset {offset} is outside the page")]
    OutOfBounds { offset: usize, len: usize },

    /// Slot number is past the page's slot directory
    #[error("slot {0} does not exist")]
    SlotDoesNotExist(Rid),

    /// Slot exists but holds no record
    #[error("record {0} does not exist")]
    RecordDoesNotExist(Rid),

    /// Attribute name is not part of the schema
    #[error("attribute {0:?} not found")]
    AttributeNotFound(String),

    /// No index entry matched the (key, rid) pair
    #[error("index entry not found")]
    EntryNotFound,

    /// A forwarding chain revisits a record or exceeds the hop limit
    #[error("forwarding chain starting at {0} does not terminate")]
    ForwardingCycle(Rid),

    /// Tuple shape does not match the schema
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Value or key has the wrong type
    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: AttrType, found: AttrType },

    /// Encoded record can never fit in a single page
    #[error("record too large: {size} bytes (max: {max})")]
    RecordTooLarge { size: usize, max: usize },

    /// Key exceeds maximum allowed size
    #[error("key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// VarChar value longer than its declared length
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Invalid page format or type
    #[error("invalid page: {0}")]
    InvalidPage(String),

    /// Invalid operation for the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// File is corrupted or has an invalid format
    #[error("invalid database file: {0}")]
    InvalidDatabaseFile(String),
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid page error
    pub fn invalid_page(msg: impl Into<String>) -> Self {
        Self::InvalidPage(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid database file error
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    /// True for the capacity conditions that callers recover from by
    /// splitting or relocating.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::PageFull { .. })
    }
}
