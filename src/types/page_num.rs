//! Page number type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-based page number within a paged file.
///
/// In index files page 0 holds the meta page, so `0` doubles as the
/// "no page" sentinel for leaf sibling links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageNum(pub u32);

impl PageNum {
    /// Sentinel used for absent sibling pointers in the leaf chain
    pub const NONE: PageNum = PageNum(0);

    /// Create a new page number
    pub const fn new(num: u32) -> Self {
        Self(num)
    }

    /// Get the raw page number
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Check whether this is the "no page" sentinel
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Calculate the byte offset of this page in the file
    pub const fn file_offset(self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl fmt::Display for PageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageNum {
    fn from(num: u32) -> Self {
        Self(num)
    }
}

impl From<PageNum> for u32 {
    fn from(num: PageNum) -> Self {
        num.0
    }
}
