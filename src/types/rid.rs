//! Record identifiers.

use crate::types::PageNum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record identifier: the page and slot of a record's directory entry.
///
/// A RID stays valid across in-page compaction and in-place updates. When a
/// record outgrows its page the slot becomes a forwarding tombstone, and the
/// RID keeps resolving through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Rid {
    /// Page holding the slot directory entry
    pub page: PageNum,
    /// Slot index within that page
    pub slot: u32,
}

impl Rid {
    /// Create a new record identifier
    pub const fn new(page: u32, slot: u32) -> Self {
        Self {
            page: PageNum::new(page),
            slot,
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.page, self.slot)
    }
}
