//! Index keys.

use crate::error::{Result, StorageError};
use crate::types::{AttrType, Value, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Maximum encoded size of a key (inline part plus variable area bytes)
pub const MAX_KEY_SIZE: usize = PAGE_SIZE / 8;

/// Bytes a key occupies in a node slot
pub(crate) const KEY_SLOT_SIZE: usize = 4;

/// A B+Tree key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Key {
    Int(i32),
    Real(f32),
    VarChar(String),
}

impl Key {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Self::Int(_) => AttrType::Int,
            Self::Real(_) => AttrType::Real,
            Self::VarChar(_) => AttrType::VarChar,
        }
    }

    /// Convert a non-null field value into a key
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Int(v) => Some(Self::Int(*v)),
            Value::Real(v) => Some(Self::Real(*v)),
            Value::VarChar(s) => Some(Self::VarChar(s.clone())),
        }
    }

    /// Total order over keys.
    ///
    /// Numbers compare numerically, strings by byte content. Keys of
    /// different types never share a tree; they order by type tag.
    pub fn compare(&self, other: &Key) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Real(a), Self::Real(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Self::VarChar(a), Self::VarChar(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => (self.attr_type() as u8).cmp(&(other.attr_type() as u8)),
        }
    }

    /// Bytes this key needs in a node's variable-length area
    pub(crate) fn var_len(&self) -> usize {
        match self {
            Self::VarChar(s) => 4 + s.len(),
            _ => 0,
        }
    }

    /// Check that the key belongs to an index over `key_type` and fits a node
    pub(crate) fn check(&self, key_type: AttrType) -> Result<()> {
        if self.attr_type() != key_type {
            return Err(StorageError::TypeMismatch {
                expected: key_type,
                found: self.attr_type(),
            });
        }
        let size = KEY_SLOT_SIZE + self.var_len();
        if size > MAX_KEY_SIZE {
            return Err(StorageError::KeyTooLarge {
                size,
                max: MAX_KEY_SIZE,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::VarChar(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for Key {
    fn from(v: f32) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::VarChar(s.to_string())
    }
}
