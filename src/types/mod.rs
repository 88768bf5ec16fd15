//! Common types used throughout the storage engine.

mod page_num;
mod rid;
mod value;

pub use page_num::PageNum;
pub use rid::Rid;
pub use value::{Tuple, Value};

pub(crate) use value::{null_bit, null_bitmap_size, set_null_bit, utf8};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Size of Int and Real fields, and of the VarChar length prefix
pub const FIELD_WIDTH: usize = 4;

/// Column type
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrType {
    /// 32-bit signed integer
    Int = 0,
    /// 32-bit float
    Real = 1,
    /// Variable-length character data
    VarChar = 2,
}

impl AttrType {
    /// Convert from byte value
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Int),
            1 => Some(Self::Real),
            2 => Some(Self::VarChar),
            _ => None,
        }
    }
}

/// One column of a record schema: name, type, declared length.
///
/// For VarChar the declared length is the maximum number of bytes; a
/// length of 0 leaves the column unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttrType,
    pub length: u32,
}

impl Attribute {
    /// Create a new attribute
    pub fn new(name: impl Into<String>, attr_type: AttrType, length: u32) -> Self {
        Self {
            name: name.into(),
            attr_type,
            length,
        }
    }

    /// Shorthand for an Int column
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, AttrType::Int, FIELD_WIDTH as u32)
    }

    /// Shorthand for a Real column
    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, AttrType::Real, FIELD_WIDTH as u32)
    }

    /// Shorthand for a VarChar column with a maximum length
    pub fn varchar(name: impl Into<String>, length: u32) -> Self {
        Self::new(name, AttrType::VarChar, length)
    }
}

/// Find the position of a named attribute in a schema
pub fn attribute_index(schema: &[Attribute], name: &str) -> Option<usize> {
    schema.iter().position(|attr| attr.name == name)
}

/// Comparison operator used by record scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    /// No condition: every record qualifies
    NoOp,
}

impl CompOp {
    /// Whether `field <op> literal` holds, given `field.cmp(literal)`
    pub fn matches(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Ne => ordering != Ordering::Equal,
            Self::NoOp => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_type_conversions() {
        assert_eq!(AttrType::from_byte(0), Some(AttrType::Int));
        assert_eq!(AttrType::from_byte(2), Some(AttrType::VarChar));
        assert_eq!(AttrType::from_byte(0xFF), None);
        assert_eq!(AttrType::from_byte(AttrType::Real as u8), Some(AttrType::Real));
    }

    #[test]
    fn test_comp_op() {
        assert!(CompOp::Le.matches(Ordering::Equal));
        assert!(CompOp::Le.matches(Ordering::Less));
        assert!(!CompOp::Lt.matches(Ordering::Equal));
        assert!(CompOp::Ne.matches(Ordering::Greater));
        assert!(CompOp::NoOp.matches(Ordering::Greater));
    }

    #[test]
    fn test_attribute_index() {
        let schema = vec![Attribute::int("id"), Attribute::varchar("name", 20)];
        assert_eq!(attribute_index(&schema, "name"), Some(1));
        assert_eq!(attribute_index(&schema, "age"), None);
    }
}
