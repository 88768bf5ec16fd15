//! Field values, tuples, and the tuple wire format.
//!
//! The wire format is what callers (catalog, query operators) exchange with
//! the record store:
//!
//! ```text
//! [null bitmap: ceil(n/8) bytes, MSB first, 1 = null]
//! [present fields in schema order]
//!     Int     -> 4 bytes
//!     Real    -> 4 bytes
//!     VarChar -> 4-byte length + bytes
//! ```
//!
//! It never appears inside a page; see `page::record` for the on-page form.

use crate::error::{Result, StorageError};
use crate::types::{AttrType, Attribute, FIELD_WIDTH};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Bytes needed for a null bitmap covering `field_count` fields
pub(crate) fn null_bitmap_size(field_count: usize) -> usize {
    field_count.div_ceil(8)
}

/// Read bit `i` of a null bitmap
pub(crate) fn null_bit(bitmap: &[u8], i: usize) -> bool {
    bitmap
        .get(i / 8)
        .map(|byte| byte & (0x80 >> (i % 8)) != 0)
        .unwrap_or(true)
}

/// Set bit `i` of a null bitmap
pub(crate) fn set_null_bit(bitmap: &mut [u8], i: usize) {
    bitmap[i / 8] |= 0x80 >> (i % 8);
}

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i32),
    Real(f32),
    VarChar(String),
}

impl Value {
    /// The column type this value belongs to, `None` for null
    pub fn attr_type(&self) -> Option<AttrType> {
        match self {
            Self::Null => None,
            Self::Int(_) => Some(AttrType::Int),
            Self::Real(_) => Some(AttrType::Real),
            Self::VarChar(_) => Some(AttrType::VarChar),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Compare two values of the same type.
    ///
    /// Integers and reals compare numerically, strings by byte content.
    /// Returns `None` if either side is null or the types differ.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Real(a), Self::Real(b)) => a.partial_cmp(b),
            (Self::VarChar(a), Self::VarChar(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            _ => None,
        }
    }

    /// Number of data bytes this value occupies inside an on-page record
    pub(crate) fn data_len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Int(_) | Self::Real(_) => FIELD_WIDTH,
            Self::VarChar(s) => s.len(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::VarChar(s) => write!(f, "{}", s),
        }
    }
}

/// An ordered list of field values matching some schema
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check that this tuple can be stored under `schema`
    pub fn check_schema(&self, schema: &[Attribute]) -> Result<()> {
        if self.values.len() != schema.len() {
            return Err(StorageError::schema_mismatch(format!(
                "tuple has {} fields, schema has {}",
                self.values.len(),
                schema.len()
            )));
        }

        for (value, attr) in self.values.iter().zip(schema) {
            let Some(found) = value.attr_type() else {
                continue;
            };
            if found != attr.attr_type {
                return Err(StorageError::TypeMismatch {
                    expected: attr.attr_type,
                    found,
                });
            }
            if let Value::VarChar(s) = value {
                if attr.length > 0 && s.len() > attr.length as usize {
                    return Err(StorageError::ValueTooLarge {
                        size: s.len(),
                        max: attr.length as usize,
                    });
                }
            }
        }

        Ok(())
    }

    /// Serialize into the tuple wire format
    pub fn to_wire(&self, schema: &[Attribute]) -> Result<Vec<u8>> {
        self.check_schema(schema)?;

        let bitmap_size = null_bitmap_size(schema.len());
        let mut buf = vec![0u8; bitmap_size];

        for (i, value) in self.values.iter().enumerate() {
            match value {
                Value::Null => set_null_bit(&mut buf[..bitmap_size], i),
                Value::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
                Value::Real(v) => buf.extend_from_slice(&v.to_be_bytes()),
                Value::VarChar(s) => {
                    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
                    buf.extend_from_slice(s.as_bytes());
                }
            }
        }

        Ok(buf)
    }

    /// Parse the tuple wire format
    pub fn from_wire(schema: &[Attribute], bytes: &[u8]) -> Result<Self> {
        let bitmap_size = null_bitmap_size(schema.len());
        let bitmap = bytes
            .get(..bitmap_size)
            .ok_or_else(|| StorageError::schema_mismatch("wire tuple shorter than its null bitmap"))?;

        let mut offset = bitmap_size;
        let mut values = Vec::with_capacity(schema.len());

        for (i, attr) in schema.iter().enumerate() {
            if null_bit(bitmap, i) {
                values.push(Value::Null);
                continue;
            }

            let fixed = take(bytes, &mut offset, FIELD_WIDTH)?;
            let word = [fixed[0], fixed[1], fixed[2], fixed[3]];
            let value = match attr.attr_type {
                AttrType::Int => Value::Int(i32::from_be_bytes(word)),
                AttrType::Real => Value::Real(f32::from_be_bytes(word)),
                AttrType::VarChar => {
                    let len = u32::from_be_bytes(word) as usize;
                    let chars = take(bytes, &mut offset, len)?;
                    Value::VarChar(utf8(chars)?)
                }
            };
            values.push(value);
        }

        Ok(Self { values })
    }
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let slice = bytes
        .get(*offset..*offset + len)
        .ok_or_else(|| StorageError::schema_mismatch("wire tuple truncated"))?;
    *offset += len;
    Ok(slice)
}

/// Decode VarChar bytes
pub(crate) fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| StorageError::corruption("varchar field is not valid UTF-8"))
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Value> for Tuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}
