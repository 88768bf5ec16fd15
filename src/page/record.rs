//! On-page record encoding and decoding.
//!
//! Record layout:
//! ```text
//! [field count: u16]
//! [null bitmap: ceil(field count / 8) bytes]
//! [end offset: u16] * field count     (relative to record start)
//! [field data]
//! ```
//!
//! Each end offset points just past its field's bytes, so a field's length
//! is the distance from the previous end offset (or from the start of the
//! data area for field 0). Null fields take no data bytes but keep their
//! bitmap bit and end offset. VarChar data is stored without a length
//! prefix.
//!
//! The field count is stored per record so that records written before a
//! schema grew still decode: fields past the stored count read as null.

use crate::error::{Result, StorageError};
use crate::page::MAX_RECORD_SIZE;
use crate::types::{
    attribute_index, null_bit, null_bitmap_size, set_null_bit, utf8, AttrType, Attribute, Tuple,
    Value, FIELD_WIDTH,
};
use std::ops::Range;

/// Size of the field count prefix
const FIELD_COUNT_SIZE: usize = 2;

/// Size of one end-offset entry
const END_OFFSET_SIZE: usize = 2;

fn header_size(field_count: usize) -> usize {
    FIELD_COUNT_SIZE + null_bitmap_size(field_count) + field_count * END_OFFSET_SIZE
}

/// Encoded size of `tuple` under `schema`.
///
/// Records larger than a page can hold are rejected with `RecordTooLarge`;
/// this also keeps every end offset within a u16.
pub fn record_size(schema: &[Attribute], tuple: &Tuple) -> Result<usize> {
    tuple.check_schema(schema)?;
    let data: usize = tuple.values().iter().map(Value::data_len).sum();
    let size = header_size(schema.len()) + data;
    if size > MAX_RECORD_SIZE {
        return Err(StorageError::RecordTooLarge {
            size,
            max: MAX_RECORD_SIZE,
        });
    }
    Ok(size)
}

/// Encode `tuple` into `dst`, which must be exactly `record_size` bytes
pub fn encode(schema: &[Attribute], tuple: &Tuple, dst: &mut [u8]) -> Result<()> {
    let size = record_size(schema, tuple)?;
    if dst.len() != size {
        return Err(StorageError::invalid_operation(format!(
            "record buffer is {} bytes, record needs {}",
            dst.len(),
            size
        )));
    }

    let field_count = schema.len();
    let bitmap_size = null_bitmap_size(field_count);
    let offsets_at = FIELD_COUNT_SIZE + bitmap_size;

    dst[..FIELD_COUNT_SIZE].copy_from_slice(&(field_count as u16).to_be_bytes());
    dst[FIELD_COUNT_SIZE..offsets_at].fill(0);

    let mut end = header_size(field_count);
    for (i, value) in tuple.values().iter().enumerate() {
        match value {
            Value::Null => set_null_bit(&mut dst[FIELD_COUNT_SIZE..offsets_at], i),
            Value::Int(v) => dst[end..end + FIELD_WIDTH].copy_from_slice(&v.to_be_bytes()),
            Value::Real(v) => dst[end..end + FIELD_WIDTH].copy_from_slice(&v.to_be_bytes()),
            Value::VarChar(s) => dst[end..end + s.len()].copy_from_slice(s.as_bytes()),
        }
        end += value.data_len();

        let at = offsets_at + i * END_OFFSET_SIZE;
        dst[at..at + END_OFFSET_SIZE].copy_from_slice(&(end as u16).to_be_bytes());
    }

    Ok(())
}

/// Decode the full record at `offset`
pub fn decode(page: &[u8], offset: usize, schema: &[Attribute]) -> Result<Tuple> {
    let view = RecordView::parse(page, offset)?;
    (0..schema.len())
        .map(|i| view.value(i, &schema[i]))
        .collect::<Result<Vec<_>>>()
        .map(Tuple::new)
}

/// Decode a single named field of the record at `offset`
pub fn decode_field(page: &[u8], offset: usize, schema: &[Attribute], name: &str) -> Result<Tuple> {
    let index =
        attribute_index(schema, name).ok_or_else(|| StorageError::AttributeNotFound(name.to_string()))?;
    decode_projection(page, offset, schema, &[index])
}

/// Decode the fields at `indices`, in that order
pub(crate) fn decode_projection(
    page: &[u8],
    offset: usize,
    schema: &[Attribute],
    indices: &[usize],
) -> Result<Tuple> {
    let view = RecordView::parse(page, offset)?;
    indices
        .iter()
        .map(|&i| view.value(i, &schema[i]))
        .collect::<Result<Vec<_>>>()
        .map(Tuple::new)
}

/// Decode one field by position
pub(crate) fn decode_value(page: &[u8], offset: usize, attr: &Attribute, index: usize) -> Result<Value> {
    RecordView::parse(page, offset)?.value(index, attr)
}

/// Parsed header of a record sitting in a page
struct RecordView<'a> {
    page: &'a [u8],
    start: usize,
    field_count: usize,
    bitmap: &'a [u8],
}

impl<'a> RecordView<'a> {
    fn parse(page: &'a [u8], start: usize) -> Result<Self> {
        let count = bytes(page, start, FIELD_COUNT_SIZE)?;
        let field_count = u16::from_be_bytes([count[0], count[1]]) as usize;
        let bitmap = bytes(page, start + FIELD_COUNT_SIZE, null_bitmap_size(field_count))?;
        Ok(Self {
            page,
            start,
            field_count,
            bitmap,
        })
    }

    fn end_offset(&self, i: usize) -> Result<usize> {
        let at = self.start + FIELD_COUNT_SIZE + self.bitmap.len() + i * END_OFFSET_SIZE;
        let raw = bytes(self.page, at, END_OFFSET_SIZE)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]) as usize)
    }

    /// Byte range of field `i` within the page, `None` if it is null
    fn field_range(&self, i: usize) -> Result<Option<Range<usize>>> {
        if i >= self.field_count || null_bit(self.bitmap, i) {
            return Ok(None);
        }

        let left = if i == 0 {
            header_size(self.field_count)
        } else {
            self.end_offset(i - 1)?
        };
        let right = self.end_offset(i)?;
        if right < left {
            return Err(StorageError::corruption(format!(
                "end offsets decrease at field {}",
                i
            )));
        }

        Ok(Some(self.start + left..self.start + right))
    }

    fn value(&self, i: usize, attr: &Attribute) -> Result<Value> {
        let Some(range) = self.field_range(i)? else {
            return Ok(Value::Null);
        };
        let data = bytes(self.page, range.start, range.len())?;

        let fixed = || -> Result<[u8; FIELD_WIDTH]> {
            data.try_into()
                .map_err(|_| StorageError::corruption(format!("field {} has length {}", i, data.len())))
        };

        Ok(match attr.attr_type {
            AttrType::Int => Value::Int(i32::from_be_bytes(fixed()?)),
            AttrType::Real => Value::Real(f32::from_be_bytes(fixed()?)),
            AttrType::VarChar => Value::VarChar(utf8(data)?),
        })
    }
}

fn bytes(page: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    page.get(offset..offset + len)
        .ok_or(StorageError::OutOfBounds { offset, len })
}
