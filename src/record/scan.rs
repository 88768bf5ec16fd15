//! Sequential record scan.
//!
//! The scan walks pages in page-number order and slots in slot order,
//! holding a copy of the current page. Tombstones and empty slots are
//! skipped, so a forwarded record is reported once, under the RID of the
//! slot that actually holds its bytes.

use crate::error::{Result, StorageError};
use crate::page::record::{decode_projection, decode_value};
use crate::page::{RecordPage, SlotState};
use crate::record::RecordFile;
use crate::types::{attribute_index, Attribute, CompOp, PageNum, Rid, Tuple, Value};

/// Resolved scan predicate
struct Condition {
    index: usize,
    op: CompOp,
    literal: Value,
}

/// Iterator over `(Rid, projected tuple)` for the records matching a scan.
///
/// A relocated record is reported under the RID of the slot holding its
/// bytes, not the RID `insert_record` returned. Update and delete through
/// the inserted RID. Deleting through the reported one leaves the home
/// tombstone dangling: later reads of the home RID fail with
/// `RecordDoesNotExist`, and deleting it clears the tombstone.
pub struct RecordScan<'a> {
    file: &'a RecordFile,
    schema: Vec<Attribute>,
    condition: Option<Condition>,
    projection: Vec<usize>,
    /// Current page, `None` between pages
    page: Option<RecordPage>,
    next_page: u32,
    next_slot: u32,
    done: bool,
}

impl<'a> RecordScan<'a> {
    pub(crate) fn new(
        file: &'a RecordFile,
        schema: &[Attribute],
        condition: Option<(&str, CompOp, &Value)>,
        projection: &[&str],
    ) -> Result<Self> {
        let condition = match condition {
            Some((_, CompOp::NoOp, _)) | None => None,
            Some((name, op, literal)) => {
                let index = attribute_index(schema, name)
                    .ok_or_else(|| StorageError::AttributeNotFound(name.to_string()))?;
                if let Some(found) = literal.attr_type() {
                    if found != schema[index].attr_type {
                        return Err(StorageError::TypeMismatch {
                            expected: schema[index].attr_type,
                            found,
                        });
                    }
                }
                Some(Condition {
                    index,
                    op,
                    literal: literal.clone(),
                })
            }
        };

        let projection = projection
            .iter()
            .map(|name| {
                attribute_index(schema, name)
                    .ok_or_else(|| StorageError::AttributeNotFound(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            file,
            schema: schema.to_vec(),
            condition,
            projection,
            page: None,
            next_page: 0,
            next_slot: 0,
            done: false,
        })
    }

    /// Release the scan's page buffer
    pub fn close(self) {}

    fn matches(&self, page: &RecordPage, offset: usize) -> Result<bool> {
        let Some(cond) = &self.condition else {
            return Ok(true);
        };
        let value = decode_value(page.as_bytes(), offset, &self.schema[cond.index], cond.index)?;
        Ok(value
            .compare(&cond.literal)
            .is_some_and(|ordering| cond.op.matches(ordering)))
    }

    fn advance(&mut self) -> Result<Option<(Rid, Tuple)>> {
        loop {
            let page = match self.page.take() {
                Some(page) => page,
                None => {
                    if self.next_page >= self.file.page_count() {
                        return Ok(None);
                    }
                    let page = self.file.read_page(PageNum::new(self.next_page))?;
                    self.next_page += 1;
                    self.next_slot = 0;
                    page
                }
            };

            if self.next_slot >= page.slot_count() {
                continue;
            }

            let slot = self.next_slot;
            self.next_slot += 1;

            let hit = match page.slot_state(slot)? {
                SlotState::Normal { offset, .. } if self.matches(&page, offset)? => {
                    let tuple =
                        decode_projection(page.as_bytes(), offset, &self.schema, &self.projection)?;
                    Some((
                        Rid {
                            page: page.page_num(),
                            slot,
                        },
                        tuple,
                    ))
                }
                _ => None,
            };

            self.page = Some(page);
            if hit.is_some() {
                return Ok(hit);
            }
        }
    }
}

impl Iterator for RecordScan<'_> {
    type Item = Result<(Rid, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                self.page = None;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
