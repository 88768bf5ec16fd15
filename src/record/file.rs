//! Record file: placement, lookup, update and delete of records.

use crate::error::{Result, StorageError};
use crate::page::record::record_size;
use crate::page::{RecordPage, SlotState, UpdateOutcome};
use crate::record::RecordScan;
use crate::storage::{IoCounters, MemoryPageStore, PageStore};
use crate::types::{Attribute, CompOp, PageNum, Rid, Tuple, Value};
use crate::Config;
use log::{debug, trace};
use serde::Serialize;
use std::collections::HashSet;

/// Outcome of a forward compaction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    /// Forwarded records copied back into their home slot
    pub moved_home: usize,
    /// Multi-hop chains shortened to a single hop
    pub collapsed: usize,
}

/// An open record file
pub struct RecordFile {
    store: Box<dyn PageStore>,
    config: Config,
}

impl RecordFile {
    /// Wrap a page store; an empty store gets its first record page
    pub fn new(store: Box<dyn PageStore>, config: Config) -> Result<Self> {
        let file = Self { store, config };
        if file.store.page_count() == 0 {
            file.append_page()?;
        }
        Ok(file)
    }

    /// A record file that lives only in memory
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::new(Box::new(MemoryPageStore::new()), config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn page_count(&self) -> u32 {
        self.store.page_count()
    }

    pub fn counters(&self) -> IoCounters {
        self.store.counters()
    }

    /// Flush the underlying store and release the handle
    pub fn close(self) -> Result<()> {
        self.store.sync()
    }

    pub(crate) fn read_page(&self, page: PageNum) -> Result<RecordPage> {
        RecordPage::from_buf(page, self.store.read_page(page)?)
    }

    fn write_page(&self, page: &RecordPage) -> Result<()> {
        self.store.write_page(page.page_num(), page.buf())
    }

    fn append_page(&self) -> Result<RecordPage> {
        let page = self.store.page_count();
        let appended = self.store.append_page(RecordPage::new(PageNum::new(page)).buf())?;
        debug!("appended record page {}", appended);
        Ok(RecordPage::new(appended))
    }

    /// Insert a record into the first page with room, appending a page if
    /// none has any.
    pub fn insert_record(&mut self, schema: &[Attribute], tuple: &Tuple) -> Result<Rid> {
        self.place(schema, tuple, false)
    }

    /// First-fit placement. A `relocated` record never lands on page 0 and
    /// its slot is marked as the target of a forwarding tombstone.
    fn place(&mut self, schema: &[Attribute], tuple: &Tuple, relocated: bool) -> Result<Rid> {
        let size = record_size(schema, tuple)?;

        let mut found = None;
        for num in u32::from(relocated)..self.store.page_count() {
            let page = self.read_page(PageNum::new(num))?;
            trace!(
                "probing page {} for {} bytes ({} free)",
                num,
                size,
                page.free_space()
            );
            if page.can_fit(size) {
                found = Some(page);
                break;
            }
        }

        let mut page = match found {
            Some(page) => page,
            None => self.append_page()?,
        };
        let slot = page.insert(schema, tuple)?;
        if relocated {
            page.mark_relocated(slot)?;
        }
        self.write_page(&page)?;
        Ok(Rid {
            page: page.page_num(),
            slot,
        })
    }

    /// Follow forwarding tombstones from `rid`.
    ///
    /// Returns the RIDs passed on the way and whether the last one holds
    /// the record. A tombstone is dangling when its target is empty or holds
    /// a record that was not relocated there, which happens once the target
    /// was deleted through its own RID; the dangling target is left out.
    fn walk(&self, rid: Rid) -> Result<(Vec<Rid>, bool)> {
        let mut chain = vec![rid];
        let mut seen = HashSet::from([rid]);
        let mut current = rid;

        loop {
            let page = self.read_page(current.page)?;
            let forwarded = chain.len() > 1;
            let state = if forwarded {
                page.slot_state(current.slot)?
            } else {
                page.live_slot(current.slot)?
            };

            match state {
                SlotState::Forward(target) => {
                    if !seen.insert(target) || chain.len() > self.config.max_forward_hops {
                        return Err(StorageError::ForwardingCycle(rid));
                    }
                    chain.push(target);
                    current = target;
                }
                SlotState::Normal { .. } if !forwarded || page.is_relocated(current.slot)? => {
                    return Ok((chain, true))
                }
                _ => {
                    chain.pop();
                    return Ok((chain, false));
                }
            }
        }
    }

    /// Every RID from `rid` through its forwarding tombstones to the slot
    /// holding the record.
    fn chain(&self, rid: Rid) -> Result<Vec<Rid>> {
        match self.walk(rid)? {
            (chain, true) => Ok(chain),
            (_, false) => Err(StorageError::RecordDoesNotExist(rid)),
        }
    }

    /// Follow forwards from `rid` to the page and slot holding the record
    fn resolve(&self, rid: Rid) -> Result<(RecordPage, u32)> {
        let chain = self.chain(rid)?;
        let last = chain[chain.len() - 1];
        Ok((self.read_page(last.page)?, last.slot))
    }

    pub fn read_record(&self, rid: Rid, schema: &[Attribute]) -> Result<Tuple> {
        let (page, slot) = self.resolve(rid)?;
        page.read(slot, schema)
    }

    /// Read a single named field without decoding the rest of the record
    pub fn read_attribute(&self, rid: Rid, schema: &[Attribute], name: &str) -> Result<Tuple> {
        let (page, slot) = self.resolve(rid)?;
        page.read_field(slot, schema, name)
    }

    /// Delete a record; a forwarded record is removed at every hop, and a
    /// dangling tombstone is cleared.
    pub fn delete_record(&mut self, rid: Rid) -> Result<()> {
        let (chain, _) = self.walk(rid)?;
        for hop in chain.into_iter().rev() {
            self.delete_slot(hop)?;
        }
        Ok(())
    }

    fn delete_slot(&mut self, rid: Rid) -> Result<()> {
        let mut page = self.read_page(rid.page)?;
        page.delete(rid.slot)?;
        self.write_page(&page)
    }

    /// Replace the record at `rid`.
    ///
    /// The RID stays valid: if the new version no longer fits its page it
    /// is stored elsewhere and the slot becomes a forwarding tombstone.
    pub fn update_record(&mut self, rid: Rid, schema: &[Attribute], tuple: &Tuple) -> Result<()> {
        record_size(schema, tuple)?;
        let mut page = self.read_page(rid.page)?;

        match page.live_slot(rid.slot)? {
            SlotState::Forward(_) => self.update_forwarded(rid, schema, tuple),
            _ => match page.update(rid.slot, schema, tuple)? {
                UpdateOutcome::Updated => self.write_page(&page),
                UpdateOutcome::NeedsRelocation => self.relocate(rid, schema, tuple),
            },
        }
    }

    /// Drop the forwarded copies, then try to bring the record home
    fn update_forwarded(&mut self, rid: Rid, schema: &[Attribute], tuple: &Tuple) -> Result<()> {
        for hop in self.chain(rid)?.into_iter().skip(1).rev() {
            self.delete_slot(hop)?;
        }

        let mut page = self.read_page(rid.page)?;
        match page.write_into_slot(rid.slot, schema, tuple) {
            Ok(()) => {
                debug!("forwarded record {} moved back home", rid);
                self.write_page(&page)
            }
            Err(e) if e.is_capacity() => self.relocate(rid, schema, tuple),
            Err(e) => Err(e),
        }
    }

    /// Store `tuple` on another page and leave a tombstone at `rid`.
    ///
    /// Relocation never targets page 0: a tombstone pointing there would
    /// read back as an empty slot.
    fn relocate(&mut self, rid: Rid, schema: &[Attribute], tuple: &Tuple) -> Result<()> {
        let target = self.place(schema, tuple, true)?;
        debug!("relocated record {} to {}", rid, target);

        let mut page = self.read_page(rid.page)?;
        page.set_forward(rid.slot, target)?;
        self.write_page(&page)
    }

    /// Scan every live record, filtering on `condition` and projecting
    /// `projection`.
    ///
    /// `condition` is `(field, op, literal)`; `CompOp::NoOp` or `None`
    /// accepts every record. Records whose field is null never match a
    /// real comparison.
    pub fn scan(
        &self,
        schema: &[Attribute],
        condition: Option<(&str, CompOp, &Value)>,
        projection: &[&str],
    ) -> Result<RecordScan<'_>> {
        RecordScan::new(self, schema, condition, projection)
    }

    /// Shorten forwarding chains.
    ///
    /// A record forwarded one hop is copied back into its home slot when the
    /// home page has room again, and its old copy is deleted. Longer chains
    /// are cut so the home slot points straight at the record, and the
    /// intermediate tombstones are emptied. RIDs of relocated copies handed
    /// out by earlier scans are invalidated.
    pub fn compact_forwards(&mut self) -> Result<CompactionStats> {
        let mut stats = CompactionStats::default();

        for num in 0..self.store.page_count() {
            let slot_count = self.read_page(PageNum::new(num))?.slot_count();
            for slot in 0..slot_count {
                let home = Rid {
                    page: PageNum::new(num),
                    slot,
                };
                if !matches!(self.read_page(home.page)?.slot_state(slot)?, SlotState::Forward(_)) {
                    continue;
                }

                let (chain, resolved) = self.walk(home)?;
                if !resolved {
                    continue;
                }
                let target = chain[chain.len() - 1];

                if chain.len() == 2 {
                    let bytes = self.read_page(target.page)?.raw_record(target.slot)?.to_vec();
                    let mut page = self.read_page(home.page)?;
                    if page.free_space() < bytes.len() {
                        continue;
                    }
                    page.insert_raw_into_slot(slot, &bytes)?;
                    self.write_page(&page)?;
                    self.delete_slot(target)?;
                    stats.moved_home += 1;
                } else {
                    let mut page = self.read_page(home.page)?;
                    page.set_forward(slot, target)?;
                    self.write_page(&page)?;
                    for &hop in &chain[1..chain.len() - 1] {
                        self.delete_slot(hop)?;
                    }
                    stats.collapsed += 1;
                }
            }
        }

        debug!(
            "forward compaction moved {} records home and collapsed {} chains",
            stats.moved_home, stats.collapsed
        );
        Ok(stats)
    }

    /// Validate every record page
    pub fn validate(&self) -> Result<()> {
        for num in 0..self.store.page_count() {
            self.read_page(PageNum::new(num))?.validate()?;
        }
        Ok(())
    }

    /// Point `home` straight at `target`, bypassing the update path
    #[cfg(test)]
    pub(crate) fn force_forward(&mut self, home: Rid, target: Rid) -> Result<()> {
        let mut page = self.read_page(home.page)?;
        page.set_forward(home.slot, target)?;
        self.write_page(&page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<Attribute> {
        vec![
            Attribute::int("id"),
            Attribute::varchar("name", 0),
            Attribute::real("score"),
        ]
    }

    fn row(id: i32, name: &str) -> Tuple {
        Tuple::new(vec![
            Value::Int(id),
            Value::VarChar(name.to_string()),
            Value::Real(id as f32 / 2.0),
        ])
    }

    fn file() -> Result<RecordFile> {
        RecordFile::in_memory(Config::default())
    }

    /// Fill pages 0 and 1 so that growing `rid` forces a relocation
    fn crowded(file: &mut RecordFile, schema: &[Attribute]) -> Result<Rid> {
        let rid = file.insert_record(schema, &row(0, "small"))?;
        let mut i = 1;
        while file.page_count() < 3 {
            file.insert_record(schema, &row(i, &"f".repeat(200)))?;
            i += 1;
        }
        Ok(rid)
    }

    #[test]
    fn test_insert_read_first_fit() -> Result<()> {
        let schema = schema();
        let mut file = file()?;

        let a = file.insert_record(&schema, &row(1, &"a".repeat(3000)))?;
        let b = file.insert_record(&schema, &row(2, &"b".repeat(3000)))?;
        let c = file.insert_record(&schema, &row(3, "c"))?;

        assert_eq!(a, Rid::new(0, 0));
        assert_eq!(b, Rid::new(1, 0));
        // first fit goes back to page 0
        assert_eq!(c, Rid::new(0, 1));
        assert_eq!(file.read_record(b, &schema)?, row(2, &"b".repeat(3000)));
        file.validate()
    }

    #[test]
    fn test_record_too_large() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        assert!(matches!(
            file.insert_record(&schema, &row(1, &"x".repeat(5000))),
            Err(StorageError::RecordTooLarge { .. })
        ));
        let rid = file.insert_record(&schema, &row(1, "fits"))?;
        assert!(matches!(
            file.update_record(rid, &schema, &row(1, &"x".repeat(5000))),
            Err(StorageError::RecordTooLarge { .. })
        ));
        assert_eq!(file.read_record(rid, &schema)?, row(1, "fits"));
        Ok(())
    }

    #[test]
    fn test_delete_and_not_found() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        let rid = file.insert_record(&schema, &row(1, "gone"))?;

        file.delete_record(rid)?;
        assert!(matches!(
            file.read_record(rid, &schema),
            Err(StorageError::RecordDoesNotExist(_))
        ));
        assert!(matches!(
            file.read_record(Rid::new(0, 9), &schema),
            Err(StorageError::SlotDoesNotExist(_))
        ));
        assert!(matches!(
            file.read_record(Rid::new(7, 0), &schema),
            Err(StorageError::PageOutOfRange { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_update_in_place_keeps_rid() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        let rid = file.insert_record(&schema, &row(1, "original"))?;
        let other = file.insert_record(&schema, &row(2, "neighbour"))?;

        file.update_record(rid, &schema, &row(1, "longer than the original"))?;
        assert_eq!(file.read_record(rid, &schema)?, row(1, "longer than the original"));
        file.update_record(rid, &schema, &row(1, "tiny"))?;
        assert_eq!(file.read_record(rid, &schema)?, row(1, "tiny"));
        assert_eq!(file.read_record(other, &schema)?, row(2, "neighbour"));
        file.validate()
    }

    #[test]
    fn test_update_relocates() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        let rid = crowded(&mut file, &schema)?;
        let big = row(0, &"g".repeat(1500));

        file.update_record(rid, &schema, &big)?;
        assert_eq!(file.read_record(rid, &schema)?, big);
        assert!(matches!(
            file.read_page(rid.page)?.slot_state(rid.slot)?,
            SlotState::Forward(target) if target.page.value() >= 1
        ));
        assert_eq!(
            file.read_attribute(rid, &schema, "name")?,
            Tuple::new(vec![Value::VarChar("g".repeat(1500))])
        );
        file.validate()
    }

    #[test]
    fn test_update_forwarded_record() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        let rid = crowded(&mut file, &schema)?;

        file.update_record(rid, &schema, &row(0, &"g".repeat(1500)))?;
        file.update_record(rid, &schema, &row(0, &"h".repeat(1600)))?;
        assert_eq!(file.read_record(rid, &schema)?, row(0, &"h".repeat(1600)));
        assert_eq!(file.chain(rid)?.len(), 2);

        // shrinks back into the home slot
        file.update_record(rid, &schema, &row(0, "home"))?;
        assert_eq!(file.read_record(rid, &schema)?, row(0, "home"));
        assert_eq!(file.chain(rid)?.len(), 1);
        file.validate()
    }

    #[test]
    fn test_delete_forwarded_record() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        let rid = crowded(&mut file, &schema)?;
        file.update_record(rid, &schema, &row(0, &"g".repeat(1500)))?;

        let before = file.scan(&schema, None, &["id"])?.count();
        file.delete_record(rid)?;
        assert!(file.read_record(rid, &schema).is_err());
        assert_eq!(file.scan(&schema, None, &["id"])?.count(), before - 1);
        file.validate()
    }

    #[test]
    fn test_forwarding_cycle() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        file.append_page()?;
        let a = file.place(&schema, &row(1, "a"), true)?;
        let b = file.place(&schema, &row(2, "b"), true)?;

        file.force_forward(a, b)?;
        file.force_forward(b, a)?;
        assert!(matches!(
            file.read_record(a, &schema),
            Err(StorageError::ForwardingCycle(rid)) if rid == a
        ));
        Ok(())
    }

    #[test]
    fn test_tombstone_does_not_resolve_to_reused_slot() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        let rid = crowded(&mut file, &schema)?;
        file.update_record(rid, &schema, &row(0, &"g".repeat(1000)))?;

        let moved: Vec<Rid> = file
            .scan(&schema, Some(("id", CompOp::Eq, &Value::Int(0))), &["id"])?
            .map(|item| item.map(|(r, _)| r))
            .collect::<Result<_>>()?;
        assert_eq!(moved.len(), 1);
        let dest = moved[0];
        assert_ne!(dest, rid);

        // delete through the scan's RID, then let a plain insert take the slot
        file.delete_record(dest)?;
        let other = file.insert_record(&schema, &row(7, &"h".repeat(1500)))?;
        assert_eq!(other, dest);

        assert!(matches!(
            file.read_record(rid, &schema),
            Err(StorageError::RecordDoesNotExist(r)) if r == rid
        ));
        assert!(matches!(
            file.update_record(rid, &schema, &row(0, "again")),
            Err(StorageError::RecordDoesNotExist(_))
        ));
        assert_eq!(file.read_record(other, &schema)?, row(7, &"h".repeat(1500)));

        // the dangling tombstone can still be cleared, leaving the other record
        file.delete_record(rid)?;
        assert!(matches!(
            file.read_record(rid, &schema),
            Err(StorageError::RecordDoesNotExist(_))
        ));
        assert_eq!(file.read_record(other, &schema)?, row(7, &"h".repeat(1500)));
        assert_eq!(file.compact_forwards()?, CompactionStats::default());
        file.validate()?;
        Ok(())
    }

    #[test]
    fn test_compact_forwards_moves_home() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        let rid = crowded(&mut file, &schema)?;
        let big = row(0, &"g".repeat(1500));
        file.update_record(rid, &schema, &big)?;

        // free the home page
        let home_rids: Vec<Rid> = file
            .scan(&schema, None, &[])?
            .map(|item| item.map(|(r, _)| r))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|r| r.page == rid.page)
            .collect();
        for r in home_rids {
            file.delete_record(r)?;
        }

        let stats = file.compact_forwards()?;
        assert_eq!(stats, CompactionStats { moved_home: 1, collapsed: 0 });
        assert_eq!(file.chain(rid)?.len(), 1);
        assert_eq!(file.read_record(rid, &schema)?, big);
        file.validate()
    }

    #[test]
    fn test_compact_forwards_collapses_chain() -> Result<()> {
        let schema = schema();
        let mut file = file()?;
        let home = file.insert_record(&schema, &row(0, "placeholder"))?;
        file.append_page()?;
        let hop = file.place(&schema, &row(9, "hop"), true)?;
        let target = file.place(&schema, &row(1, "final"), true)?;

        file.force_forward(hop, target)?;
        file.force_forward(home, hop)?;

        assert_eq!(file.chain(home)?, vec![home, hop, target]);
        let stats = file.compact_forwards()?;
        assert_eq!(stats.collapsed, 1);
        assert_eq!(file.chain(home)?, vec![home, target]);
        assert_eq!(file.read_record(home, &schema)?, row(1, "final"));
        assert!(matches!(
            file.read_page(hop.page)?.slot_state(hop.slot)?,
            SlotState::Empty
        ));
        Ok(())
    }

    #[test]
    fn test_random_operations() -> Result<()> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::collections::HashMap;

        let schema = schema();
        let mut file = file()?;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut model: HashMap<Rid, Tuple> = HashMap::new();
        let mut live: Vec<Rid> = Vec::new();

        for i in 0..2000 {
            let name = "r".repeat(rng.gen_range(0..1200));
            match rng.gen_range(0..4) {
                0 | 1 => {
                    let tuple = row(i, &name);
                    let rid = file.insert_record(&schema, &tuple)?;
                    assert!(model.insert(rid, tuple).is_none());
                    live.push(rid);
                }
                2 if !live.is_empty() => {
                    let rid = live[rng.gen_range(0..live.len())];
                    let tuple = row(i, &name);
                    file.update_record(rid, &schema, &tuple)?;
                    model.insert(rid, tuple);
                }
                3 if !live.is_empty() => {
                    let rid = live.swap_remove(rng.gen_range(0..live.len()));
                    file.delete_record(rid)?;
                    model.remove(&rid);
                }
                _ => {}
            }
        }

        file.validate()?;
        for (rid, tuple) in &model {
            assert_eq!(file.read_record(*rid, &schema)?, *tuple);
        }
        assert_eq!(file.scan(&schema, None, &[])?.count(), model.len());

        file.compact_forwards()?;
        file.validate()?;
        for (rid, tuple) in &model {
            assert_eq!(file.read_record(*rid, &schema)?, *tuple);
        }
        assert_eq!(file.scan(&schema, None, &[])?.count(), model.len());
        Ok(())
    }
}
