//! Structural self-checks.
//!
//! `validate_structure` checks the cache against itself and runs after every
//! mutation when the `sanitize` feature is on. `validate` additionally checks
//! the cache against storage and is only meaningful once every pending event
//! has been delivered.

use crate::cache::QueryCache;
use alloc::format;
use alloc::vec::Vec;
use hashbrown::HashSet;
use quarry_core::{Error, Result, Storage};

impl QueryCache {
    /// Checks list, group and table-record consistency.
    pub fn validate_structure(&self) -> Result<()> {
        // iteration list
        let mut seen = HashSet::new();
        let mut prev = None;
        let mut cur = self.list.first;
        while let Some(id) = cur {
            let m = self
                .arena
                .get(id)
                .ok_or_else(|| Error::internal(format!("list references freed match {}", id)))?;
            if !seen.insert(id) {
                return Err(Error::internal(format!("list cycles at match {}", id)));
            }
            if !m.linked {
                return Err(Error::internal(format!("match {} in list is not marked linked", id)));
            }
            if m.prev != prev {
                return Err(Error::internal(format!("match {} has a broken prev link", id)));
            }
            prev = Some(id);
            cur = m.next;
        }
        if self.list.last != prev {
            return Err(Error::internal("list tail does not match the last node"));
        }
        if seen.len() != self.list.count {
            return Err(Error::internal(format!(
                "list holds {} matches, count says {}",
                seen.len(),
                self.list.count
            )));
        }
        if let Some((id, _)) = self.arena.iter().find(|(id, m)| m.linked && !seen.contains(id)) {
            return Err(Error::internal(format!("match {} is linked but unreachable", id)));
        }

        // groups appear in key order and own contiguous runs
        let mut expected_first = self.list.first;
        let mut last_of_prev = None;
        for (group_id, group) in self.list.group_order() {
            if group.first != expected_first {
                return Err(Error::internal(format!("group {} is out of order", group_id)));
            }
            let mut count = 0;
            let mut cur = group.first;
            while let Some(id) = cur {
                let m = self
                    .arena
                    .get(id)
                    .ok_or_else(|| Error::internal(format!("group {} references freed match", group_id)))?;
                if m.group_id != *group_id {
                    return Err(Error::internal(format!(
                        "match {} of group {} is tagged {}",
                        id, group_id, m.group_id
                    )));
                }
                count += 1;
                if cur == group.last {
                    expected_first = m.next;
                    break;
                }
                cur = m.next;
            }
            if count != group.info.table_count {
                return Err(Error::internal(format!(
                    "group {} holds {} matches, table_count says {}",
                    group_id, count, group.info.table_count
                )));
            }
            last_of_prev = group.last;
        }
        if expected_first.is_some() || last_of_prev != self.list.last {
            return Err(Error::internal("groups do not bracket the iteration list"));
        }

        // table records
        let mut owned = 0;
        for table in self.tables.tables() {
            let record = self
                .tables
                .get(table)
                .ok_or_else(|| Error::internal(format!("table {} is partitioned but has no record", table)))?;
            let mut cur = record.first;
            let mut last = None;
            while let Some(id) = cur {
                let m = self
                    .arena
                    .get(id)
                    .ok_or_else(|| Error::internal(format!("table {} references freed match", table)))?;
                if m.table != Some(table) {
                    return Err(Error::internal(format!("match {} is filed under table {}", id, table)));
                }
                let should_link = !record.empty || self.yield_empty;
                if m.linked != should_link {
                    return Err(Error::internal(format!(
                        "match {} of table {} linked={} but expected {}",
                        id, table, m.linked, should_link
                    )));
                }
                owned += 1;
                last = cur;
                cur = m.next_match;
            }
            if record.last != last {
                return Err(Error::internal(format!("table {} has a stale last match", table)));
            }
        }
        let expected = owned + self.singleton.map(|_| 1).unwrap_or(0);
        if expected != self.arena.len() {
            return Err(Error::internal(format!(
                "{} matches allocated but {} owned by tables",
                self.arena.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Checks structure plus agreement with storage: partitions reflect row
    /// counts and every record still refers to a live table.
    pub fn validate(&self, storage: &dyn Storage) -> Result<()> {
        self.validate_structure()?;
        let mut wrong = Vec::new();
        for table in self.tables.tables() {
            if !storage.has_table(table) {
                return Err(Error::internal(format!("table {} was deleted but is still cached", table)));
            }
            let empty = self.tables.get(table).map(|r| r.empty).unwrap_or(false);
            if empty != (storage.table_count(table) == 0) {
                wrong.push(table);
            }
        }
        if !wrong.is_empty() {
            return Err(Error::internal(format!("tables in the wrong partition: {:?}", wrong)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_query::QueryDesc;
    use quarry_storage::World;

    #[test]
    fn test_validate_fresh_cache() {
        let mut world = World::new();
        let a = world.tag();
        for _ in 0..3 {
            let e = world.spawn();
            world.add(e, a).unwrap();
        }
        world.drain_events();

        let cache = QueryCache::build(&mut world, QueryDesc::new().with(a)).unwrap();
        assert!(cache.validate(&world).is_ok());
    }
}
