//! Per-table records of a cache.
//!
//! Records live in two partitions, non-empty and empty, so skipping empty
//! tables and counting them are both O(1). Moving a record between
//! partitions is a swap-remove plus a push.

use crate::arena::MatchId;
use alloc::vec::Vec;
use hashbrown::HashMap;
use quarry_core::TableId;

/// Cache-side state of one matched table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableRecord {
    /// First match of the table's sub-list.
    pub first: Option<MatchId>,
    /// Last match of the table's sub-list.
    pub last: Option<MatchId>,
    /// Rematch pass that last confirmed the table.
    pub rematch_count: u64,
    /// Partition the record is in.
    pub empty: bool,
    /// `[row version, order column version]` at the last sort.
    pub sort_monitor: Option<[u32; 2]>,
    /// Sorted row permutation of the table.
    pub rows: Vec<usize>,
}

struct Entry {
    record: TableRecord,
    pos: usize,
}

/// Table id to record, split by emptiness.
#[derive(Default)]
pub struct TableIndex {
    entries: HashMap<TableId, Entry>,
    /// Partition 0 holds non-empty tables, partition 1 empty ones.
    partitions: [Vec<TableId>; 2],
}

impl TableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record for a table not yet in the index.
    pub fn insert(&mut self, table: TableId, empty: bool) -> &mut TableRecord {
        debug_assert!(!self.entries.contains_key(&table));
        let part = &mut self.partitions[empty as usize];
        part.push(table);
        let pos = part.len() - 1;
        let entry = self.entries.entry(table).or_insert(Entry {
            record: TableRecord::default(),
            pos,
        });
        entry.record.empty = empty;
        &mut entry.record
    }

    /// Removes a record.
    pub fn remove(&mut self, table: TableId) -> Option<TableRecord> {
        let entry = self.entries.remove(&table)?;
        self.detach(table, entry.record.empty, entry.pos);
        Some(entry.record)
    }

    /// Moves a record to the other partition. Returns false if the record
    /// was already there or the table is unknown.
    pub fn set_empty(&mut self, table: TableId, empty: bool) -> bool {
        let Some(entry) = self.entries.get(&table) else {
            return false;
        };
        if entry.record.empty == empty {
            return false;
        }
        let pos = entry.pos;
        self.detach(table, !empty, pos);

        let part = &mut self.partitions[empty as usize];
        part.push(table);
        let pos = part.len() - 1;
        if let Some(entry) = self.entries.get_mut(&table) {
            entry.pos = pos;
            entry.record.empty = empty;
        }
        true
    }

    fn detach(&mut self, table: TableId, empty: bool, pos: usize) {
        let part = &mut self.partitions[empty as usize];
        debug_assert_eq!(part.get(pos), Some(&table));
        part.swap_remove(pos);
        if let Some(&moved) = part.get(pos) {
            if let Some(entry) = self.entries.get_mut(&moved) {
                entry.pos = pos;
            }
        }
    }

    pub fn get(&self, table: TableId) -> Option<&TableRecord> {
        self.entries.get(&table).map(|e| &e.record)
    }

    pub fn get_mut(&mut self, table: TableId) -> Option<&mut TableRecord> {
        self.entries.get_mut(&table).map(|e| &mut e.record)
    }

    pub fn contains(&self, table: TableId) -> bool {
        self.entries.contains_key(&table)
    }

    /// Tables in the non-empty partition.
    pub fn non_empty(&self) -> &[TableId] {
        &self.partitions[0]
    }

    /// Tables in the empty partition.
    pub fn empty(&self) -> &[TableId] {
        &self.partitions[1]
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every indexed table, both partitions.
    pub fn tables(&self) -> impl Iterator<Item = TableId> + '_ {
        self.partitions[0].iter().chain(self.partitions[1].iter()).copied()
    }
}
