//! Match records.
//!
//! A match is one resolution of the cached terms against one table. Tables
//! matched by wildcard terms get one match per distinct resolution; the
//! matches of a table form a sub-list through `next_match`.

use crate::arena::MatchId;
use crate::block::BlockPool;
use crate::group::GroupId;
use alloc::boxed::Box;
use quarry_core::{Entity, Id, Storage, TableId};
use quarry_query::QueryResult;

/// Where the data of a field lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageColumn {
    /// Column at this type index of the matched table.
    Owned(usize),
    /// Stored on the source entity, shared by every row.
    Shared,
    /// No data: a tag, a not-term or an unset optional field.
    None,
}

/// One (table, resolution) pair satisfying a cached query.
pub struct Match {
    pub(crate) table: Option<TableId>,
    pub(crate) group_id: GroupId,
    pub(crate) ids: Box<[Id]>,
    pub(crate) sources: Box<[Entity]>,
    pub(crate) columns: Box<[Option<usize>]>,
    pub(crate) storage_columns: Box<[StorageColumn]>,
    pub(crate) set_fields: u64,
    pub(crate) up_fields: u64,
    pub(crate) monitor: Option<Box<[i64]>>,
    pub(crate) prev: Option<MatchId>,
    pub(crate) next: Option<MatchId>,
    pub(crate) next_match: Option<MatchId>,
    pub(crate) linked: bool,
}

impl Match {
    /// Table of the match, None for the singleton of a query without
    /// `$this` terms.
    pub fn table(&self) -> Option<TableId> {
        self.table
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Resolved id per cached field.
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    /// Source entity per cached field, 0 for the matched table itself.
    pub fn sources(&self) -> &[Entity] {
        &self.sources
    }

    /// Position of each field's id in its source's table type.
    pub fn columns(&self) -> &[Option<usize>] {
        &self.columns
    }

    pub fn storage_columns(&self) -> &[StorageColumn] {
        &self.storage_columns
    }

    pub fn set_fields(&self) -> u64 {
        self.set_fields
    }

    pub fn up_fields(&self) -> u64 {
        self.up_fields
    }

    /// Returns true while the match is part of the iteration list.
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Next match of the same table.
    pub fn next_match(&self) -> Option<MatchId> {
        self.next_match
    }

    /// Copies a plan result into the match.
    pub(crate) fn bind(&mut self, storage: &dyn Storage, result: &QueryResult) {
        debug_assert_eq!(result.ids.len(), self.ids.len());
        self.set_fields = result.set_fields;
        self.up_fields = result.up_fields;
        for field in 0..self.ids.len() {
            self.ids[field] = result.ids[field];
            self.sources[field] = result.sources[field];
            self.columns[field] = result.columns[field];
            self.storage_columns[field] = if !result.is_set(field) {
                StorageColumn::None
            } else if result.sources[field] != 0 {
                StorageColumn::Shared
            } else {
                match (self.table, result.columns[field]) {
                    (Some(table), Some(column)) if storage.has_column(table, column) => {
                        StorageColumn::Owned(column)
                    }
                    _ => StorageColumn::None,
                }
            };
        }
    }
}

/// Block pools for the per-field arrays of matches.
pub(crate) struct MatchPools {
    ids: BlockPool<Id>,
    sources: BlockPool<Entity>,
    columns: BlockPool<Option<usize>>,
    storage_columns: BlockPool<StorageColumn>,
    monitors: BlockPool<i64>,
}

impl MatchPools {
    pub(crate) fn new(field_count: usize) -> Self {
        Self {
            ids: BlockPool::new(field_count, Id::WILDCARD),
            sources: BlockPool::new(field_count, 0),
            columns: BlockPool::new(field_count, None),
            storage_columns: BlockPool::new(field_count, StorageColumn::None),
            monitors: BlockPool::new(field_count + 1, -1),
        }
    }

    /// Allocates an unlinked match. `track` allocates a change monitor.
    pub(crate) fn alloc(&mut self, table: Option<TableId>, group_id: GroupId, track: bool) -> Match {
        Match {
            table,
            group_id,
            ids: self.ids.alloc(),
            sources: self.sources.alloc(),
            columns: self.columns.alloc(),
            storage_columns: self.storage_columns.alloc(),
            set_fields: 0,
            up_fields: 0,
            monitor: if track { Some(self.monitors.alloc()) } else { None },
            prev: None,
            next: None,
            next_match: None,
            linked: false,
        }
    }

    pub(crate) fn free(&mut self, m: Match) {
        debug_assert!(!m.linked, "freeing a linked match");
        self.ids.free(m.ids);
        self.sources.free(m.sources);
        self.columns.free(m.columns);
        self.storage_columns.free(m.storage_columns);
        if let Some(monitor) = m.monitor {
            self.monitors.free(monitor);
        }
    }

    /// Number of matches whose blocks are handed out.
    pub(crate) fn outstanding(&self) -> usize {
        self.ids.outstanding()
    }
}
