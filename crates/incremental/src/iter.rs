//! Cache iteration.

use crate::arena::MatchId;
use crate::cache::QueryCache;
use crate::group::GroupId;
use crate::matches::{Match, StorageColumn};
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::ops::Range;
use quarry_core::{Entity, Id, Storage, TableId, Value};

/// Resolution of a fixed-source term for one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedField {
    /// Public field index.
    pub field: usize,
    pub id: Id,
    pub src: Entity,
    /// Position of the id in the source's table type, None when absent.
    pub column: Option<usize>,
}

enum Cursor {
    List {
        next: Option<MatchId>,
        stop: Option<MatchId>,
    },
    Sorted {
        pos: usize,
        end: usize,
    },
    Done,
}

/// Iterator over the matches of a cache.
///
/// Results are assumed to be written through the cache's write fields.
/// Call [`skip`](Self::skip) for results left untouched, then
/// [`finish`](Self::finish) and apply the returned [`WriteSet`].
pub struct CacheIter<'a> {
    cache: &'a QueryCache,
    storage: &'a dyn Storage,
    fixed: Rc<[FixedField]>,
    cursor: Cursor,
    /// Last yielded match, not yet committed to `written`.
    pending: Option<MatchId>,
    written: Vec<MatchId>,
}

impl<'a> CacheIter<'a> {
    pub(crate) fn new(
        cache: &'a QueryCache,
        storage: &'a dyn Storage,
        fixed: Option<Rc<[FixedField]>>,
        sorted: bool,
    ) -> Self {
        let cursor = match (&fixed, sorted) {
            (None, _) => Cursor::Done,
            (Some(_), true) => Cursor::Sorted {
                pos: 0,
                end: cache.view.slices.len(),
            },
            (Some(_), false) => Cursor::List {
                next: cache.list.first,
                stop: cache.list.last,
            },
        };
        Self {
            cache,
            storage,
            fixed: fixed.unwrap_or_else(|| Rc::from(Vec::new())),
            cursor,
            pending: None,
            written: Vec::new(),
        }
    }

    /// Restricts iteration to one group. An unknown group yields nothing.
    pub fn set_group(mut self, group: GroupId) -> Self {
        self.cursor = match self.cursor {
            Cursor::Done => Cursor::Done,
            Cursor::List { .. } => match self.cache.list.groups.get(&group) {
                Some(g) => Cursor::List {
                    next: g.first,
                    stop: g.last,
                },
                None => Cursor::Done,
            },
            Cursor::Sorted { .. } => match self.cache.view.group_range(group) {
                Some(range) => Cursor::Sorted {
                    pos: range.start,
                    end: range.end,
                },
                None => Cursor::Done,
            },
        };
        self
    }

    /// Marks the last yielded result as not written.
    pub fn skip(&mut self) {
        self.pending = None;
    }

    /// Ends iteration and returns the columns written through it.
    ///
    /// Fixed-source write fields are included once, even if nothing was
    /// yielded.
    pub fn finish(mut self) -> WriteSet {
        self.commit();
        let mut columns = Vec::new();
        for id in &self.written {
            self.cache.written_columns(self.storage, *id, &mut columns);
        }
        self.cache.fixed_written_columns(self.storage, &self.fixed, &mut columns);
        columns.sort_unstable();
        columns.dedup();
        WriteSet { columns }
    }

    fn commit(&mut self) {
        if let Some(id) = self.pending.take() {
            self.written.push(id);
        }
    }

    fn result(&mut self, id: MatchId, rows: Option<&'a [usize]>) -> Option<CacheResult<'a>> {
        self.commit();
        let cache = self.cache;
        let m = cache.arena.get(id)?;
        self.pending = Some(id);
        Some(CacheResult {
            cache,
            storage: self.storage,
            match_id: id,
            m,
            fixed: self.fixed.clone(),
            rows,
        })
    }
}

impl<'a> Iterator for CacheIter<'a> {
    type Item = CacheResult<'a>;

    fn next(&mut self) -> Option<CacheResult<'a>> {
        loop {
            match &mut self.cursor {
                Cursor::Done => return None,
                Cursor::List { next, stop } => {
                    let Some(id) = *next else {
                        self.cursor = Cursor::Done;
                        return None;
                    };
                    *next = if Some(id) == *stop {
                        None
                    } else {
                        self.cache.arena.get(id).and_then(|m| m.next)
                    };
                    return self.result(id, None);
                }
                Cursor::Sorted { pos, end } => {
                    if *pos >= *end {
                        self.cursor = Cursor::Done;
                        return None;
                    }
                    let Some(slice) = self.cache.view.slices.get(*pos).copied() else {
                        self.cursor = Cursor::Done;
                        return None;
                    };
                    *pos += 1;
                    let cache = self.cache;
                    let rows = cache
                        .arena
                        .get(slice.match_id)
                        .and_then(|m| m.table)
                        .and_then(|t| cache.tables.get(t))
                        .and_then(|r| r.rows.get(slice.start..slice.start + slice.count));
                    // rows may be stale when iterating without a refresh
                    if let Some(rows) = rows {
                        return self.result(slice.match_id, Some(rows));
                    }
                }
            }
        }
    }
}

/// Columns written during one iteration, as `(table, type_index)` pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteSet {
    columns: Vec<(TableId, usize)>,
}

impl WriteSet {
    pub fn columns(&self) -> &[(TableId, usize)] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Bumps the write version of every column.
    pub fn apply(self, storage: &mut dyn Storage) {
        for (table, index) in self.columns {
            storage.mark_dirty(table, index);
        }
    }
}

/// Row indices of one result, in iteration order.
pub enum Rows<'a> {
    All(Range<usize>),
    Sorted(core::slice::Iter<'a, usize>),
}

impl Iterator for Rows<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self {
            Rows::All(range) => range.next(),
            Rows::Sorted(rows) => rows.next().copied(),
        }
    }
}

/// One match produced by a [`CacheIter`]. Field indices are public.
pub struct CacheResult<'a> {
    cache: &'a QueryCache,
    storage: &'a dyn Storage,
    match_id: MatchId,
    m: &'a Match,
    fixed: Rc<[FixedField]>,
    rows: Option<&'a [usize]>,
}

impl<'a> CacheResult<'a> {
    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    /// Matched table, None for queries without `$this` terms.
    pub fn table(&self) -> Option<TableId> {
        self.m.table
    }

    pub fn group_id(&self) -> GroupId {
        self.m.group_id
    }

    /// Number of rows covered by this result.
    pub fn count(&self) -> usize {
        match (self.rows, self.m.table) {
            (Some(rows), _) => rows.len(),
            (None, Some(table)) => self.storage.table_count(table),
            (None, None) => 0,
        }
    }

    pub fn rows(&self) -> Rows<'a> {
        match self.rows {
            Some(rows) => Rows::Sorted(rows.iter()),
            None => Rows::All(0..self.count()),
        }
    }

    /// Entities in iteration order.
    pub fn entities(&self) -> Vec<Entity> {
        let Some(table) = self.m.table else {
            return Vec::new();
        };
        let entities = self.storage.table_entities(table);
        self.rows().filter_map(|row| entities.get(row).copied()).collect()
    }

    pub fn field_count(&self) -> usize {
        self.cache.cached_field.len()
    }

    fn fixed(&self, field: usize) -> Option<&FixedField> {
        self.fixed.iter().find(|f| f.field == field)
    }

    fn local(&self, field: usize) -> Option<usize> {
        self.cache.cached_field.get(field).copied().flatten()
    }

    /// Resolved id of a field.
    pub fn id(&self, field: usize) -> Option<Id> {
        match self.local(field) {
            Some(local) => self.m.ids.get(local).copied(),
            None => self.fixed(field).map(|f| f.id),
        }
    }

    /// Source entity of a field, 0 for the matched table.
    pub fn source(&self, field: usize) -> Entity {
        match self.local(field) {
            Some(local) => self.m.sources.get(local).copied().unwrap_or(0),
            None => self.fixed(field).map(|f| f.src).unwrap_or(0),
        }
    }

    /// Position of the field's id in its source's table type.
    pub fn column(&self, field: usize) -> Option<usize> {
        match self.local(field) {
            Some(local) => self.m.columns.get(local).copied().flatten(),
            None => self.fixed(field).and_then(|f| f.column),
        }
    }

    pub fn is_set(&self, field: usize) -> bool {
        match self.local(field) {
            Some(local) => self.m.set_fields & (1 << local) != 0,
            None => self.fixed(field).map(|f| f.column.is_some()).unwrap_or(false),
        }
    }

    /// Returns true if the field is resolved on the matched table itself.
    pub fn is_self(&self, field: usize) -> bool {
        self.is_set(field) && self.source(field) == 0
    }

    /// Storage row of the `i`-th row in iteration order.
    pub fn row(&self, i: usize) -> Option<usize> {
        match self.rows {
            Some(rows) => rows.get(i).copied(),
            None if i < self.count() => Some(i),
            None => None,
        }
    }

    /// Value of a field for the `i`-th row in iteration order.
    pub fn value(&self, field: usize, i: usize) -> Option<&'a Value> {
        let row = self.row(i)?;
        self.value_at(field, row)
    }

    /// Values of a field for every row, in iteration order.
    pub fn values(&self, field: usize) -> Vec<Option<&'a Value>> {
        self.rows().map(|row| self.value_at(field, row)).collect()
    }

    fn value_at(&self, field: usize, row: usize) -> Option<&'a Value> {
        let storage = self.storage;
        match self.local(field) {
            Some(local) => match self.m.storage_columns.get(local)? {
                StorageColumn::Owned(index) => storage.column(self.m.table?, *index)?.get(row),
                StorageColumn::Shared => {
                    let (table, src_row) = storage.entity_table(self.m.sources[local])?;
                    storage.column(table, self.m.columns[local]?)?.get(src_row)
                }
                StorageColumn::None => None,
            },
            None => {
                let fixed = self.fixed(field)?;
                let (table, src_row) = storage.entity_table(fixed.src)?;
                storage.column(table, fixed.column?)?.get(src_row)
            }
        }
    }

    /// The underlying match.
    pub fn as_match(&self) -> &'a Match {
        self.m
    }
}
