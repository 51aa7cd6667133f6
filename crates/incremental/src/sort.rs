//! Ordered iteration.
//!
//! Tables are never reordered in storage. Every table record keeps a row
//! permutation sorted by the order column, and the cache merges the
//! permutations of a group into a list of slices. A table is re-sorted only
//! when its row version or the version of the order column moved.

use crate::arena::{Arena, MatchId};
use crate::group::GroupId;
use crate::list::MatchList;
use crate::matches::{Match, StorageColumn};
use crate::table_index::TableIndex;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::ops::Range;
use hashbrown::HashMap;
use quarry_core::{Entity, Id, Storage, TableId, Value};

/// Orders two rows. Values are None when ordering by entity only or when
/// the row has no value.
pub trait Comparator {
    fn compare(&self, e1: Entity, v1: Option<&Value>, e2: Entity, v2: Option<&Value>) -> Ordering;
}

impl<F> Comparator for F
where
    F: Fn(Entity, Option<&Value>, Entity, Option<&Value>) -> Ordering,
{
    fn compare(&self, e1: Entity, v1: Option<&Value>, e2: Entity, v2: Option<&Value>) -> Ordering {
        self(e1, v1, e2, v2)
    }
}

/// Ascending by value, then by entity.
pub fn by_value(e1: Entity, v1: Option<&Value>, e2: Entity, v2: Option<&Value>) -> Ordering {
    v1.cmp(&v2).then(e1.cmp(&e2))
}

/// Ascending by entity id.
pub fn by_entity(e1: Entity, _: Option<&Value>, e2: Entity, _: Option<&Value>) -> Ordering {
    e1.cmp(&e2)
}

/// A validated order_by clause.
pub(crate) struct OrderBy {
    pub(crate) id: Option<Id>,
    /// Cached field holding the ordered component.
    pub(crate) field: Option<usize>,
    pub(crate) comparator: Box<dyn Comparator>,
}

/// A run of consecutive sorted rows of one match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortedSlice {
    pub match_id: MatchId,
    /// Offset into the table's sorted permutation.
    pub start: usize,
    pub count: usize,
}

/// Output of a merge pass.
#[derive(Default)]
pub(crate) struct SortedView {
    pub(crate) slices: Vec<SortedSlice>,
    /// Slice range of each group.
    pub(crate) groups: HashMap<GroupId, Range<usize>>,
}

impl SortedView {
    pub(crate) fn group_range(&self, group: GroupId) -> Option<Range<usize>> {
        self.groups.get(&group).cloned()
    }
}

fn order_column<'s>(
    storage: &'s dyn Storage,
    order: &OrderBy,
    m: &Match,
) -> Option<&'s [Value]> {
    let field = order.field?;
    match (m.table, m.storage_columns.get(field)) {
        (Some(table), Some(StorageColumn::Owned(index))) => storage.column(table, *index),
        _ => None,
    }
}

/// Re-sorts every table whose monitor moved. Returns true if any table was sorted.
pub(crate) fn sort_tables(
    storage: &dyn Storage,
    order: &OrderBy,
    arena: &Arena<Match>,
    tables: &mut TableIndex,
) -> bool {
    let mut sorted = false;
    let keys: Vec<TableId> = tables.non_empty().to_vec();
    for table in keys {
        let Some(record) = tables.get_mut(table) else {
            continue;
        };
        let Some(m) = record.first.and_then(|id| arena.get(id)) else {
            continue;
        };
        let dirty = storage.dirty_state(table);
        let column_version = match order.field.map(|f| m.storage_columns[f]) {
            Some(StorageColumn::Owned(index)) => dirty.get(index + 1).copied().unwrap_or(0),
            _ => 0,
        };
        let monitor = [dirty.first().copied().unwrap_or(0), column_version];
        if record.sort_monitor == Some(monitor) {
            continue;
        }

        let entities = storage.table_entities(table);
        let column = order_column(storage, order, m);
        let value = |row: usize| column.and_then(|c| c.get(row));
        record.rows.clear();
        record.rows.extend(0..entities.len());
        record.rows.sort_by(|a, b| {
            order
                .comparator
                .compare(entities[*a], value(*a), entities[*b], value(*b))
        });
        record.sort_monitor = Some(monitor);
        tracing::trace!(table, rows = entities.len(), "table sorted");
        sorted = true;
    }
    sorted
}

struct Head<'a> {
    match_id: MatchId,
    entities: &'a [Entity],
    column: Option<&'a [Value]>,
    rows: &'a [usize],
    pos: usize,
}

impl Head<'_> {
    fn current(&self) -> Option<(Entity, Option<&Value>)> {
        let row = *self.rows.get(self.pos)?;
        Some((self.entities[row], self.column.and_then(|c| c.get(row))))
    }
}

/// Merges the sorted permutations of every linked match, group by group.
pub(crate) fn build_view(
    storage: &dyn Storage,
    order: &OrderBy,
    arena: &Arena<Match>,
    tables: &TableIndex,
    list: &MatchList,
) -> SortedView {
    let mut view = SortedView::default();
    for (group_id, group) in list.group_order() {
        let start = view.slices.len();
        let mut heads = Vec::new();
        let mut cur = group.first;
        while let Some(id) = cur {
            let Some(m) = arena.get(id) else {
                break;
            };
            if let Some(record) = m.table.and_then(|t| tables.get(t)) {
                heads.push(Head {
                    match_id: id,
                    entities: m.table.map(|t| storage.table_entities(t)).unwrap_or(&[]),
                    column: order_column(storage, order, m),
                    rows: &record.rows,
                    pos: 0,
                });
            }
            if cur == group.last {
                break;
            }
            cur = m.next;
        }

        loop {
            let mut best: Option<usize> = None;
            for (k, head) in heads.iter().enumerate() {
                let Some((e, v)) = head.current() else {
                    continue;
                };
                let wins = match best.and_then(|b| heads[b].current()) {
                    None => true,
                    Some((be, bv)) => order.comparator.compare(e, v, be, bv) == Ordering::Less,
                };
                if wins {
                    best = Some(k);
                }
            }
            let Some(b) = best else {
                break;
            };
            let head = &mut heads[b];
            let extends = view.slices.len() > start
                && view
                    .slices
                    .last()
                    .map(|s| s.match_id == head.match_id && s.start + s.count == head.pos)
                    .unwrap_or(false);
            if extends {
                if let Some(slice) = view.slices.last_mut() {
                    slice.count += 1;
                }
            } else {
                view.slices.push(SortedSlice {
                    match_id: head.match_id,
                    start: head.pos,
                    count: 1,
                });
            }
            head.pos += 1;
        }
        view.groups.insert(*group_id, start..view.slices.len());
    }
    tracing::debug!(slices = view.slices.len(), groups = view.groups.len(), "sorted view rebuilt");
    view
}
