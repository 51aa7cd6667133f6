//! Change detection.
//!
//! A monitor is a snapshot of write versions: slot 0 holds the row version
//! of the matched table and slot `1 + f` the column version of field `f`.
//! Fields that are not read, not set or carry no data hold -1 and never
//! report changes.

use crate::matches::{Match, StorageColumn};
use quarry_core::{find_id, Entity, Id, Storage, TableId};

/// Marker for untracked slots.
pub const UNTRACKED: i64 = -1;

fn version(storage: &dyn Storage, table: TableId, type_index: usize) -> i64 {
    if !storage.has_column(table, type_index) {
        return UNTRACKED;
    }
    storage
        .dirty_state(table)
        .get(type_index + 1)
        .map(|v| *v as i64)
        .unwrap_or(UNTRACKED)
}

fn row_version(storage: &dyn Storage, table: Option<TableId>) -> i64 {
    table
        .and_then(|t| storage.dirty_state(t).first().copied())
        .map(|v| v as i64)
        .unwrap_or(UNTRACKED)
}

/// Current version of one field of a match.
pub(crate) fn field_version(storage: &dyn Storage, m: &Match, field: usize, tracked: u64) -> i64 {
    if tracked & (1 << field) == 0 || m.set_fields & (1 << field) == 0 {
        return UNTRACKED;
    }
    match m.storage_columns[field] {
        StorageColumn::Owned(index) => match m.table {
            Some(table) => version(storage, table, index),
            None => UNTRACKED,
        },
        StorageColumn::Shared => {
            let Some((table, _)) = storage.entity_table(m.sources[field]) else {
                return UNTRACKED;
            };
            match m.columns[field] {
                Some(column) => version(storage, table, column),
                None => UNTRACKED,
            }
        }
        StorageColumn::None => UNTRACKED,
    }
}

/// Writes the current versions of a match into `out`.
pub(crate) fn snapshot(storage: &dyn Storage, m: &Match, tracked: u64, out: &mut [i64]) {
    out[0] = row_version(storage, m.table);
    for (field, slot) in out[1..].iter_mut().enumerate() {
        *slot = field_version(storage, m, field, tracked);
    }
}

/// Returns true if any tracked version of the match moved.
pub(crate) fn is_dirty(storage: &dyn Storage, m: &Match, tracked: u64, monitor: &[i64]) -> bool {
    if monitor[0] != row_version(storage, m.table) {
        return true;
    }
    monitor[1..]
        .iter()
        .enumerate()
        .any(|(field, prev)| *prev != field_version(storage, m, field, tracked))
}

/// Column version of `id` on a fixed entity, or the row version of its table
/// when the id carries no data.
pub(crate) fn entity_version(storage: &dyn Storage, entity: Entity, id: Id) -> i64 {
    let Some((table, _)) = storage.entity_table(entity) else {
        return UNTRACKED;
    };
    match find_id(storage.table_type(table), id, 0) {
        Some(index) if storage.has_column(table, index) => version(storage, table, index),
        Some(_) => row_version(storage, Some(table)),
        None => UNTRACKED,
    }
}
