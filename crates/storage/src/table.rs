//! Archetype tables.
//!
//! A table stores every entity that has exactly the same set of ids. Each id
//! that carries data owns one column; tags have no column.

use alloc::vec;
use alloc::vec::Vec;
use quarry_core::{Entity, Id, TableId, Value};

/// Columnar storage for one archetype.
#[derive(Debug)]
pub struct Table {
    id: TableId,
    ty: Vec<Id>,
    entities: Vec<Entity>,
    /// One slot per type entry; None for tags.
    columns: Vec<Option<Vec<Value>>>,
    /// Slot 0 counts row changes, slot 1 + i counts writes to column i.
    dirty: Vec<u32>,
}

impl Table {
    /// Creates an empty table. `data[i]` tells whether `ty[i]` carries data.
    pub fn new(id: TableId, ty: Vec<Id>, data: &[bool]) -> Self {
        debug_assert_eq!(ty.len(), data.len());
        let columns = data
            .iter()
            .map(|has_data| if *has_data { Some(Vec::new()) } else { None })
            .collect();
        let dirty = vec![0; ty.len() + 1];
        Self {
            id,
            ty,
            entities: Vec::new(),
            columns,
            dirty,
        }
    }

    /// Returns the table id.
    #[inline]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Returns the sorted table type.
    #[inline]
    pub fn ty(&self) -> &[Id] {
        &self.ty
    }

    /// Returns the entities in row order.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns the number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the table has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the position of `id` in the table type.
    pub fn type_index(&self, id: Id) -> Option<usize> {
        self.ty.binary_search(&id).ok()
    }

    /// Returns the column at `index`, if the id there carries data.
    pub fn column(&self, index: usize) -> Option<&[Value]> {
        self.columns.get(index)?.as_deref()
    }

    /// Returns true if the id at `index` carries data.
    pub fn has_data(&self, index: usize) -> bool {
        matches!(self.columns.get(index), Some(Some(_)))
    }

    /// Returns the write-version counters.
    #[inline]
    pub fn dirty_state(&self) -> &[u32] {
        &self.dirty
    }

    /// Appends a row and returns its index. Missing values default to Null.
    pub(crate) fn push(&mut self, entity: Entity, mut values: Vec<(Id, Value)>) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        for (i, column) in self.columns.iter_mut().enumerate() {
            if let Some(column) = column {
                let id = self.ty[i];
                let value = values
                    .iter()
                    .position(|(vid, _)| *vid == id)
                    .map(|pos| values.swap_remove(pos).1)
                    .unwrap_or(Value::Null);
                column.push(value);
            }
        }
        self.dirty[0] = self.dirty[0].wrapping_add(1);
        row
    }

    /// Removes a row by swapping the last row into its place.
    ///
    /// Returns the values of the removed row and the entity that moved into
    /// `row`, if any.
    pub(crate) fn swap_remove(&mut self, row: usize) -> (Vec<(Id, Value)>, Option<Entity>) {
        self.entities.swap_remove(row);
        let mut values = Vec::new();
        for (i, column) in self.columns.iter_mut().enumerate() {
            if let Some(column) = column {
                values.push((self.ty[i], column.swap_remove(row)));
            }
        }
        self.dirty[0] = self.dirty[0].wrapping_add(1);
        (values, self.entities.get(row).copied())
    }

    /// Bumps the version of a data column. Returns false for tags.
    pub(crate) fn mark_dirty(&mut self, index: usize) -> bool {
        if !self.has_data(index) {
            return false;
        }
        self.dirty[index + 1] = self.dirty[index + 1].wrapping_add(1);
        true
    }

    /// Overwrites a value. Bumps the column version unless `silent`.
    pub(crate) fn write(&mut self, row: usize, index: usize, value: Value, silent: bool) -> bool {
        match self.columns.get_mut(index) {
            Some(Some(column)) if row < column.len() => {
                column[row] = value;
                if !silent {
                    self.dirty[index + 1] = self.dirty[index + 1].wrapping_add(1);
                }
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(1, vec![Id::new(20), Id::new(21)], &[true, false])
    }

    #[test]
    fn test_table_push_and_remove() {
        let mut t = table();
        assert!(t.is_empty());

        t.push(100, vec![(Id::new(20), Value::Int64(1))]);
        t.push(101, vec![(Id::new(20), Value::Int64(2))]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.column(0).unwrap()[1], Value::Int64(2));
        assert!(t.column(1).is_none());

        let (values, moved) = t.swap_remove(0);
        assert_eq!(values, vec![(Id::new(20), Value::Int64(1))]);
        assert_eq!(moved, Some(101));
        assert_eq!(t.entities(), &[101]);
        assert_eq!(t.dirty_state()[0], 3);
    }

    #[test]
    fn test_table_write_versions() {
        let mut t = table();
        t.push(100, Vec::new());
        assert_eq!(t.column(0).unwrap()[0], Value::Null);

        assert!(t.write(0, 0, Value::Int64(5), false));
        assert_eq!(t.dirty_state()[1], 1);

        assert!(t.write(0, 0, Value::Int64(6), true));
        assert_eq!(t.dirty_state()[1], 1);
        assert_eq!(t.column(0).unwrap()[0], Value::Int64(6));

        // tags have no column
        assert!(!t.write(0, 1, Value::Int64(1), false));
    }

    #[test]
    fn test_table_mark_dirty() {
        let mut t = table();
        t.push(100, Vec::new());
        assert!(t.mark_dirty(0));
        assert!(t.mark_dirty(0));
        assert_eq!(t.dirty_state(), &[1, 2, 0]);
        assert!(!t.mark_dirty(1));
        assert!(!t.mark_dirty(5));
    }
}
