//! The storage contract consumed by the query engine.
//!
//! Tables are owned by the storage layer. The query engine only reads them
//! through [`Storage`] and learns about structural changes through [`Event`]s
//! delivered by whoever drives the storage (usually a registry that drains the
//! storage's event queue after a batch of mutations).

use crate::id::{Entity, Id};
use crate::value::Value;

/// Identifier of a table. Table ids are never reused.
pub type TableId = u32;

/// Structural notification delivered to query caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A table was created. It may or may not already contain entities.
    TableCreate(TableId),
    /// A table lost its last entity.
    TableEmpty(TableId),
    /// A table received its first entity.
    TableFill(TableId),
    /// A table was deleted.
    TableDelete(TableId),
    /// Relationship inheritance may have changed; re-evaluate every table.
    Rematch,
}

/// Read access to archetype storage plus the hooks the query cache needs.
///
/// Dirty state layout: slot 0 counts row additions/removals of a table, slot
/// `1 + i` counts writes to the column of the `i`-th id of the table type.
pub trait Storage {
    /// Returns every live table in creation order.
    fn tables(&self) -> &[TableId];

    /// Returns the tables whose type contains an id matching `id`.
    ///
    /// Wildcard patterns are answered from the storage's wildcard index.
    fn tables_with(&self, id: Id) -> &[TableId];

    /// Returns the sorted type of a table, or an empty slice for an unknown table.
    fn table_type(&self, table: TableId) -> &[Id];

    /// Returns the number of entities stored in a table.
    fn table_count(&self, table: TableId) -> usize;

    /// Returns the entities stored in a table, in row order.
    fn table_entities(&self, table: TableId) -> &[Entity];

    /// Returns the column for the id at `type_index`, or None for tags.
    fn column(&self, table: TableId, type_index: usize) -> Option<&[Value]>;

    /// Returns the write-version counters of a table.
    fn dirty_state(&self, table: TableId) -> &[u32];

    /// Returns the table and row of a live entity.
    fn entity_table(&self, entity: Entity) -> Option<(TableId, usize)>;

    /// Returns true if the entity is the target of a traversable relationship.
    fn is_traversable(&self, entity: Entity) -> bool;

    /// Bumped whenever a monitored id changes on a traversable entity.
    fn monitor_generation(&self) -> u64;

    /// Bumped whenever a table is created or deleted, or an entity becomes traversable.
    fn table_generation(&self) -> u64;

    /// Starts watching an id (pattern) for changes on traversable entities.
    fn register_monitor(&mut self, id: Id);

    /// Stops watching an id previously passed to `register_monitor`.
    fn unregister_monitor(&mut self, id: Id);

    /// Bumps the write version of the column at `type_index`. Tags and
    /// unknown tables are ignored.
    fn mark_dirty(&mut self, table: TableId, type_index: usize);

    /// Returns true if the column at `type_index` stores data.
    fn has_column(&self, table: TableId, type_index: usize) -> bool {
        self.column(table, type_index).is_some()
    }

    /// Returns true if the table is live.
    fn has_table(&self, table: TableId) -> bool {
        self.tables().contains(&table)
    }

    /// Returns true if the entity is alive.
    fn is_alive(&self, entity: Entity) -> bool {
        self.entity_table(entity).is_some()
    }
}
