//! The world: entity records, archetype tables and structural events.
//!
//! `World` is a compact reference store implementing [`Storage`]. Every
//! structural change (an entity moving between tables, a table being created
//! or deleted) is appended to an event queue that the owner drains and
//! forwards to query caches.

use crate::table::Table;
use alloc::vec;
use alloc::vec::Vec;
use hashbrown::{HashMap, HashSet};
use quarry_core::{
    Entity, Error, Event, Id, Result, Storage, TableId, Value, CHILD_OF, FIRST_USER_ENTITY, IS_A,
    WILDCARD,
};

/// Table id of the root table, which holds entities without any ids.
pub const ROOT_TABLE: TableId = 0;

/// Recursion guard for hierarchy deletion.
const MAX_DEPTH: usize = 256;

/// Location of an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    /// Table holding the entity.
    pub table: TableId,
    /// Row inside the table.
    pub row: usize,
}

/// In-memory entity/component store.
pub struct World {
    records: HashMap<Entity, Record>,
    next_entity: Entity,
    /// Ids whose values are stored in columns. Pairs use their relationship.
    components: HashSet<Entity>,
    /// Relationships whose targets become traversable.
    traversable_rels: HashSet<Entity>,
    traversable: HashSet<Entity>,
    tables: Vec<Option<Table>>,
    live: Vec<TableId>,
    type_index: HashMap<Vec<Id>, TableId>,
    id_index: HashMap<Id, Vec<TableId>>,
    monitors: HashMap<Id, u32>,
    monitor_generation: u64,
    table_generation: u64,
    events: Vec<Event>,
}

impl World {
    /// Creates a world holding only the root table.
    pub fn new() -> Self {
        let mut traversable_rels = HashSet::new();
        traversable_rels.insert(CHILD_OF);
        traversable_rels.insert(IS_A);
        Self {
            records: HashMap::new(),
            next_entity: FIRST_USER_ENTITY,
            components: HashSet::new(),
            traversable_rels,
            traversable: HashSet::new(),
            tables: vec![Some(Table::new(ROOT_TABLE, Vec::new(), &[]))],
            live: vec![ROOT_TABLE],
            type_index: HashMap::new(),
            id_index: HashMap::new(),
            monitors: HashMap::new(),
            monitor_generation: 0,
            table_generation: 0,
            events: Vec::new(),
        }
    }

    /// Creates a new entity in the root table.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.next_entity;
        self.next_entity += 1;
        let was_empty = self.table_len(ROOT_TABLE) == 0;
        let row = match self.table_mut(ROOT_TABLE) {
            Some(root) => root.push(entity, Vec::new()),
            None => 0,
        };
        if was_empty {
            self.events.push(Event::TableFill(ROOT_TABLE));
        }
        self.records.insert(entity, Record { table: ROOT_TABLE, row });
        entity
    }

    /// Creates an entity that can be used as a data-carrying component.
    pub fn component(&mut self) -> Entity {
        let entity = self.spawn();
        self.components.insert(entity);
        entity
    }

    /// Creates an entity that can be used as a tag or data-less relationship.
    pub fn tag(&mut self) -> Entity {
        self.spawn()
    }

    /// Marks a relationship as traversable: its targets can be walked by
    /// `up` terms.
    pub fn make_traversable(&mut self, rel: Entity) {
        self.traversable_rels.insert(rel);
    }

    /// Returns true if `entity` is alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.records.contains_key(&entity)
    }

    /// Returns the location of an entity.
    pub fn record(&self, entity: Entity) -> Option<Record> {
        self.records.get(&entity).copied()
    }

    /// Returns a table by id.
    pub fn table(&self, table: TableId) -> Option<&Table> {
        self.tables.get(table as usize)?.as_ref()
    }

    /// Returns the number of live tables, including the root table.
    pub fn live_table_count(&self) -> usize {
        self.live.len()
    }

    /// Returns true if the entity has an id matching `id`.
    pub fn has(&self, entity: Entity, id: impl Into<Id>) -> bool {
        let id = id.into();
        self.record(entity)
            .and_then(|r| self.table(r.table))
            .map(|t| quarry_core::find_id(t.ty(), id, 0).is_some())
            .unwrap_or(false)
    }

    /// Returns the value of a component.
    pub fn get(&self, entity: Entity, id: impl Into<Id>) -> Option<&Value> {
        let id = id.into();
        let record = self.record(entity)?;
        let table = self.table(record.table)?;
        let index = table.type_index(id)?;
        table.column(index)?.get(record.row)
    }

    /// Adds an id to an entity. Data-carrying ids start out as Null.
    pub fn add(&mut self, entity: Entity, id: impl Into<Id>) -> Result<()> {
        let id = id.into();
        let record = self.live_record(entity)?;
        if !id.is_valid() || id.is_wildcard() {
            return Err(Error::invalid_operation("cannot add an invalid or wildcard id"));
        }
        let ty = self.table_ty(record.table);
        if ty.binary_search(&id).is_ok() {
            return Ok(());
        }
        let mut new_ty = ty;
        new_ty.push(id);
        new_ty.sort();
        self.move_entity(entity, new_ty)?;

        if id.is_pair() && self.traversable_rels.contains(&id.first()) {
            self.mark_traversable(id.second());
        }
        self.notify_monitors(entity, id);
        Ok(())
    }

    /// Sets the value of a data-carrying id, adding it when missing.
    pub fn set(&mut self, entity: Entity, id: impl Into<Id>, value: impl Into<Value>) -> Result<()> {
        self.write(entity, id.into(), value.into(), false)
    }

    /// Overwrites a value without bumping the column's write version, so
    /// change detection does not observe it.
    pub fn set_silent(
        &mut self,
        entity: Entity,
        id: impl Into<Id>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.write(entity, id.into(), value.into(), true)
    }

    /// Removes an id from an entity.
    pub fn remove(&mut self, entity: Entity, id: impl Into<Id>) -> Result<()> {
        let id = id.into();
        let record = self.live_record(entity)?;
        let mut ty = self.table_ty(record.table);
        let before = ty.len();
        ty.retain(|e| !id.matches(*e));
        if ty.len() == before {
            return Ok(());
        }
        self.move_entity(entity, ty)?;
        self.notify_monitors(entity, id);
        Ok(())
    }

    /// Deletes an entity. Children (`(ChildOf, entity)`) are deleted too.
    pub fn delete(&mut self, entity: Entity) -> Result<()> {
        self.delete_recursive(entity, 0)
    }

    fn delete_recursive(&mut self, entity: Entity, depth: usize) -> Result<()> {
        self.live_record(entity)?;
        if depth < MAX_DEPTH && self.traversable.contains(&entity) {
            let children: Vec<Entity> = self
                .tables_with(Id::pair(CHILD_OF, entity))
                .iter()
                .filter_map(|t| self.table(*t))
                .flat_map(|t| t.entities().iter().copied())
                .collect();
            for child in children {
                self.delete_recursive(child, depth + 1)?;
            }
        }

        let record = self.live_record(entity)?;
        self.detach(entity, record);
        self.records.remove(&entity);
        self.components.remove(&entity);

        if self.traversable.remove(&entity) {
            self.table_generation += 1;
            if !self.monitors.is_empty() {
                self.monitor_generation += 1;
            }
        }
        Ok(())
    }

    /// Returns the table with exactly the given ids, creating it if needed.
    pub fn ensure_table(&mut self, ids: &[Id]) -> TableId {
        let mut ty = ids.to_vec();
        ty.sort();
        ty.dedup();
        if ty.is_empty() {
            return ROOT_TABLE;
        }
        if let Some(table) = self.type_index.get(&ty) {
            return *table;
        }

        let id = self.tables.len() as TableId;
        let data: Vec<bool> = ty.iter().map(|i| self.components.contains(&i.first())).collect();

        let mut keys = Vec::with_capacity(ty.len() * 4);
        for tid in &ty {
            keys.push(*tid);
            keys.push(Id::WILDCARD);
            if tid.is_pair() {
                keys.push(Id::pair(tid.first(), WILDCARD));
                keys.push(Id::pair(WILDCARD, tid.second()));
                keys.push(Id::pair(WILDCARD, WILDCARD));
            }
        }
        keys.sort();
        keys.dedup();
        for key in keys {
            self.id_index.entry(key).or_default().push(id);
        }

        self.type_index.insert(ty.clone(), id);
        self.tables.push(Some(Table::new(id, ty, &data)));
        self.live.push(id);
        self.table_generation += 1;
        self.events.push(Event::TableCreate(id));
        id
    }

    /// Deletes an empty table.
    pub fn delete_table(&mut self, table: TableId) -> Result<()> {
        if table == ROOT_TABLE {
            return Err(Error::invalid_operation("cannot delete the root table"));
        }
        let slot = self
            .tables
            .get_mut(table as usize)
            .ok_or_else(|| Error::invalid_operation("unknown table"))?;
        match slot {
            Some(t) if !t.is_empty() => {
                return Err(Error::invalid_operation("cannot delete a table that has entities"));
            }
            None => return Err(Error::invalid_operation("unknown table")),
            Some(_) => {}
        }
        let removed = slot.take();
        if let Some(t) = removed {
            self.type_index.remove(t.ty());
            for list in self.id_index.values_mut() {
                list.retain(|x| *x != table);
            }
            self.id_index.retain(|_, list| !list.is_empty());
        }
        self.live.retain(|x| *x != table);
        self.table_generation += 1;
        self.events.push(Event::TableDelete(table));
        Ok(())
    }

    /// Deletes every empty table except the root. Returns how many were deleted.
    pub fn delete_empty_tables(&mut self) -> usize {
        let empty: Vec<TableId> = self
            .live
            .iter()
            .copied()
            .filter(|t| *t != ROOT_TABLE && self.table_len(*t) == 0)
            .collect();
        let mut deleted = 0;
        for table in empty {
            if self.delete_table(table).is_ok() {
                deleted += 1;
            }
        }
        deleted
    }

    /// Takes the queued structural events.
    pub fn drain_events(&mut self) -> Vec<Event> {
        core::mem::take(&mut self.events)
    }

    /// Returns the queued structural events without taking them.
    pub fn pending_events(&self) -> &[Event] {
        &self.events
    }

    /// Returns the number of registrations for an exact monitor id.
    pub fn monitor_count(&self, id: Id) -> u32 {
        self.monitors.get(&id).copied().unwrap_or(0)
    }

    fn live_record(&self, entity: Entity) -> Result<Record> {
        self.record(entity).ok_or_else(|| Error::entity_not_found(entity))
    }

    fn table_mut(&mut self, table: TableId) -> Option<&mut Table> {
        self.tables.get_mut(table as usize)?.as_mut()
    }

    fn table_len(&self, table: TableId) -> usize {
        self.table(table).map(|t| t.len()).unwrap_or(0)
    }

    fn table_ty(&self, table: TableId) -> Vec<Id> {
        self.table(table).map(|t| t.ty().to_vec()).unwrap_or_default()
    }

    fn write(&mut self, entity: Entity, id: Id, value: Value, silent: bool) -> Result<()> {
        let has_data = !id.is_wildcard() && self.components.contains(&id.first());
        if !has_data {
            return Err(Error::invalid_operation("id does not carry data"));
        }
        if !self.has(entity, id) {
            self.add(entity, id)?;
        }
        let record = self.live_record(entity)?;
        let table = self
            .table_mut(record.table)
            .ok_or_else(|| Error::internal("entity record points at a deleted table"))?;
        let index = table
            .type_index(id)
            .ok_or_else(|| Error::component_not_found(entity, id))?;
        if table.write(record.row, index, value, silent) {
            Ok(())
        } else {
            Err(Error::component_not_found(entity, id))
        }
    }

    /// Removes an entity from its table, fixing up the row of the entity that
    /// was swapped into its place.
    fn detach(&mut self, entity: Entity, record: Record) -> Vec<(Id, Value)> {
        let Some(table) = self.table_mut(record.table) else {
            return Vec::new();
        };
        let (values, moved) = table.swap_remove(record.row);
        let now_empty = table.is_empty();
        debug_assert!(moved != Some(entity));
        if let Some(moved) = moved {
            if let Some(r) = self.records.get_mut(&moved) {
                r.row = record.row;
            }
        }
        if now_empty {
            self.events.push(Event::TableEmpty(record.table));
        }
        values
    }

    fn move_entity(&mut self, entity: Entity, ty: Vec<Id>) -> Result<()> {
        let record = self.live_record(entity)?;
        let dst = self.ensure_table(&ty);
        if dst == record.table {
            return Ok(());
        }
        let values = self.detach(entity, record);
        let table = self
            .table_mut(dst)
            .ok_or_else(|| Error::internal("destination table missing"))?;
        let was_empty = table.is_empty();
        let row = table.push(entity, values);
        if was_empty {
            self.events.push(Event::TableFill(dst));
        }
        self.records.insert(entity, Record { table: dst, row });
        Ok(())
    }

    fn mark_traversable(&mut self, entity: Entity) {
        if self.traversable.insert(entity) {
            self.table_generation += 1;
        }
    }

    fn notify_monitors(&mut self, entity: Entity, changed: Id) {
        if !self.traversable.contains(&entity) {
            return;
        }
        if self.monitors.keys().any(|m| m.matches(changed) || changed.matches(*m)) {
            self.monitor_generation += 1;
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for World {
    fn tables(&self) -> &[TableId] {
        &self.live
    }

    fn tables_with(&self, id: Id) -> &[TableId] {
        self.id_index.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn table_type(&self, table: TableId) -> &[Id] {
        self.table(table).map(|t| t.ty()).unwrap_or(&[])
    }

    fn table_count(&self, table: TableId) -> usize {
        self.table_len(table)
    }

    fn table_entities(&self, table: TableId) -> &[Entity] {
        self.table(table).map(|t| t.entities()).unwrap_or(&[])
    }

    fn column(&self, table: TableId, type_index: usize) -> Option<&[Value]> {
        self.table(table)?.column(type_index)
    }

    fn dirty_state(&self, table: TableId) -> &[u32] {
        self.table(table).map(|t| t.dirty_state()).unwrap_or(&[])
    }

    fn entity_table(&self, entity: Entity) -> Option<(TableId, usize)> {
        self.record(entity).map(|r| (r.table, r.row))
    }

    fn is_traversable(&self, entity: Entity) -> bool {
        self.traversable.contains(&entity)
    }

    fn monitor_generation(&self) -> u64 {
        self.monitor_generation
    }

    fn table_generation(&self) -> u64 {
        self.table_generation
    }

    fn register_monitor(&mut self, id: Id) {
        *self.monitors.entry(id).or_insert(0) += 1;
    }

    fn unregister_monitor(&mut self, id: Id) {
        if let Some(count) = self.monitors.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.monitors.remove(&id);
            }
        }
    }

    fn mark_dirty(&mut self, table: TableId, type_index: usize) {
        if let Some(t) = self.table_mut(table) {
            t.mark_dirty(type_index);
        }
    }

    fn has_column(&self, table: TableId, type_index: usize) -> bool {
        self.table(table).map(|t| t.has_data(type_index)).unwrap_or(false)
    }

    fn has_table(&self, table: TableId) -> bool {
        self.table(table).is_some()
    }
}
