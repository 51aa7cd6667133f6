//! Relationship traversal caches.
//!
//! Up traversal answers "which ancestor of this table provides the id", and
//! down traversal answers "which tables inherit the id from this entity".
//! Both walks are memoized. The memo is dropped wholesale whenever the storage
//! reports a new monitor or table generation.

use alloc::rc::Rc;
use alloc::vec::Vec;
use hashbrown::{HashMap, HashSet};
use quarry_core::{find_id, Entity, Id, Storage, TableId, WILDCARD};

/// Recursion limit for relationship walks; also breaks cycles.
pub const MAX_TRAVERSAL_DEPTH: u32 = 256;

/// Result of an upward walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpMatch {
    /// Ancestor entity that owns the id.
    pub src: Entity,
    /// Id as stored on the ancestor (resolved from a wildcard pattern).
    pub id: Id,
    /// Table of the ancestor when the walk was cached.
    pub table: TableId,
    /// Position of `id` in the ancestor table's type.
    pub column: usize,
}

/// A table reached by a downward walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownElem {
    pub table: TableId,
    /// The table owns the id itself, so the walk stopped here.
    pub leaf: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct UpKey {
    table: TableId,
    trav: Entity,
    id: Id,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct DownKey {
    trav: Entity,
    entity: Entity,
    id: Id,
}

/// Memoized up and down relationship walks.
#[derive(Default)]
pub struct TraversalCache {
    monitor_generation: u64,
    table_generation: u64,
    up: HashMap<UpKey, Option<UpMatch>>,
    down: HashMap<DownKey, Rc<Vec<DownElem>>>,
}

impl TraversalCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every memoized walk if the storage changed generation.
    pub fn validate(&mut self, storage: &dyn Storage) {
        let monitor = storage.monitor_generation();
        let tables = storage.table_generation();
        if monitor != self.monitor_generation || tables != self.table_generation {
            tracing::trace!(monitor, tables, "traversal cache invalidated");
            self.clear();
            self.monitor_generation = monitor;
            self.table_generation = tables;
        }
    }

    /// Drops every memoized walk.
    pub fn clear(&mut self) {
        self.up.clear();
        self.down.clear();
    }

    /// Returns the number of memoized up and down walks.
    pub fn len(&self) -> (usize, usize) {
        (self.up.len(), self.down.len())
    }

    /// Finds the nearest ancestor of `table` (through `trav`) that owns an id
    /// matching `id`. The table itself is not considered.
    pub fn up(
        &mut self,
        storage: &dyn Storage,
        table: TableId,
        trav: Entity,
        id: Id,
    ) -> Option<UpMatch> {
        self.validate(storage);
        self.up_inner(storage, table, trav, id, 0)
    }

    fn up_inner(
        &mut self,
        storage: &dyn Storage,
        table: TableId,
        trav: Entity,
        id: Id,
        depth: u32,
    ) -> Option<UpMatch> {
        let key = UpKey { table, trav, id };
        if let Some(cached) = self.up.get(&key) {
            match cached {
                // The ancestor may have moved to another table since.
                Some(m) if storage.entity_table(m.src).map(|r| r.0) != Some(m.table) => {}
                _ => return *cached,
            }
        }
        if depth >= MAX_TRAVERSAL_DEPTH {
            return None;
        }

        let mut result = None;
        let ty = storage.table_type(table);
        let pattern = Id::pair(trav, WILDCARD);
        let mut start = 0;
        while let Some(index) = find_id(ty, pattern, start) {
            start = index + 1;
            let parent = ty[index].second();
            let Some((parent_table, _)) = storage.entity_table(parent) else {
                continue;
            };
            let parent_ty = storage.table_type(parent_table);
            if let Some(column) = find_id(parent_ty, id, 0) {
                result = Some(UpMatch {
                    src: parent,
                    id: parent_ty[column],
                    table: parent_table,
                    column,
                });
                break;
            }
            if let Some(found) = self.up_inner(storage, parent_table, trav, id, depth + 1) {
                result = Some(found);
                break;
            }
        }

        self.up.insert(key, result);
        result
    }

    /// Lists the tables that inherit `id` from `entity` through `trav`.
    ///
    /// Recursion stops at tables that own the id themselves (leaves): their
    /// descendants inherit from them instead.
    pub fn down(
        &mut self,
        storage: &dyn Storage,
        trav: Entity,
        entity: Entity,
        id: Id,
    ) -> Rc<Vec<DownElem>> {
        self.validate(storage);
        let key = DownKey { trav, entity, id };
        if let Some(elems) = self.down.get(&key) {
            return elems.clone();
        }
        let mut elems = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(entity);
        collect_down(storage, trav, entity, id, &mut elems, &mut visited, 0);
        let elems = Rc::new(elems);
        self.down.insert(key, elems.clone());
        elems
    }
}

fn collect_down(
    storage: &dyn Storage,
    trav: Entity,
    entity: Entity,
    id: Id,
    out: &mut Vec<DownElem>,
    visited: &mut HashSet<Entity>,
    depth: u32,
) {
    if depth >= MAX_TRAVERSAL_DEPTH {
        return;
    }
    for &table in storage.tables_with(Id::pair(trav, entity)) {
        let leaf = find_id(storage.table_type(table), id, 0).is_some();
        out.push(DownElem { table, leaf });
        if leaf {
            continue;
        }
        for &child in storage.table_entities(table) {
            if storage.is_traversable(child) && visited.insert(child) {
                collect_down(storage, trav, child, id, out, visited, depth + 1);
            }
        }
    }
}

/// Returns the number of `rel` hops from `table` to a table without a `rel`
/// pair. Follows the first pair at every level.
pub fn relation_depth(storage: &dyn Storage, rel: Entity, table: TableId) -> u32 {
    let pattern = Id::pair(rel, WILDCARD);
    let mut depth = 0;
    let mut current = table;
    while depth < MAX_TRAVERSAL_DEPTH {
        let ty = storage.table_type(current);
        let Some(index) = find_id(ty, pattern, 0) else {
            break;
        };
        depth += 1;
        match storage.entity_table(ty[index].second()) {
            Some((parent, _)) => current = parent,
            None => break,
        }
    }
    depth
}
