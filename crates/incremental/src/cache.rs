//! The query cache.
//!
//! A cache evaluates its query once at build time and afterwards only reacts
//! to storage events. Fixed-source terms are split off: the cache indexes
//! the remaining terms (always matching empty tables so that emptiness can
//! be toggled without re-evaluation) and checks fixed terms once per
//! iteration.

use crate::arena::{Arena, MatchId};
use crate::desc::{CacheDesc, GroupBy, OrderSpec};
use crate::group::{is_descending, CascadePolicy, GroupId, GroupInfo, GroupPolicy, RelationTargetPolicy};
use crate::iter::{CacheIter, FixedField};
use crate::list::MatchList;
use crate::matches::{Match, MatchPools, StorageColumn};
use crate::monitor;
use crate::sort::{self, OrderBy, SortedView};
use crate::table_index::{TableIndex, TableRecord};
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use hashbrown::HashMap;
use quarry_core::{find_id, Error, Event, Id, Result, Storage, TableId, IS_A, WILDCARD};
use quarry_query::{compile, InOut, Oper, Plan, PlanIter, Query, QueryDesc, QueryResult, Source, TraversalCache};

/// An incrementally maintained index of the tables matching a query.
pub struct QueryCache {
    pub(crate) query: Query,
    /// Plan over the cacheable terms only.
    pub(crate) plan: Plan,
    /// Cached field to public field.
    pub(crate) field_map: Vec<usize>,
    /// Public field to cached field.
    pub(crate) cached_field: Vec<Option<usize>>,
    /// Public fields with a fixed source.
    pub(crate) fixed_fields: Vec<usize>,
    pub(crate) arena: Arena<Match>,
    pools: MatchPools,
    pub(crate) tables: TableIndex,
    pub(crate) list: MatchList,
    policy: Option<Box<dyn GroupPolicy>>,
    pub(crate) order_by: Option<OrderBy>,
    pub(crate) view: SortedView,
    /// `list.match_count` at the last merge.
    pub(crate) view_match_count: Option<u64>,
    trav: TraversalCache,
    monitors: Vec<Id>,
    monitor_generation: u64,
    rematch_count: u64,
    pub(crate) singleton: Option<MatchId>,
    pub(crate) yield_empty: bool,
    detect_changes: bool,
    tracked: u64,
    /// Cached fields written through shared sources, only when explicit.
    shared_writes: u64,
    fixed_monitor: Vec<i64>,
    prev_match_count: u64,
}

impl QueryCache {
    /// Builds a cache and indexes every table currently matching the query.
    ///
    /// Fails without touching storage when the descriptor is invalid.
    pub fn build(storage: &mut dyn Storage, desc: impl Into<CacheDesc>) -> Result<Self> {
        let CacheDesc {
            query: query_desc,
            mut group_by,
            mut order_by,
        } = desc.into();

        let query = Query::new(query_desc.clone())?;
        let terms = query.terms();

        let mut cached = QueryDesc::new().match_empty_tables(true);
        let mut field_map = Vec::new();
        let mut cached_field = vec![None; terms.len()];
        let mut fixed_fields = Vec::new();
        for (i, term) in terms.iter().enumerate() {
            if let Source::Entity(_) = term.src {
                fixed_fields.push(i);
                continue;
            }
            if term.inout == InOut::Filter {
                return Err(Error::invalid_term(i, "invalid usage of Filter for a cached query"));
            }
            cached_field[i] = Some(field_map.len());
            field_map.push(i);
            cached = cached.term(term.clone());
        }
        let plan = compile(&cached)?;

        if order_by.len() > 1 {
            return Err(Error::invalid_order_by(None, "a cache can only be ordered once"));
        }
        let order_by = match order_by.pop() {
            None => None,
            Some(spec) => Some(validate_order_by(&plan, spec)?),
        };

        if group_by.len() > 1 {
            return Err(Error::invalid_group_by("a cache can only be grouped once"));
        }
        let cascade = plan.cascade_field().and_then(|f| plan.terms()[f].traversal());
        let mut descending = false;
        let policy: Option<Box<dyn GroupPolicy>> = match (cascade, group_by.pop()) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_group_by("cannot combine a cascade term with group_by"));
            }
            (Some(trav), None) => {
                descending = is_descending(trav.cascade);
                Some(Box::new(CascadePolicy::new(trav.rel)))
            }
            (None, Some(GroupBy::Relation(rel))) => {
                if rel == 0 || rel == WILDCARD {
                    return Err(Error::invalid_group_by("group_by requires a relationship"));
                }
                Some(Box::new(RelationTargetPolicy::new(rel)))
            }
            (None, Some(GroupBy::Policy(policy))) => Some(policy),
            (None, None) => None,
        };

        let mut monitors = Vec::new();
        for term in terms {
            match &term.src {
                Source::Up(trav) => {
                    monitors.push(Id::pair(trav.rel, WILDCARD));
                    if trav.rel != IS_A {
                        monitors.push(Id::pair(IS_A, WILDCARD));
                    }
                    monitors.push(term.id);
                }
                Source::Entity(_) => monitors.push(term.id),
                _ => {}
            }
        }
        for id in &monitors {
            storage.register_monitor(*id);
        }

        let field_count = plan.field_count();
        let shared_writes = plan
            .terms()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.oper != Oper::Not && is_explicit_write(t.inout))
            .fold(0u64, |mask, (i, _)| mask | 1 << i);

        let yield_empty = query_desc.matches_empty_tables() && order_by.is_none();
        let mut cache = Self {
            tracked: plan.read_fields(),
            shared_writes,
            fixed_monitor: vec![monitor::UNTRACKED; fixed_fields.len()],
            query,
            plan,
            field_map,
            cached_field,
            fixed_fields,
            arena: Arena::new(),
            pools: MatchPools::new(field_count),
            tables: TableIndex::new(),
            list: MatchList::new(descending),
            policy,
            order_by,
            view: SortedView::default(),
            view_match_count: None,
            trav: TraversalCache::new(),
            monitors,
            monitor_generation: storage.monitor_generation(),
            rematch_count: 0,
            singleton: None,
            yield_empty,
            detect_changes: query_desc.detects_changes(),
            prev_match_count: 0,
        };

        if field_count == 0 {
            let mut m = cache.pools.alloc(None, 0, cache.detect_changes);
            m.bind(&*storage, &QueryResult::default());
            let id = cache.arena.insert(m);
            cache.list.insert(&mut cache.arena, id, &mut cache.policy);
            cache.singleton = Some(id);
        } else {
            for result in cache.evaluate(&*storage, None) {
                if let Some(table) = result.table {
                    cache.add_result(&*storage, table, &result);
                }
            }
        }
        cache.refresh_sort(&*storage);

        tracing::debug!(
            fields = field_count,
            fixed = cache.fixed_fields.len(),
            tables = cache.tables.len(),
            matches = cache.arena.len(),
            "query cache built"
        );
        cache.sanitize();
        Ok(cache)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Applies a storage event.
    pub fn notify(&mut self, storage: &dyn Storage, event: Event) {
        match event {
            Event::TableCreate(table) => self.on_create(storage, table),
            Event::TableEmpty(table) => self.on_emptiness(table, true),
            Event::TableFill(table) => self.on_emptiness(table, false),
            Event::TableDelete(table) => {
                if self.remove_table(table) {
                    tracing::trace!(table, "table unmatched");
                } else {
                    tracing::trace!(table, "ignoring delete of an unmatched table");
                }
            }
            Event::Rematch => self.rematch(storage),
        }
        self.sanitize();
    }

    fn on_create(&mut self, storage: &dyn Storage, table: TableId) {
        if self.singleton.is_some() {
            return;
        }
        if self.tables.contains(table) {
            tracing::warn!(table, "table created twice");
            return;
        }
        if !storage.has_table(table) {
            tracing::trace!(table, "ignoring create of a deleted table");
            return;
        }
        let results = self.evaluate(storage, Some(table));
        for result in &results {
            self.add_result(storage, table, result);
        }
        tracing::trace!(table, matches = results.len(), "table matched");
    }

    fn on_emptiness(&mut self, table: TableId, empty: bool) {
        if !self.tables.set_empty(table, empty) {
            tracing::trace!(table, empty, "emptiness unchanged or table not matched");
            return;
        }
        tracing::trace!(table, empty, "table emptiness changed");
        if self.yield_empty {
            return;
        }
        let mut cur = self.tables.get(table).and_then(|r| r.first);
        while let Some(id) = cur {
            cur = self.arena.get(id).and_then(|m| m.next_match);
            if empty {
                self.list.remove(&mut self.arena, id, &mut self.policy);
            } else if self.arena.get(id).map(|m| !m.linked).unwrap_or(false) {
                self.list.insert(&mut self.arena, id, &mut self.policy);
            }
        }
    }

    /// Re-evaluates every table if relationship inheritance may have changed.
    ///
    /// Existing matches are rebound in place, so match handles survive.
    fn rematch(&mut self, storage: &dyn Storage) {
        let generation = storage.monitor_generation();
        if generation == self.monitor_generation {
            return;
        }
        self.monitor_generation = generation;
        if self.singleton.is_some() {
            return;
        }

        self.rematch_count += 1;
        let rematch_count = self.rematch_count;
        let results = self.evaluate(storage, None);

        // last match reused for each table seen in this pass
        let mut cursor: HashMap<TableId, MatchId> = HashMap::new();
        for result in &results {
            let Some(table) = result.table else {
                continue;
            };
            let next = match cursor.get(&table) {
                Some(prev) => self.arena.get(*prev).and_then(|m| m.next_match),
                None => self.tables.get_mut(table).and_then(|record| {
                    record.rematch_count = rematch_count;
                    record.first
                }),
            };
            let id = match next {
                Some(id) => {
                    self.rebind(storage, id, table, result);
                    id
                }
                None => self.add_result(storage, table, result),
            };
            cursor.insert(table, id);
        }

        for (table, last) in cursor {
            self.truncate(table, last);
        }

        let stale: Vec<TableId> = self
            .tables
            .tables()
            .filter(|t| self.tables.get(*t).map(|r| r.rematch_count != rematch_count).unwrap_or(false))
            .collect();
        for table in &stale {
            self.remove_table(*table);
        }

        tracing::debug!(
            pass = rematch_count,
            results = results.len(),
            purged = stale.len(),
            "query cache rematched"
        );
    }

    // -----------------------------------------------------------------------
    // Match bookkeeping
    // -----------------------------------------------------------------------

    fn evaluate(&mut self, storage: &dyn Storage, table: Option<TableId>) -> Vec<QueryResult> {
        let mut it = match table {
            Some(table) => PlanIter::with_table(&self.plan, table),
            None => PlanIter::new(&self.plan),
        };
        let mut out = Vec::new();
        while it.next(storage, &mut self.trav) {
            out.push(it.result().clone());
        }
        out
    }

    fn group_of(&self, storage: &dyn Storage, table: TableId) -> GroupId {
        self.policy
            .as_ref()
            .map(|p| p.group_id(storage, table))
            .unwrap_or(0)
    }

    /// Appends a match to a table, creating the table record if needed.
    fn add_result(&mut self, storage: &dyn Storage, table: TableId, result: &QueryResult) -> MatchId {
        if !self.tables.contains(table) {
            let record = self.tables.insert(table, storage.table_count(table) == 0);
            record.rematch_count = self.rematch_count;
        }
        let group_id = self.group_of(storage, table);
        let mut m = self.pools.alloc(Some(table), group_id, self.detect_changes);
        m.bind(storage, result);
        let id = self.arena.insert(m);

        let mut link = self.yield_empty;
        if let Some(record) = self.tables.get_mut(table) {
            match record.last.and_then(|last| self.arena.get_mut(last)) {
                Some(last) => last.next_match = Some(id),
                None => record.first = Some(id),
            }
            record.last = Some(id);
            link |= !record.empty;
        }
        if link {
            self.list.insert(&mut self.arena, id, &mut self.policy);
        }
        id
    }

    /// Rebinds a reused match, moving it if its group changed.
    fn rebind(&mut self, storage: &dyn Storage, id: MatchId, table: TableId, result: &QueryResult) {
        let group_id = self.group_of(storage, table);
        let Some(m) = self.arena.get_mut(id) else {
            return;
        };
        m.bind(storage, result);
        if m.group_id == group_id {
            return;
        }
        if m.linked {
            self.list.remove(&mut self.arena, id, &mut self.policy);
            if let Some(m) = self.arena.get_mut(id) {
                m.group_id = group_id;
            }
            self.list.insert(&mut self.arena, id, &mut self.policy);
        } else {
            m.group_id = group_id;
        }
    }

    /// Frees every match of a table after `last`.
    fn truncate(&mut self, table: TableId, last: MatchId) {
        let mut cur = self.arena.get_mut(last).and_then(|m| m.next_match.take());
        while let Some(id) = cur {
            cur = self.arena.get(id).and_then(|m| m.next_match);
            self.free_match(id);
        }
        if let Some(record) = self.tables.get_mut(table) {
            record.last = Some(last);
        }
    }

    fn free_match(&mut self, id: MatchId) {
        self.list.remove(&mut self.arena, id, &mut self.policy);
        if let Some(m) = self.arena.remove(id) {
            self.pools.free(m);
        }
    }

    fn remove_table(&mut self, table: TableId) -> bool {
        let Some(record) = self.tables.remove(table) else {
            return false;
        };
        let mut cur = record.first;
        while let Some(id) = cur {
            cur = self.arena.get(id).and_then(|m| m.next_match);
            self.free_match(id);
        }
        true
    }

    // -----------------------------------------------------------------------
    // Iteration
    // -----------------------------------------------------------------------

    /// Applies a pending rematch and re-sorts, then iterates.
    pub fn iter<'a>(&'a mut self, storage: &'a dyn Storage) -> CacheIter<'a> {
        if storage.monitor_generation() != self.monitor_generation {
            self.rematch(storage);
        }
        self.refresh_sort(storage);
        self.sanitize();
        self.cached_iter(storage)
    }

    /// Iterates the cache as it is, without refreshing.
    ///
    /// A sorted cache falls back to list order if its sorted view is stale.
    pub fn cached_iter<'a>(&'a self, storage: &'a dyn Storage) -> CacheIter<'a> {
        let fixed = self.eval_fixed(storage);
        let sorted = self.order_by.is_some() && self.view_match_count == Some(self.list.match_count);
        CacheIter::new(self, storage, fixed, sorted)
    }

    fn refresh_sort(&mut self, storage: &dyn Storage) {
        let Some(order) = &self.order_by else {
            return;
        };
        let sorted = sort::sort_tables(storage, order, &self.arena, &mut self.tables);
        if sorted || self.view_match_count != Some(self.list.match_count) {
            self.view = sort::build_view(storage, order, &self.arena, &self.tables, &self.list);
            self.view_match_count = Some(self.list.match_count);
        }
    }

    /// Resolves fixed-source terms. None if a required term fails.
    fn eval_fixed(&self, storage: &dyn Storage) -> Option<Rc<[FixedField]>> {
        let terms = self.query.terms();
        let mut out = Vec::with_capacity(self.fixed_fields.len());
        for &field in &self.fixed_fields {
            let term = &terms[field];
            let Source::Entity(src) = term.src else {
                continue;
            };
            let found = storage.entity_table(src).and_then(|(table, _)| {
                let ty = storage.table_type(table);
                find_id(ty, term.id, 0).map(|column| (ty[column], column))
            });
            match (term.oper, found) {
                (Oper::And, None) | (Oper::Not, Some(_)) => return None,
                (_, Some((id, column))) => out.push(FixedField {
                    field,
                    id,
                    src,
                    column: Some(column),
                }),
                (_, None) => out.push(FixedField {
                    field,
                    id: term.id,
                    src,
                    column: None,
                }),
            }
        }
        Some(out.into())
    }

    /// Columns written through one match.
    ///
    /// Owned columns count for every write field. Shared columns count only
    /// when the term is explicitly `Out` or `InOut`.
    pub(crate) fn written_columns(&self, storage: &dyn Storage, id: MatchId, out: &mut Vec<(TableId, usize)>) {
        let Some(m) = self.arena.get(id) else {
            return;
        };
        let fields = self.plan.write_fields() & m.set_fields;
        for (local, column) in m.storage_columns.iter().enumerate() {
            if fields & (1 << local) == 0 {
                continue;
            }
            match column {
                StorageColumn::Owned(index) => {
                    if let Some(table) = m.table {
                        out.push((table, *index));
                    }
                }
                StorageColumn::Shared if self.shared_writes & (1 << local) != 0 => {
                    let src = storage.entity_table(m.sources[local]).map(|(t, _)| t);
                    if let (Some(table), Some(index)) = (src, m.columns[local]) {
                        out.push((table, index));
                    }
                }
                _ => {}
            }
        }
    }

    /// Columns written through the fixed-source terms of one iteration.
    pub(crate) fn fixed_written_columns(
        &self,
        storage: &dyn Storage,
        fixed: &[FixedField],
        out: &mut Vec<(TableId, usize)>,
    ) {
        let terms = self.query.terms();
        for f in fixed {
            let term = &terms[f.field];
            if term.oper == Oper::Not || !is_explicit_write(term.inout) {
                continue;
            }
            if let (Some((table, _)), Some(index)) = (storage.entity_table(f.src), f.column) {
                out.push((table, index));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Change detection
    // -----------------------------------------------------------------------

    fn linked(&self) -> impl Iterator<Item = MatchId> + '_ {
        let mut cur = self.list.first;
        core::iter::from_fn(move || {
            let id = cur?;
            cur = self.arena.get(id).and_then(|m| m.next);
            Some(id)
        })
    }

    fn fixed_versions(&self, storage: &dyn Storage) -> Vec<i64> {
        let terms = self.query.terms();
        self.fixed_fields
            .iter()
            .map(|&field| match terms[field].src {
                Source::Entity(src) => monitor::entity_version(storage, src, terms[field].id),
                _ => monitor::UNTRACKED,
            })
            .collect()
    }

    /// Returns true if results changed since the last [`sync`](Self::sync).
    ///
    /// Always true for caches built without `detect_changes`.
    pub fn changed(&self, storage: &dyn Storage) -> bool {
        if !self.detect_changes || self.prev_match_count != self.list.match_count {
            return true;
        }
        if self.fixed_versions(storage) != self.fixed_monitor {
            return true;
        }
        self.linked().any(|id| self.match_changed(storage, id))
    }

    /// Returns true if the data of one match changed since the last sync.
    pub fn match_changed(&self, storage: &dyn Storage, id: MatchId) -> bool {
        let Some(m) = self.arena.get(id) else {
            return false;
        };
        match &m.monitor {
            Some(prev) => monitor::is_dirty(storage, m, self.tracked, prev),
            None => true,
        }
    }

    /// Records the current versions so that [`changed`](Self::changed)
    /// reports false until the next write.
    pub fn sync(&mut self, storage: &dyn Storage) {
        self.prev_match_count = self.list.match_count;
        self.fixed_monitor = self.fixed_versions(storage);
        let ids: Vec<MatchId> = self.linked().collect();
        for id in ids {
            if let Some(m) = self.arena.get_mut(id) {
                if let Some(mut versions) = m.monitor.take() {
                    monitor::snapshot(storage, m, self.tracked, &mut versions);
                    m.monitor = Some(versions);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The public query, including fixed-source terms.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The plan over cached terms.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Maps cached fields to public fields.
    pub fn field_map(&self) -> &[usize] {
        &self.field_map
    }

    /// Number of matched tables that have entities.
    pub fn table_count(&self) -> usize {
        self.tables.non_empty().len()
    }

    /// Number of matched tables without entities.
    pub fn empty_table_count(&self) -> usize {
        self.tables.empty().len()
    }

    /// Number of entities in matched non-empty tables.
    pub fn entity_count(&self, storage: &dyn Storage) -> usize {
        self.tables
            .non_empty()
            .iter()
            .map(|t| storage.table_count(*t))
            .sum()
    }

    /// Number of matches in the iteration list.
    pub fn linked_count(&self) -> usize {
        self.list.count
    }

    /// Bumped every time a match joins or leaves the iteration list.
    pub fn match_count(&self) -> u64 {
        self.list.match_count
    }

    /// Number of completed rematch passes.
    pub fn rematch_count(&self) -> u64 {
        self.rematch_count
    }

    pub fn group_info(&self, group: GroupId) -> Option<&GroupInfo> {
        self.list.groups.get(&group).map(|g| &g.info)
    }

    /// Live group ids in iteration order.
    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.list.group_order().map(|(id, _)| *id)
    }

    pub fn get_match(&self, id: MatchId) -> Option<&Match> {
        self.arena.get(id)
    }

    pub fn table_record(&self, table: TableId) -> Option<&TableRecord> {
        self.tables.get(table)
    }

    /// Matches of a table in sub-list order.
    pub fn table_matches(&self, table: TableId) -> impl Iterator<Item = MatchId> + '_ {
        let mut cur = self.tables.get(table).and_then(|r| r.first);
        core::iter::from_fn(move || {
            let id = cur?;
            cur = self.arena.get(id).and_then(|m| m.next_match);
            Some(id)
        })
    }

    /// Unregisters monitors and tears down groups, invoking delete hooks.
    pub fn fini(mut self, storage: &mut dyn Storage) {
        for id in &self.monitors {
            storage.unregister_monitor(*id);
        }
        self.list.clear_groups(&mut self.policy);
        tracing::debug!(tables = self.tables.len(), "query cache finalized");
    }

    #[cfg(feature = "sanitize")]
    fn sanitize(&self) {
        if let Err(err) = self.validate_structure() {
            panic!("query cache corrupted: {}", err);
        }
    }

    #[cfg(not(feature = "sanitize"))]
    #[inline]
    fn sanitize(&self) {}
}

fn is_explicit_write(inout: InOut) -> bool {
    matches!(inout, InOut::Out | InOut::InOut)
}

fn validate_order_by(plan: &Plan, spec: OrderSpec) -> Result<OrderBy> {
    let OrderSpec { id, comparator } = spec;
    if !plan.has_this() {
        return Err(Error::invalid_order_by(id, "ordering requires a $this term"));
    }
    let Some(id) = id else {
        return Ok(OrderBy {
            id: None,
            field: None,
            comparator,
        });
    };
    if id.is_wildcard() {
        return Err(Error::invalid_order_by(Some(id), "cannot order by a wildcard id"));
    }
    let field = plan
        .terms()
        .iter()
        .position(|t| t.id == id && t.oper == Oper::And && t.src == Source::This)
        .ok_or_else(|| {
            Error::invalid_order_by(Some(id), "the ordered component must be an And term on $this")
        })?;
    Ok(OrderBy {
        id: Some(id),
        field: Some(field),
        comparator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::CacheResult;
    use crate::sort::{by_entity, by_value};
    use quarry_core::{Entity, Value, CHILD_OF};
    use quarry_query::{Order, Term};
    use quarry_storage::World;

    fn pump(cache: &mut QueryCache, world: &mut World) {
        for event in world.drain_events() {
            cache.notify(world, event);
        }
    }

    fn tables(cache: &mut QueryCache, world: &World) -> Vec<Option<TableId>> {
        cache.iter(world).map(|r| r.table()).collect()
    }

    fn bindings(cache: &QueryCache) -> Vec<(MatchId, Vec<Id>, Vec<Entity>, Vec<Option<usize>>)> {
        let mut out: Vec<_> = cache
            .linked()
            .filter_map(|id| cache.get_match(id).map(|m| (id, m.ids().to_vec(), m.sources().to_vec(), m.columns().to_vec())))
            .collect();
        out.sort();
        out
    }

    fn ints<'a>(results: impl Iterator<Item = CacheResult<'a>>, field: usize) -> Vec<i64> {
        results
            .flat_map(|r| r.values(field))
            .flatten()
            .filter_map(Value::as_i64)
            .collect()
    }

    #[test]
    fn test_table_lifecycle() {
        let mut world = World::new();
        let x = world.component();
        let mut cache = QueryCache::build(&mut world, QueryDesc::new().with(x)).unwrap();
        world.drain_events();

        let t1 = world.ensure_table(&[Id::new(x)]);
        pump(&mut cache, &mut world);
        assert_eq!(cache.table_count(), 0);
        assert_eq!(cache.empty_table_count(), 1);
        assert_eq!(cache.linked_count(), 0);

        let e = world.spawn();
        world.add(e, x).unwrap();
        pump(&mut cache, &mut world);
        assert_eq!(cache.table_count(), 1);
        assert_eq!(cache.empty_table_count(), 0);
        assert_eq!(tables(&mut cache, &world), [Some(t1)]);
        let id = cache.table_matches(t1).next().unwrap();
        assert!(cache.get_match(id).unwrap().is_linked());

        world.delete(e).unwrap();
        world.delete_table(t1).unwrap();
        pump(&mut cache, &mut world);
        assert_eq!(cache.table_count(), 0);
        assert_eq!(cache.empty_table_count(), 0);
        assert!(cache.get_match(id).is_none());
        assert!(cache.validate(&world).is_ok());
    }

    #[test]
    fn test_empty_tables_yielded_when_requested() {
        let mut world = World::new();
        let x = world.tag();
        world.ensure_table(&[Id::new(x)]);
        world.drain_events();

        let desc = QueryDesc::new().with(x).match_empty_tables(true);
        let mut cache = QueryCache::build(&mut world, desc).unwrap();
        assert_eq!(cache.table_count(), 0);
        assert_eq!(cache.empty_table_count(), 1);
        assert_eq!(cache.iter(&world).count(), 1);

        let e = world.spawn();
        world.add(e, x).unwrap();
        pump(&mut cache, &mut world);
        assert_eq!(cache.table_count(), 1);
        assert_eq!(cache.linked_count(), 1);
    }

    #[test]
    fn test_wildcard_matches_share_record() {
        let mut world = World::new();
        let likes = world.tag();
        let a = world.spawn();
        let b = world.spawn();
        let e = world.spawn();
        world.add(e, Id::pair(likes, a)).unwrap();
        world.add(e, Id::pair(likes, b)).unwrap();
        world.drain_events();

        let cache = QueryCache::build(&mut world, QueryDesc::new().with(Id::pair(likes, WILDCARD))).unwrap();
        let table = world.record(e).unwrap().table;
        assert_eq!(cache.table_count(), 1);
        assert_eq!(cache.linked_count(), 2);

        let ids: Vec<Id> = cache
            .table_matches(table)
            .map(|m| cache.get_match(m).unwrap().ids()[0])
            .collect();
        assert_eq!(ids, [Id::pair(likes, a), Id::pair(likes, b)]);
    }

    #[test]
    fn test_build_rejects_invalid_descriptors() {
        let mut world = World::new();
        let x = world.component();
        let y = world.component();

        let filter = QueryDesc::new().term(Term::new(x).inout(InOut::Filter));
        assert!(matches!(
            QueryCache::build(&mut world, filter),
            Err(Error::InvalidTerm { term: 0, .. })
        ));

        let wildcard = CacheDesc::new(QueryDesc::new().with(x)).order_by(Id::WILDCARD, by_value);
        assert!(matches!(
            QueryCache::build(&mut world, wildcard),
            Err(Error::InvalidOrderBy { .. })
        ));

        let not_queried = CacheDesc::new(QueryDesc::new().with(x)).order_by(y, by_value);
        let err = QueryCache::build(&mut world, not_queried).err().unwrap();
        assert!(matches!(err, Error::InvalidOrderBy { id: Some(id), .. } if id == Id::new(y)));

        let optional = CacheDesc::new(QueryDesc::new().with(x).optional(y)).order_by(y, by_value);
        assert!(QueryCache::build(&mut world, optional).is_err());

        let twice = CacheDesc::new(QueryDesc::new().with(x)).group_by(CHILD_OF).group_by(CHILD_OF);
        assert!(matches!(
            QueryCache::build(&mut world, twice),
            Err(Error::InvalidGroupBy { .. })
        ));

        let ordered_twice = CacheDesc::new(QueryDesc::new().with(x))
            .order_by(x, by_value)
            .order_by_entity(by_entity);
        assert!(matches!(
            QueryCache::build(&mut world, ordered_twice),
            Err(Error::InvalidOrderBy { id: None, .. })
        ));

        let named = QueryDesc::new().term(Term::new(x).var("other"));
        assert!(matches!(
            QueryCache::build(&mut world, named),
            Err(Error::UnsupportedTerm { term: 0, .. })
        ));

        let mixed = CacheDesc::new(
            QueryDesc::new().term(Term::new(x).cascade(CHILD_OF, Order::Ascending).optional()),
        )
        .group_by(CHILD_OF);
        assert!(matches!(
            QueryCache::build(&mut world, mixed),
            Err(Error::InvalidGroupBy { .. })
        ));
    }

    #[test]
    fn test_failed_build_registers_no_monitors() {
        let mut world = World::new();
        let x = world.component();
        let desc = CacheDesc::new(QueryDesc::new().term(Term::new(x).up(CHILD_OF)))
            .order_by(x, by_value);
        assert!(QueryCache::build(&mut world, desc).is_err());
        assert_eq!(world.monitor_count(Id::pair(CHILD_OF, WILDCARD)), 0);
        assert_eq!(world.monitor_count(Id::new(x)), 0);
    }

    #[test]
    fn test_monitors_registered_and_released() {
        let mut world = World::new();
        let x = world.component();
        let cache = QueryCache::build(&mut world, QueryDesc::new().term(Term::new(x).up(CHILD_OF))).unwrap();
        assert_eq!(world.monitor_count(Id::pair(CHILD_OF, WILDCARD)), 1);
        assert_eq!(world.monitor_count(Id::pair(IS_A, WILDCARD)), 1);
        assert_eq!(world.monitor_count(Id::new(x)), 1);

        cache.fini(&mut world);
        assert_eq!(world.monitor_count(Id::pair(CHILD_OF, WILDCARD)), 0);
        assert_eq!(world.monitor_count(Id::new(x)), 0);
    }

    #[test]
    fn test_fixed_source_terms() {
        let mut world = World::new();
        let a = world.tag();
        let config = world.component();
        let game = world.spawn();
        let e = world.spawn();
        world.add(e, a).unwrap();
        world.drain_events();

        let desc = QueryDesc::new().with(a).term(Term::new(config).src(game));
        let mut cache = QueryCache::build(&mut world, desc).unwrap();
        assert_eq!(cache.field_map(), &[0]);
        assert_eq!(cache.table_count(), 1);
        assert_eq!(cache.iter(&world).count(), 0);

        world.set(game, config, 5i64).unwrap();
        pump(&mut cache, &mut world);
        let results: Vec<_> = cache.iter(&world).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source(1), game);
        assert!(results[0].is_set(1));
        assert!(!results[0].is_self(1));
        assert!(results[0].is_self(0));
        assert_eq!(results[0].value(1, 0), Some(&Value::Int64(5)));
        assert_eq!(results[0].entities(), [e]);
    }

    #[test]
    fn test_query_without_this_terms() {
        let mut world = World::new();
        let mut cache = QueryCache::build(&mut world, QueryDesc::new()).unwrap();
        let results: Vec<_> = cache.iter(&world).map(|r| (r.table(), r.count())).collect();
        assert_eq!(results, [(None, 0)]);
        assert_eq!(cache.table_count(), 0);

        let t = world.ensure_table(&[Id::new(40)]);
        cache.notify(&world, Event::TableCreate(t));
        assert_eq!(cache.iter(&world).count(), 1);
    }

    #[test]
    fn test_rematch_follows_inheritance() {
        let mut world = World::new();
        let pos = world.component();
        let parent = world.spawn();
        let child = world.spawn();
        world.add(child, Id::pair(CHILD_OF, parent)).unwrap();
        world.drain_events();

        let mut cache = QueryCache::build(&mut world, QueryDesc::new().term(Term::new(pos).up(CHILD_OF))).unwrap();
        assert_eq!(cache.iter(&world).count(), 0);

        world.set(parent, pos, 1i64).unwrap();
        pump(&mut cache, &mut world);
        let results: Vec<_> = cache.iter(&world).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source(0), parent);
        assert_eq!(results[0].value(0, 0), Some(&Value::Int64(1)));
        drop(results);
        assert_eq!(cache.rematch_count(), 1);

        world.remove(parent, pos).unwrap();
        pump(&mut cache, &mut world);
        assert_eq!(cache.iter(&world).count(), 0);
        assert_eq!(cache.table_count(), 0);
        assert!(cache.validate(&world).is_ok());
    }

    #[test]
    fn test_rematch_reuses_matches() {
        let mut world = World::new();
        let pos = world.component();
        let parent = world.spawn();
        let child = world.spawn();
        world.set(parent, pos, 1i64).unwrap();
        world.add(child, Id::pair(CHILD_OF, parent)).unwrap();
        world.drain_events();

        let mut cache = QueryCache::build(&mut world, QueryDesc::new().term(Term::new(pos).self_up(CHILD_OF))).unwrap();
        let before: Vec<MatchId> = cache.iter(&world).map(|r| r.match_id()).collect();
        assert_eq!(before.len(), 2);

        // a monitored change that does not alter which tables match
        world.set(parent, pos, 2i64).unwrap();
        world.remove(parent, pos).unwrap();
        world.set(parent, pos, 3i64).unwrap();
        let bound = bindings(&cache);
        pump(&mut cache, &mut world);
        cache.notify(&world, Event::Rematch);
        assert_eq!(cache.rematch_count(), 1);
        let after: Vec<MatchId> = cache.iter(&world).map(|r| r.match_id()).collect();
        assert_eq!(after.len(), 2);
        let child_table = world.record(child).unwrap().table;
        let reused = cache.table_matches(child_table).next().unwrap();
        assert!(before.contains(&reused));
        assert_eq!(bindings(&cache), bound);

        // nothing moved since the last pass
        cache.notify(&world, Event::Rematch);
        assert_eq!(cache.rematch_count(), 1);
        assert_eq!(bindings(&cache), bound);
    }

    #[test]
    fn test_changed_and_sync() {
        let mut world = World::new();
        let pos = world.component();
        let e = world.spawn();
        world.set(e, pos, 1i64).unwrap();
        world.drain_events();

        let mut cache = QueryCache::build(&mut world, QueryDesc::new().with(pos).detect_changes(true)).unwrap();
        assert!(cache.changed(&world));
        cache.sync(&world);
        assert!(!cache.changed(&world));

        world.set_silent(e, pos, 2i64).unwrap();
        assert!(!cache.changed(&world));

        world.set(e, pos, 3i64).unwrap();
        assert!(cache.changed(&world));
        cache.sync(&world);
        assert!(!cache.changed(&world));

        let other = world.spawn();
        world.set(other, pos, 4i64).unwrap();
        assert!(cache.changed(&world));
    }

    #[test]
    fn test_changed_without_detection() {
        let mut world = World::new();
        let pos = world.component();
        let mut cache = QueryCache::build(&mut world, QueryDesc::new().with(pos)).unwrap();
        cache.sync(&world);
        assert!(cache.changed(&world));
    }

    #[test]
    fn test_group_by_relation_target() {
        let mut world = World::new();
        let x = world.tag();
        let p1 = world.spawn();
        let p2 = world.spawn();
        for parent in [p2, p1, p2] {
            let e = world.spawn();
            world.add(e, x).unwrap();
            world.add(e, Id::pair(CHILD_OF, parent)).unwrap();
        }
        let loner = world.spawn();
        world.add(loner, x).unwrap();
        world.drain_events();

        let desc = CacheDesc::new(QueryDesc::new().with(x)).group_by(CHILD_OF);
        let mut cache = QueryCache::build(&mut world, desc).unwrap();
        let groups: Vec<GroupId> = cache.groups().collect();
        assert_eq!(groups, [0, p1 as GroupId, p2 as GroupId]);
        assert_eq!(cache.group_info(p2 as GroupId).unwrap().table_count, 1);
        assert!(cache.group_info(12345).is_none());

        let in_p2: Vec<usize> = cache.iter(&world).set_group(p2 as GroupId).map(|r| r.count()).collect();
        assert_eq!(in_p2, [2]);
        assert_eq!(cache.iter(&world).set_group(999).count(), 0);
    }

    #[test]
    fn test_match_changed() {
        let mut world = World::new();
        let pos = world.component();
        let tag = world.tag();
        let a = world.spawn();
        let b = world.spawn();
        world.set(a, pos, 1i64).unwrap();
        world.set(b, pos, 2i64).unwrap();
        world.add(b, tag).unwrap();
        world.drain_events();

        let mut cache = QueryCache::build(&mut world, QueryDesc::new().with(pos).detect_changes(true)).unwrap();
        let match_a = cache.table_matches(world.record(a).unwrap().table).next().unwrap();
        let match_b = cache.table_matches(world.record(b).unwrap().table).next().unwrap();
        assert!(cache.match_changed(&world, match_a));
        cache.sync(&world);
        assert!(!cache.match_changed(&world, match_a));
        assert!(!cache.match_changed(&world, match_b));

        world.set(b, pos, 3i64).unwrap();
        assert!(!cache.match_changed(&world, match_a));
        assert!(cache.match_changed(&world, match_b));

        // a row added to a's table moves its row version
        let c = world.spawn();
        world.set(c, pos, 4i64).unwrap();
        assert!(cache.match_changed(&world, match_a));

        cache.sync(&world);
        assert!(!cache.match_changed(&world, match_a));
        assert!(!cache.match_changed(&world, match_b));
    }

    #[test]
    fn test_iteration_marks_write_fields_dirty() {
        let mut world = World::new();
        let pos = world.component();
        let vel = world.component();
        let e = world.spawn();
        world.set(e, pos, 1i64).unwrap();
        world.set(e, vel, 1i64).unwrap();
        world.drain_events();

        let reader = QueryDesc::new().term(Term::new(pos).inout(InOut::In)).detect_changes(true);
        let mut reader = QueryCache::build(&mut world, reader).unwrap();
        let writer = QueryDesc::new()
            .term(Term::new(vel).inout(InOut::In))
            .term(Term::new(pos).inout(InOut::Out));
        let mut writer = QueryCache::build(&mut world, writer).unwrap();
        reader.sync(&world);

        // skipped results write nothing
        let mut it = writer.iter(&world);
        while it.next().is_some() {
            CacheIter::skip(&mut it);
        }
        let writes = it.finish();
        assert!(writes.is_empty());
        writes.apply(&mut world);
        assert!(!reader.changed(&world));

        let table = world.record(e).unwrap().table;
        let pos_index = world.table(table).unwrap().type_index(Id::new(pos)).unwrap();
        let mut it = writer.iter(&world);
        assert_eq!(it.by_ref().count(), 1);
        let writes = it.finish();
        assert_eq!(writes.columns(), &[(table, pos_index)]);
        writes.apply(&mut world);
        assert!(reader.changed(&world));

        // in-only fields never mark
        reader.sync(&world);
        let mut it = reader.iter(&world);
        it.by_ref().for_each(drop);
        let writes = it.finish();
        assert!(writes.is_empty());
    }

    #[test]
    fn test_shared_and_fixed_writes_must_be_explicit() {
        let mut world = World::new();
        let pos = world.component();
        let config = world.component();
        let parent = world.spawn();
        let child = world.spawn();
        let game = world.spawn();
        world.set(parent, pos, 1i64).unwrap();
        world.add(child, Id::pair(CHILD_OF, parent)).unwrap();
        world.set(game, config, 1i64).unwrap();
        world.drain_events();

        let implicit = QueryDesc::new()
            .term(Term::new(pos).up(CHILD_OF))
            .term(Term::new(config).src(game));
        let mut cache = QueryCache::build(&mut world, implicit).unwrap();
        let mut it = cache.iter(&world);
        assert_eq!(it.by_ref().count(), 1);
        assert!(it.finish().is_empty());

        let explicit = QueryDesc::new()
            .term(Term::new(pos).up(CHILD_OF).inout(InOut::InOut))
            .term(Term::new(config).src(game).inout(InOut::Out));
        let mut cache = QueryCache::build(&mut world, explicit).unwrap();
        let mut it = cache.iter(&world);
        assert_eq!(it.by_ref().count(), 1);
        let writes = it.finish();

        let parent_table = world.record(parent).unwrap().table;
        let game_table = world.record(game).unwrap().table;
        let mut expected: Vec<(TableId, usize)> = vec![(parent_table, 0), (game_table, 0)];
        expected.sort();
        assert_eq!(writes.columns(), expected.as_slice());

        let before = world.dirty_state(parent_table)[1];
        writes.apply(&mut world);
        assert_eq!(world.dirty_state(parent_table)[1], before + 1);
    }

    #[test]
    fn test_cached_iter_falls_back_to_list_order() {
        let mut world = World::new();
        let pos = world.component();
        let tag = world.tag();
        let other = world.tag();
        let a = world.spawn();
        let b = world.spawn();
        world.set(a, pos, 3i64).unwrap();
        world.set(b, pos, 1i64).unwrap();
        world.add(b, tag).unwrap();
        world.drain_events();

        let desc = CacheDesc::new(QueryDesc::new().with(pos)).order_by(pos, by_value);
        let mut cache = QueryCache::build(&mut world, desc).unwrap();
        assert_eq!(ints(cache.cached_iter(&world), 0), [1, 3]);

        // a newly matched table leaves the sorted view stale
        let c = world.spawn();
        world.add(c, other).unwrap();
        world.set(c, pos, 2i64).unwrap();
        pump(&mut cache, &mut world);
        assert_eq!(ints(cache.cached_iter(&world), 0), [3, 1, 2]);

        assert_eq!(ints(cache.iter(&world), 0), [1, 2, 3]);
        assert_eq!(ints(cache.cached_iter(&world), 0), [1, 2, 3]);
    }

    #[test]
    fn test_cached_iter_checks_fixed_terms() {
        let mut world = World::new();
        let a = world.tag();
        let config = world.component();
        let game = world.spawn();
        let e = world.spawn();
        world.add(e, a).unwrap();
        world.drain_events();

        let desc = QueryDesc::new().with(a).term(Term::new(config).src(game));
        let cache = QueryCache::build(&mut world, desc).unwrap();
        assert_eq!(cache.cached_iter(&world).count(), 0);
        world.set(game, config, 1i64).unwrap();
        assert_eq!(cache.cached_iter(&world).count(), 1);
    }

    #[test]
    fn test_set_group_on_sorted_cache() {
        let mut world = World::new();
        let pos = world.component();
        let tag = world.tag();
        let p1 = world.spawn();
        let p2 = world.spawn();
        for (parent, value, tagged) in [(p1, 5, false), (p2, 4, false), (p1, 2, false), (p2, 1, false), (p2, 3, true)] {
            let e = world.spawn();
            world.add(e, Id::pair(CHILD_OF, parent)).unwrap();
            if tagged {
                world.add(e, tag).unwrap();
            }
            world.set(e, pos, value as i64).unwrap();
        }
        world.drain_events();

        let desc = CacheDesc::new(QueryDesc::new().with(pos))
            .group_by(CHILD_OF)
            .order_by(pos, by_value);
        let mut cache = QueryCache::build(&mut world, desc).unwrap();
        assert_eq!(ints(cache.iter(&world), 0), [2, 5, 1, 3, 4]);
        assert_eq!(ints(cache.iter(&world).set_group(p1 as GroupId), 0), [2, 5]);
        assert_eq!(ints(cache.iter(&world).set_group(p2 as GroupId), 0), [1, 3, 4]);
        assert_eq!(cache.iter(&world).set_group(999).count(), 0);

        // the group's slices follow a re-sort
        let moved = cache
            .iter(&world)
            .set_group(p2 as GroupId)
            .flat_map(|r| r.entities())
            .last()
            .unwrap();
        world.set(moved, pos, 0i64).unwrap();
        assert_eq!(ints(cache.iter(&world).set_group(p2 as GroupId), 0), [0, 1, 3]);
    }
}
