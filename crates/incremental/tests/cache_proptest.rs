//! Property-based tests for incremental cache maintenance.
//!
//! A cache fed with every storage event must agree with an uncached query
//! evaluated from scratch, whatever sequence of structural changes led to
//! the current world.

use proptest::prelude::*;
use quarry_cache::{MatchId, QueryCache};
use quarry_core::{Entity, Event, Id, Storage, TableId, CHILD_OF, WILDCARD};
use quarry_query::{Query, QueryDesc, Term};
use quarry_storage::World;

const PARENTS: usize = 6;
const CHILDREN: usize = 18;

#[derive(Clone, Debug)]
enum Op {
    AddTag(usize, usize),
    RemoveTag(usize, usize),
    Adopt(usize, usize),
    Orphan(usize),
    Likes(usize, usize),
    DeleteParent(usize),
    DeleteEmptyTables,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..PARENTS + CHILDREN, 0usize..3).prop_map(|(e, t)| Op::AddTag(e, t)),
        2 => (0usize..PARENTS + CHILDREN, 0usize..3).prop_map(|(e, t)| Op::RemoveTag(e, t)),
        3 => (0usize..CHILDREN, 0usize..PARENTS).prop_map(|(c, p)| Op::Adopt(c, p)),
        1 => (0usize..CHILDREN).prop_map(Op::Orphan),
        2 => (0usize..CHILDREN, 0usize..PARENTS).prop_map(|(c, p)| Op::Likes(c, p)),
        1 => (0usize..PARENTS).prop_map(Op::DeleteParent),
        1 => Just(Op::DeleteEmptyTables),
    ]
}

struct Fixture {
    world: World,
    tags: Vec<Entity>,
    likes: Entity,
    parents: Vec<Entity>,
    children: Vec<Entity>,
}

impl Fixture {
    fn new() -> Self {
        let mut world = World::new();
        let tags = (0..3).map(|_| world.component()).collect();
        let likes = world.tag();
        let parents = (0..PARENTS).map(|_| world.spawn()).collect();
        let children = (0..CHILDREN).map(|_| world.spawn()).collect();
        Self {
            world,
            tags,
            likes,
            parents,
            children,
        }
    }

    fn entity(&self, index: usize) -> Entity {
        if index < PARENTS {
            self.parents[index]
        } else {
            self.children[index - PARENTS]
        }
    }

    /// Errors from dead entities are expected and ignored.
    fn apply(&mut self, op: &Op) {
        let _ = match *op {
            Op::AddTag(e, t) => self.world.set(self.entity(e), self.tags[t], e as i64),
            Op::RemoveTag(e, t) => self.world.remove(self.entity(e), self.tags[t]),
            Op::Adopt(c, p) => {
                let child = self.children[c];
                let _ = self.world.remove(child, Id::pair(CHILD_OF, WILDCARD));
                self.world.add(child, Id::pair(CHILD_OF, self.parents[p]))
            }
            Op::Orphan(c) => self.world.remove(self.children[c], Id::pair(CHILD_OF, WILDCARD)),
            Op::Likes(c, p) => self.world.add(self.children[c], Id::pair(self.likes, self.parents[p])),
            Op::DeleteParent(p) => self.world.delete(self.parents[p]),
            Op::DeleteEmptyTables => {
                self.world.delete_empty_tables();
                Ok(())
            }
        };
    }

    fn queries(&self) -> Vec<QueryDesc> {
        vec![
            QueryDesc::new().with(self.tags[0]).without(self.tags[1]),
            QueryDesc::new().with(self.tags[0]).term(Term::new(self.tags[1]).up(CHILD_OF)),
            QueryDesc::new()
                .term(Term::new(self.tags[2]).self_up(CHILD_OF))
                .optional(self.tags[0]),
            QueryDesc::new().with(Id::pair(self.likes, WILDCARD)),
        ]
    }
}

fn pump(caches: &mut [QueryCache], world: &mut World) {
    for event in world.drain_events() {
        for cache in caches.iter_mut() {
            cache.notify(world, event);
        }
    }
}

/// Handle and field bindings of every iterated match, sorted by handle.
fn bindings(cache: &mut QueryCache, world: &World) -> Vec<(MatchId, Vec<Id>, Vec<Entity>, Vec<Option<usize>>)> {
    let ids: Vec<MatchId> = cache.iter(world).map(|r| r.match_id()).collect();
    let mut out: Vec<_> = ids
        .into_iter()
        .filter_map(|id| {
            let m = cache.get_match(id)?;
            Some((id, m.ids().to_vec(), m.sources().to_vec(), m.columns().to_vec()))
        })
        .collect();
    out.sort();
    out
}

/// (table, resolved ids) of every result, sorted.
fn cached_results(cache: &mut QueryCache, world: &World) -> Vec<(Option<TableId>, Vec<Option<Id>>)> {
    let mut out: Vec<_> = cache
        .iter(world)
        .map(|r| (r.table(), (0..r.field_count()).map(|f| r.id(f)).collect()))
        .collect();
    out.sort();
    out
}

fn fresh_results(desc: &QueryDesc, world: &World) -> Vec<(Option<TableId>, Vec<Option<Id>>)> {
    let query = Query::new(desc.clone()).unwrap();
    let mut out: Vec<_> = query
        .iter(world)
        .filter(|r| r.table.map(|t| world.table_count(t) > 0).unwrap_or(true))
        .map(|r| (r.table, r.ids.iter().copied().map(Some).collect()))
        .collect();
    out.sort();
    out
}

proptest! {
    /// Property: after any sequence of operations, each cache yields the
    /// same results as a fresh evaluation and passes its self-checks.
    #[test]
    fn cache_agrees_with_fresh_evaluation(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut fx = Fixture::new();
        let descs = fx.queries();
        let mut caches: Vec<QueryCache> = descs
            .iter()
            .map(|d| QueryCache::build(&mut fx.world, d.clone()).unwrap())
            .collect();
        fx.world.drain_events();

        for op in &ops {
            fx.apply(op);
            pump(&mut caches, &mut fx.world);
        }

        for (cache, desc) in caches.iter_mut().zip(&descs) {
            let got = cached_results(cache, &fx.world);
            prop_assert!(cache.validate(&fx.world).is_ok(), "{:?}", cache.validate(&fx.world));
            prop_assert_eq!(got, fresh_results(desc, &fx.world));
        }
    }

    /// Property: non-empty and empty partitions together hold every matched
    /// table, and non-empty tables alone account for the cached entities.
    #[test]
    fn table_accounting(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut fx = Fixture::new();
        let desc = QueryDesc::new().with(fx.tags[0]);
        let mut cache = QueryCache::build(&mut fx.world, desc.clone()).unwrap();
        fx.world.drain_events();

        for op in &ops {
            fx.apply(op);
            for event in fx.world.drain_events() {
                cache.notify(&fx.world, event);
            }
        }

        let id = Id::new(fx.tags[0]);
        let with_tag: Vec<TableId> = fx
            .world
            .tables()
            .iter()
            .copied()
            .filter(|t| fx.world.table_type(*t).contains(&id))
            .collect();
        let non_empty = with_tag.iter().filter(|t| fx.world.table_count(**t) > 0).count();
        prop_assert_eq!(cache.table_count(), non_empty);
        prop_assert_eq!(cache.empty_table_count(), with_tag.len() - non_empty);
        prop_assert_eq!(cache.linked_count(), non_empty);

        let entities: usize = with_tag.iter().map(|t| fx.world.table_count(*t)).sum();
        prop_assert_eq!(cache.entity_count(&fx.world), entities);
    }

    /// Property: a rematch pass over an unchanged set of matching tables
    /// keeps every match handle and its field bindings, and a second pass
    /// with nothing moved is a no-op.
    #[test]
    fn rematch_keeps_handles(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut fx = Fixture::new();
        let desc = QueryDesc::new().term(Term::new(fx.tags[2]).self_up(CHILD_OF));
        let mut cache = QueryCache::build(&mut fx.world, desc).unwrap();
        fx.world.drain_events();

        for op in &ops {
            fx.apply(op);
        }
        for event in fx.world.drain_events() {
            cache.notify(&fx.world, event);
        }
        cache.notify(&fx.world, Event::Rematch);
        let before = bindings(&mut cache, &fx.world);

        // toggle a monitored component twice, ending where it started
        let parent = fx.parents[0];
        let tag = fx.tags[2];
        let generation = fx.world.monitor_generation();
        if fx.world.has(parent, tag) {
            let _ = fx.world.remove(parent, tag);
            let _ = fx.world.set(parent, tag, 0i64);
        } else {
            let _ = fx.world.set(parent, tag, 0i64);
            let _ = fx.world.remove(parent, tag);
        }
        let moved = fx.world.monitor_generation() != generation;
        for event in fx.world.drain_events() {
            cache.notify(&fx.world, event);
        }
        let passes = cache.rematch_count();
        cache.notify(&fx.world, Event::Rematch);
        prop_assert_eq!(cache.rematch_count() != passes, moved);

        let after = bindings(&mut cache, &fx.world);
        prop_assert_eq!(&before, &after);

        cache.notify(&fx.world, Event::Rematch);
        prop_assert_eq!(bindings(&mut cache, &fx.world), after);
        prop_assert!(cache.validate(&fx.world).is_ok());
    }

    /// Property: a wildcard term links one match per matching pair of each
    /// non-empty table.
    #[test]
    fn wildcard_multiplicity(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut fx = Fixture::new();
        let pattern = Id::pair(fx.likes, WILDCARD);
        let mut cache = QueryCache::build(&mut fx.world, QueryDesc::new().with(pattern)).unwrap();
        fx.world.drain_events();

        for op in &ops {
            fx.apply(op);
            for event in fx.world.drain_events() {
                cache.notify(&fx.world, event);
            }
        }

        let expected: usize = fx
            .world
            .tables()
            .iter()
            .filter(|t| fx.world.table_count(**t) > 0)
            .map(|t| fx.world.table_type(*t).iter().filter(|id| pattern.matches(**id)).count())
            .sum();
        prop_assert_eq!(cache.linked_count(), expected);
        prop_assert_eq!(cache.iter(&fx.world).count(), expected);
    }
}
