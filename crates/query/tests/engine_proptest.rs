//! Property-based tests for the plan execution engine.
//!
//! Results of compiled plans are compared against a brute-force scan over
//! every table of the world.

use proptest::prelude::*;
use quarry_core::{find_id, Entity, Id, Storage, TableId, CHILD_OF, WILDCARD};
use quarry_query::{Query, QueryDesc, Term};
use quarry_storage::World;
use std::collections::BTreeSet;

/// Each entity gets a bitmask over four tags and an optional parent index.
fn world_strategy() -> impl Strategy<Value = Vec<(u8, Option<usize>)>> {
    prop::collection::vec((0u8..16, prop::option::of(0usize..8)), 1..40)
}

fn build(spec: &[(u8, Option<usize>)]) -> (World, Vec<Entity>, Vec<Entity>) {
    let mut world = World::new();
    let tags: Vec<Entity> = (0..4).map(|_| world.tag()).collect();
    let entities: Vec<Entity> = spec.iter().map(|_| world.spawn()).collect();
    for (i, (mask, parent)) in spec.iter().enumerate() {
        for (bit, tag) in tags.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                world.add(entities[i], *tag).unwrap();
            }
        }
        if let Some(p) = parent {
            // parents always precede children, so there are no cycles
            if *p < i {
                world.add(entities[i], Id::pair(CHILD_OF, entities[*p])).unwrap();
            }
        }
    }
    (world, tags, entities)
}

fn has(world: &World, table: TableId, id: Id) -> bool {
    find_id(world.table_type(table), id, 0).is_some()
}

fn ancestor_has(world: &World, table: TableId, id: Id) -> bool {
    let mut current = table;
    for _ in 0..64 {
        let ty = world.table_type(current);
        let Some(index) = find_id(ty, Id::pair(CHILD_OF, WILDCARD), 0) else {
            return false;
        };
        let Some((parent_table, _)) = world.entity_table(ty[index].second()) else {
            return false;
        };
        if has(world, parent_table, id) {
            return true;
        }
        current = parent_table;
    }
    false
}

proptest! {
    /// Property: And/Not terms select exactly the non-empty tables that
    /// have the first tag and lack the second.
    #[test]
    fn and_not_matches_brute_force(spec in world_strategy()) {
        let (world, tags, _) = build(&spec);
        let query = Query::new(QueryDesc::new().with(tags[0]).without(tags[1])).unwrap();

        let got: BTreeSet<TableId> = query.iter(&world).filter_map(|r| r.table).collect();
        let expected: BTreeSet<TableId> = world
            .tables()
            .iter()
            .copied()
            .filter(|t| world.table_count(*t) > 0)
            .filter(|t| has(&world, *t, Id::new(tags[0])) && !has(&world, *t, Id::new(tags[1])))
            .collect();
        prop_assert_eq!(got, expected);
    }

    /// Property: up traversal matches tables whose ancestor has the tag,
    /// and self_up additionally matches tables that own it.
    #[test]
    fn up_matches_brute_force(spec in world_strategy()) {
        let (world, tags, _) = build(&spec);
        let id = Id::new(tags[2]);

        let up = Query::new(QueryDesc::new().term(Term::new(id).up(CHILD_OF))).unwrap();
        let got: BTreeSet<TableId> = up.iter(&world).filter_map(|r| r.table).collect();
        let expected: BTreeSet<TableId> = world
            .tables()
            .iter()
            .copied()
            .filter(|t| world.table_count(*t) > 0 && ancestor_has(&world, *t, id))
            .collect();
        prop_assert_eq!(got, expected);

        let self_up = Query::new(QueryDesc::new().term(Term::new(id).self_up(CHILD_OF))).unwrap();
        let got: BTreeSet<TableId> = self_up.iter(&world).filter_map(|r| r.table).collect();
        let expected: BTreeSet<TableId> = world
            .tables()
            .iter()
            .copied()
            .filter(|t| world.table_count(*t) > 0)
            .filter(|t| has(&world, *t, id) || ancestor_has(&world, *t, id))
            .collect();
        prop_assert_eq!(got, expected);
    }

    /// Property: a wildcard pair term yields one result per matching pair.
    #[test]
    fn wildcard_multiplicity(spec in world_strategy()) {
        let (world, _, _) = build(&spec);
        let query = Query::new(QueryDesc::new().with(Id::pair(CHILD_OF, WILDCARD))).unwrap();

        let got = query.iter(&world).count();
        let expected: usize = world
            .tables()
            .iter()
            .filter(|t| world.table_count(**t) > 0)
            .map(|t| {
                world
                    .table_type(*t)
                    .iter()
                    .filter(|id| Id::pair(CHILD_OF, WILDCARD).matches(**id))
                    .count()
            })
            .sum();
        prop_assert_eq!(got, expected);
    }
}
