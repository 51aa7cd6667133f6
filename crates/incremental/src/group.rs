//! Grouping of matches.
//!
//! A group policy maps every matched table to a group id. Matches of one
//! group are contiguous in the iteration list and groups are visited in key
//! order. Ungrouped caches use a single group with id 0.

use alloc::boxed::Box;
use core::any::Any;
use core::fmt;
use quarry_core::{find_id, Entity, Id, Storage, TableId, WILDCARD};
use quarry_query::{relation_depth, Order};

/// Key of a group.
pub type GroupId = u64;

/// Bookkeeping exposed for every live group.
#[derive(Default)]
pub struct GroupInfo {
    /// Number of matches currently linked into the group.
    pub table_count: usize,
    /// Bumped every time a match joins or leaves the group.
    pub match_count: u64,
    /// Value returned by the policy's create hook.
    pub ctx: Option<Box<dyn Any>>,
}

impl fmt::Debug for GroupInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupInfo")
            .field("table_count", &self.table_count)
            .field("match_count", &self.match_count)
            .field("ctx", &self.ctx.is_some())
            .finish()
    }
}

/// Decides the group of a table and observes group lifetimes.
///
/// Hooks cannot fail.
pub trait GroupPolicy {
    /// Returns the group id of a table.
    fn group_id(&self, storage: &dyn Storage, table: TableId) -> GroupId;

    /// Called when a group receives its first match. The returned value is
    /// stored in [`GroupInfo::ctx`].
    fn on_create(&mut self, _group: GroupId) -> Option<Box<dyn Any>> {
        None
    }

    /// Called when a group loses its last match, or when the cache is torn down.
    fn on_delete(&mut self, _group: GroupId, _ctx: Option<Box<dyn Any>>) {}
}

/// Groups tables by the target of their first `(rel, *)` pair, 0 when absent.
#[derive(Clone, Copy, Debug)]
pub struct RelationTargetPolicy {
    rel: Entity,
}

impl RelationTargetPolicy {
    pub fn new(rel: Entity) -> Self {
        Self { rel }
    }
}

impl GroupPolicy for RelationTargetPolicy {
    fn group_id(&self, storage: &dyn Storage, table: TableId) -> GroupId {
        let ty = storage.table_type(table);
        find_id(ty, Id::pair(self.rel, WILDCARD), 0)
            .map(|index| ty[index].second() as GroupId)
            .unwrap_or(0)
    }
}

/// Groups tables by their depth in a relationship hierarchy.
#[derive(Clone, Copy, Debug)]
pub struct CascadePolicy {
    rel: Entity,
}

impl CascadePolicy {
    pub fn new(rel: Entity) -> Self {
        Self { rel }
    }
}

impl GroupPolicy for CascadePolicy {
    fn group_id(&self, storage: &dyn Storage, table: TableId) -> GroupId {
        relation_depth(storage, self.rel, table) as GroupId
    }
}

/// Closures can be used as plain group-id policies.
impl<F> GroupPolicy for F
where
    F: Fn(&dyn Storage, TableId) -> GroupId,
{
    fn group_id(&self, storage: &dyn Storage, table: TableId) -> GroupId {
        self(storage, table)
    }
}

/// A live group: its slice of the iteration list plus public info.
#[derive(Debug, Default)]
pub(crate) struct Group {
    pub(crate) first: Option<usize>,
    pub(crate) last: Option<usize>,
    pub(crate) info: GroupInfo,
}

/// Direction of group keys in the iteration list.
pub(crate) fn is_descending(order: Option<Order>) -> bool {
    matches!(order, Some(Order::Descending))
}
