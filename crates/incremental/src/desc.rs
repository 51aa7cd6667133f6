//! Cache descriptors.

use crate::group::GroupPolicy;
use crate::sort::Comparator;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::Ordering;
use quarry_core::{Entity, Id, Value};
use quarry_query::QueryDesc;

pub(crate) enum GroupBy {
    Relation(Entity),
    Policy(Box<dyn GroupPolicy>),
}

pub(crate) struct OrderSpec {
    pub(crate) id: Option<Id>,
    pub(crate) comparator: Box<dyn Comparator>,
}

/// A query descriptor plus cache-only options.
///
/// # Example
///
/// ```rust
/// use quarry_cache::CacheDesc;
/// use quarry_core::CHILD_OF;
/// use quarry_query::QueryDesc;
///
/// let desc = CacheDesc::new(QueryDesc::new().with(20u32))
///     .group_by(CHILD_OF)
///     .order_by(20u32, |e1, v1, e2, v2| v1.cmp(&v2).then(e1.cmp(&e2)));
/// assert_eq!(desc.query().terms().len(), 1);
/// ```
pub struct CacheDesc {
    pub(crate) query: QueryDesc,
    pub(crate) group_by: Vec<GroupBy>,
    pub(crate) order_by: Vec<OrderSpec>,
}

impl CacheDesc {
    pub fn new(query: QueryDesc) -> Self {
        Self {
            query,
            group_by: Vec::new(),
            order_by: Vec::new(),
        }
    }

    /// Groups tables by the target of their `(rel, *)` pair.
    pub fn group_by(mut self, rel: Entity) -> Self {
        self.group_by.push(GroupBy::Relation(rel));
        self
    }

    /// Groups tables with a custom policy.
    pub fn group_by_policy(mut self, policy: impl GroupPolicy + 'static) -> Self {
        self.group_by.push(GroupBy::Policy(Box::new(policy)));
        self
    }

    /// Orders rows by the value of a queried component.
    pub fn order_by<F>(self, id: impl Into<Id>, compare: F) -> Self
    where
        F: Fn(Entity, Option<&Value>, Entity, Option<&Value>) -> Ordering + 'static,
    {
        self.order_by_comparator(Some(id.into()), Box::new(compare))
    }

    /// Orders rows by entity only.
    pub fn order_by_entity<F>(self, compare: F) -> Self
    where
        F: Fn(Entity, Option<&Value>, Entity, Option<&Value>) -> Ordering + 'static,
    {
        self.order_by_comparator(None, Box::new(compare))
    }

    /// Orders rows with a boxed comparator. `id` None orders by entity only.
    ///
    /// A cache can be ordered once; a second clause fails the build.
    pub fn order_by_comparator(mut self, id: Option<Id>, comparator: Box<dyn Comparator>) -> Self {
        self.order_by.push(OrderSpec { id, comparator });
        self
    }

    pub fn query(&self) -> &QueryDesc {
        &self.query
    }
}

impl From<QueryDesc> for CacheDesc {
    fn from(query: QueryDesc) -> Self {
        Self::new(query)
    }
}
