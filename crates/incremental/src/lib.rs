//! Quarry Cache - Incrementally maintained query caches.
//!
//! A [`QueryCache`] evaluates a query once and then keeps an index of the
//! tables that satisfy it, updated from storage events instead of
//! re-evaluation.
//!
//! # Core Concepts
//!
//! - `Match`: one resolution of the cached terms against one table. Wildcard
//!   terms can produce several matches per table
//! - `TableRecord`: per-table state, split into non-empty and empty partitions
//! - Groups: contiguous, key-ordered runs of the iteration list, keyed by a
//!   `GroupPolicy` (relationship target or cascade depth)
//! - Ordering: a `Comparator` over one component, merged lazily into sorted
//!   slices
//! - Monitors: per-match write versions backing `changed` and `sync`
//! - Write sets: columns written through an iteration, applied back to
//!   storage so that other caches observe them
//!
//! # Example
//!
//! ```rust
//! use quarry_cache::QueryCache;
//! use quarry_core::Event;
//! use quarry_query::QueryDesc;
//! use quarry_storage::World;
//!
//! let mut world = World::new();
//! let position = world.component();
//! let mut cache = QueryCache::build(&mut world, QueryDesc::new().with(position)).unwrap();
//! world.drain_events();
//!
//! let e = world.spawn();
//! world.set(e, position, 1i64).unwrap();
//! for event in world.drain_events() {
//!     cache.notify(&world, event);
//! }
//!
//! assert_eq!(cache.table_count(), 1);
//! assert_eq!(cache.iter(&world).count(), 1);
//! ```

#![no_std]

extern crate alloc;

pub mod arena;
pub mod block;
pub mod cache;
pub mod desc;
pub mod group;
pub mod iter;
mod list;
pub mod matches;
mod monitor;
pub mod sort;
pub mod table_index;
mod validate;

pub use arena::{Arena, MatchId};
pub use block::BlockPool;
pub use cache::QueryCache;
pub use desc::CacheDesc;
pub use group::{CascadePolicy, GroupId, GroupInfo, GroupPolicy, RelationTargetPolicy};
pub use iter::{CacheIter, CacheResult, FixedField, Rows, WriteSet};
pub use matches::{Match, StorageColumn};
pub use sort::{by_entity, by_value, Comparator, SortedSlice};
pub use table_index::{TableIndex, TableRecord};
