//! Quarry Storage - Reference archetype store for the Quarry query engine.
//!
//! This crate provides a small in-memory entity/component store implementing
//! the `quarry_core::Storage` contract:
//!
//! - `World`: entity records, archetype tables, relationship bookkeeping and
//!   the structural event queue
//! - `Table`: columnar storage for one archetype with per-column write versions
//!
//! # Example
//!
//! ```rust
//! use quarry_core::{Event, Id, Storage, Value, CHILD_OF};
//! use quarry_storage::World;
//!
//! let mut world = World::new();
//! let position = world.component();
//!
//! let parent = world.spawn();
//! let child = world.spawn();
//! world.set(child, position, 10i64).unwrap();
//! world.add(child, Id::pair(CHILD_OF, parent)).unwrap();
//!
//! assert_eq!(world.get(child, position), Some(&Value::Int64(10)));
//! assert!(world.is_traversable(parent));
//!
//! let table = world.record(child).unwrap().table;
//! assert!(world.drain_events().contains(&Event::TableCreate(table)));
//! ```

#![no_std]

extern crate alloc;

pub mod table;
pub mod world;

pub use table::Table;
pub use world::{Record, World, ROOT_TABLE};
