//! Quarry Observer - Event routing for Quarry query caches.
//!
//! Storage reports structural changes as a queue of events. This crate keeps
//! a registry of live caches and forwards each drained batch to all of them,
//! turning monitor-generation bumps into rematch requests.
//!
//! # Core Concepts
//!
//! - `QueryRegistry`: weakly holds registered caches and dispatches events
//! - `QueryId`: handle returned by registration
//!
//! # Example
//!
//! ```rust
//! use core::cell::RefCell;
//! use quarry_cache::QueryCache;
//! use quarry_core::{Id, CHILD_OF};
//! use quarry_observer::QueryRegistry;
//! use quarry_query::{QueryDesc, Term};
//! use quarry_storage::World;
//! use std::rc::Rc;
//!
//! let mut world = World::new();
//! let position = world.component();
//! let parent = world.spawn();
//! let child = world.spawn();
//! world.add(child, Id::pair(CHILD_OF, parent)).unwrap();
//!
//! let inherited = QueryDesc::new().term(Term::new(position).up(CHILD_OF));
//! let cache = Rc::new(RefCell::new(QueryCache::build(&mut world, inherited).unwrap()));
//! let mut registry = QueryRegistry::new();
//! registry.register(cache.clone());
//! let events = world.drain_events();
//! registry.dispatch(&world, events);
//!
//! // the parent gaining a position rematches the child's table
//! world.set(parent, position, 1i64).unwrap();
//! let events = world.drain_events();
//! registry.dispatch(&world, events);
//! assert_eq!(cache.borrow().table_count(), 1);
//! ```

#![no_std]

extern crate alloc;

pub mod notify;

pub use notify::{QueryId, QueryRegistry};

// Re-export commonly used types from dependencies
pub use quarry_cache::QueryCache;
pub use quarry_core::Event;
