//! Quarry Query - Query compiler and plan execution engine.
//!
//! This crate turns declarative queries into executable plans and runs them
//! against any `quarry_core::Storage`:
//!
//! - `term`: Terms, sources, operators and access intent
//! - `desc`: `QueryDesc` builder
//! - `compiler`: Compiles terms into a linear `Plan` with variable masks
//! - `engine`: `PlanIter`, the resumable backtracking interpreter
//! - `traverse`: Memoized up/down relationship walks
//! - `query`: `Query`, the uncached query API
//!
//! # Example
//!
//! ```rust
//! use quarry_core::{Id, CHILD_OF};
//! use quarry_query::{Query, QueryDesc, Term};
//! use quarry_storage::World;
//!
//! let mut world = World::new();
//! let position = world.component();
//! let parent = world.spawn();
//! let child = world.spawn();
//! world.set(parent, position, 1i64).unwrap();
//! world.add(child, Id::pair(CHILD_OF, parent)).unwrap();
//!
//! let query = Query::new(QueryDesc::new().term(Term::new(position).up(CHILD_OF))).unwrap();
//! let results: Vec<_> = query.iter(&world).collect();
//!
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0].sources[0], parent);
//! ```

#![no_std]

extern crate alloc;

pub mod compiler;
pub mod desc;
pub mod engine;
pub mod query;
pub mod term;
pub mod traverse;

pub use compiler::{compile, Op, OpKind, Plan, VarId, THIS_VAR};
pub use desc::{QueryDesc, MAX_TERMS};
pub use engine::{PlanIter, QueryResult};
pub use query::{Query, QueryIter};
pub use term::{InOut, Oper, Order, Source, Term, Traversal};
pub use traverse::{relation_depth, DownElem, TraversalCache, UpMatch, MAX_TRAVERSAL_DEPTH};
