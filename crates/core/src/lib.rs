//! Quarry Core - Core types for the Quarry entity/component query engine.
//!
//! This crate provides the vocabulary shared by every Quarry crate:
//!
//! - `Entity` / `Id`: entity handles, component ids and relationship pairs
//! - `Value`: component data stored in table columns
//! - `Storage`: the read contract the query engine needs from a table store
//! - `Event`: structural notifications delivered to query caches
//! - `Error`: Error types for query and storage operations
//!
//! # Example
//!
//! ```rust
//! use quarry_core::{find_id, Id, CHILD_OF, WILDCARD};
//!
//! let ty = [Id::new(20), Id::new(21), Id::pair(CHILD_OF, 40)];
//!
//! assert_eq!(find_id(&ty, Id::new(21), 0), Some(1));
//! assert_eq!(find_id(&ty, Id::pair(CHILD_OF, WILDCARD), 0), Some(2));
//! assert_eq!(ty[2].second(), 40);
//! ```

#![no_std]

extern crate alloc;

mod error;
mod id;
mod storage;
mod value;

pub use error::{Error, Result};
pub use id::{find_id, Entity, Id, CHILD_OF, FIRST_USER_ENTITY, IS_A, WILDCARD};
pub use storage::{Event, Storage, TableId};
pub use value::Value;
