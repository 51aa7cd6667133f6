//! Query registry and event routing.
//!
//! This module provides `QueryRegistry`, which tracks live query caches and
//! forwards drained storage events to each of them.

use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use hashbrown::HashMap;
use quarry_cache::QueryCache;
use quarry_core::{Event, Storage};

/// Unique identifier for a registered cache.
pub type QueryId = u64;

/// A registry that routes storage events to every registered cache.
///
/// Caches are held weakly: dropping the last strong reference removes a
/// cache from dispatch without unregistering it.
///
/// # Example
///
/// ```rust
/// use core::cell::RefCell;
/// use quarry_cache::QueryCache;
/// use quarry_observer::QueryRegistry;
/// use quarry_query::QueryDesc;
/// use quarry_storage::World;
/// use std::rc::Rc;
///
/// let mut world = World::new();
/// let position = world.component();
/// let cache = QueryCache::build(&mut world, QueryDesc::new().with(position)).unwrap();
/// let cache = Rc::new(RefCell::new(cache));
///
/// let mut registry = QueryRegistry::new();
/// registry.register(cache.clone());
///
/// let e = world.spawn();
/// world.set(e, position, 1i64).unwrap();
/// let events = world.drain_events();
/// registry.dispatch(&world, events);
///
/// assert_eq!(cache.borrow().table_count(), 1);
/// ```
pub struct QueryRegistry {
    /// Query ID -> cache reference
    queries: HashMap<QueryId, Weak<RefCell<QueryCache>>>,
    /// Next query ID to assign
    next_id: QueryId,
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            queries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a cache and returns its ID.
    pub fn register(&mut self, cache: Rc<RefCell<QueryCache>>) -> QueryId {
        let id = self.next_id;
        self.next_id += 1;
        self.queries.insert(id, Rc::downgrade(&cache));
        id
    }

    /// Unregisters a cache by ID.
    ///
    /// Returns true if the cache was found and removed.
    pub fn unregister(&mut self, query_id: QueryId) -> bool {
        self.queries.remove(&query_id).is_some()
    }

    /// Returns the cache registered under an ID, if it is still alive.
    pub fn get(&self, query_id: QueryId) -> Option<Rc<RefCell<QueryCache>>> {
        self.queries.get(&query_id).and_then(Weak::upgrade)
    }

    fn live(&self) -> Vec<(QueryId, Rc<RefCell<QueryCache>>)> {
        let mut live: Vec<_> = self
            .queries
            .iter()
            .filter_map(|(id, w)| w.upgrade().map(|cache| (*id, cache)))
            .collect();
        live.sort_by_key(|(id, _)| *id);
        live
    }

    /// Forwards events to every live cache, in registration order.
    ///
    /// Every cache also receives a trailing `Rematch`, which it ignores unless
    /// the storage's monitor generation moved since its last pass. Returns
    /// the number of caches reached.
    ///
    /// # Panics
    ///
    /// Panics if a registered cache is currently borrowed.
    pub fn dispatch(&mut self, storage: &dyn Storage, events: impl IntoIterator<Item = Event>) -> usize {
        let events: Vec<Event> = events.into_iter().collect();

        let live = self.live();
        for (id, cache) in &live {
            let mut cache = cache.borrow_mut();
            for event in &events {
                cache.notify(storage, *event);
            }
            let passes = cache.rematch_count();
            cache.notify(storage, Event::Rematch);
            let rematched = cache.rematch_count() != passes;
            tracing::trace!(query = *id, events = events.len(), rematched, "events dispatched");
        }

        if live.len() != self.queries.len() {
            self.cleanup();
        }
        live.len()
    }

    /// Returns the IDs of live caches whose results changed since their
    /// last sync, and syncs them.
    pub fn take_changed(&self, storage: &dyn Storage) -> Vec<QueryId> {
        let mut changed = Vec::new();
        for (id, cache) in self.live() {
            let mut cache = cache.borrow_mut();
            if cache.changed(storage) {
                cache.sync(storage);
                changed.push(id);
            }
        }
        changed
    }

    /// Returns the number of registered caches.
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Returns true if there are no registered caches.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Removes entries whose cache was dropped. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let before = self.queries.len();
        self.queries.retain(|_, w| w.strong_count() > 0);
        let removed = before - self.queries.len();
        if removed > 0 {
            tracing::debug!(removed, "dropped caches unregistered");
        }
        removed
    }

    /// Clears all registered caches.
    pub fn clear(&mut self) {
        self.queries.clear();
    }
}
