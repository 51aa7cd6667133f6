//! Slab storage for matches.
//!
//! Handles stay valid until the slot is removed. Freed slots are reused in
//! LIFO order so a cache that churns tables keeps a stable footprint.

use alloc::vec::Vec;

/// Handle of a match inside the arena.
pub type MatchId = usize;

/// A slab with a free list.
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Stores a value and returns its handle.
    pub fn insert(&mut self, value: T) -> MatchId {
        self.len += 1;
        match self.free.pop() {
            Some(id) => {
                debug_assert!(self.slots[id].is_none());
                self.slots[id] = Some(value);
                id
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        }
    }

    /// Removes a value, making its handle available for reuse.
    pub fn remove(&mut self, id: MatchId) -> Option<T> {
        let value = self.slots.get_mut(id)?.take()?;
        self.free.push(id);
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub fn get(&self, id: MatchId) -> Option<&T> {
        self.slots.get(id)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: MatchId) -> Option<&mut T> {
        self.slots.get_mut(id)?.as_mut()
    }

    /// Returns true if the handle refers to a live value.
    pub fn contains(&self, id: MatchId) -> bool {
        self.get(id).is_some()
    }

    /// Returns the number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the arena holds no values.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates live values with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (MatchId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|v| (id, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));

        assert_eq!(arena.remove(a), Some("a"));
        assert!(!arena.contains(a));
        assert_eq!(arena.remove(a), None);

        let c = arena.insert("c");
        assert_eq!(c, a);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.iter().count(), 2);
    }
}
