//! Entity and id definitions.
//!
//! Every component, tag and relationship is itself an entity. An [`Id`] names
//! what a table stores: either a single entity (a component or tag) or a
//! `(relationship, target)` pair. Either half of a pair, or the whole id, may
//! be the [`WILDCARD`] entity when the id is used as a pattern.

use core::fmt;

/// Unique identifier of an entity. Zero is never a valid entity.
pub type Entity = u32;

/// Matches any id, or any relationship/target when used inside a pair.
pub const WILDCARD: Entity = 1;

/// Builtin hierarchy relationship.
pub const CHILD_OF: Entity = 2;

/// Builtin inheritance relationship.
pub const IS_A: Entity = 3;

/// First entity handed out to user code. Everything below is reserved.
pub const FIRST_USER_ENTITY: Entity = 16;

const PAIR_FLAG: u64 = 1 << 63;
const LO_MASK: u64 = 0xffff_ffff;
const HI_MASK: u64 = 0x7fff_ffff;

/// A component, tag or relationship pair.
///
/// Ids order pairs after plain ids and group pairs by relationship, so all
/// `(rel, *)` entries of a table type are contiguous.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    /// The plain wildcard id, matching every id.
    pub const WILDCARD: Id = Id(WILDCARD as u64);

    /// Creates an id for a plain component or tag.
    #[inline]
    pub const fn new(entity: Entity) -> Self {
        Id(entity as u64)
    }

    /// Creates a `(relationship, target)` pair.
    #[inline]
    pub const fn pair(rel: Entity, target: Entity) -> Self {
        Id(PAIR_FLAG | ((rel as u64 & HI_MASK) << 32) | (target as u64 & LO_MASK))
    }

    /// Returns the raw encoded value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns true if this id is a pair.
    #[inline]
    pub const fn is_pair(self) -> bool {
        self.0 & PAIR_FLAG != 0
    }

    /// Returns the component entity, or the relationship for a pair.
    #[inline]
    pub const fn first(self) -> Entity {
        if self.is_pair() {
            ((self.0 >> 32) & HI_MASK) as Entity
        } else {
            (self.0 & LO_MASK) as Entity
        }
    }

    /// Returns the target of a pair, or 0 for a plain id.
    #[inline]
    pub const fn second(self) -> Entity {
        if self.is_pair() {
            (self.0 & LO_MASK) as Entity
        } else {
            0
        }
    }

    /// Returns true if the id contains a wildcard anywhere.
    #[inline]
    pub fn is_wildcard(self) -> bool {
        if self.is_pair() {
            self.first() == WILDCARD || self.second() == WILDCARD
        } else {
            self.0 == WILDCARD as u64
        }
    }

    /// Returns true if the id is usable in a term or a table type.
    pub fn is_valid(self) -> bool {
        if self.is_pair() {
            self.first() != 0 && self.second() != 0
        } else {
            self.0 != 0
        }
    }

    /// Returns true if `self`, used as a pattern, matches `id`.
    pub fn matches(self, id: Id) -> bool {
        if self == id || self == Id::WILDCARD {
            return true;
        }
        if !self.is_pair() || !id.is_pair() {
            return false;
        }
        let rel = self.first();
        let tgt = self.second();
        (rel == WILDCARD || rel == id.first()) && (tgt == WILDCARD || tgt == id.second())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn name(f: &mut fmt::Formatter<'_>, e: Entity) -> fmt::Result {
            match e {
                WILDCARD => f.write_str("*"),
                CHILD_OF => f.write_str("ChildOf"),
                IS_A => f.write_str("IsA"),
                _ => write!(f, "#{}", e),
            }
        }
        if self.is_pair() {
            f.write_str("(")?;
            name(f, self.first())?;
            f.write_str(", ")?;
            name(f, self.second())?;
            f.write_str(")")
        } else {
            name(f, self.first())
        }
    }
}

impl From<Entity> for Id {
    fn from(entity: Entity) -> Self {
        Id::new(entity)
    }
}

/// Finds the first index at or after `start` in a sorted table type whose id
/// matches `pattern`.
pub fn find_id(ty: &[Id], pattern: Id, start: usize) -> Option<usize> {
    if start >= ty.len() {
        return None;
    }
    if !pattern.is_wildcard() {
        return ty[start..]
            .binary_search(&pattern)
            .ok()
            .map(|i| i + start);
    }
    ty[start..]
        .iter()
        .position(|id| pattern.matches(*id))
        .map(|i| i + start)
}
