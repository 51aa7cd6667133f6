//! Query terms.
//!
//! A term is one clause of a query: an id pattern, where to look for it (the
//! source), an operator and the access intent of the field it produces.

use alloc::string::String;
use quarry_core::{Entity, Id};

/// Order of a cascade traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Order {
    /// Shallow tables first.
    #[default]
    Ascending,
    /// Deep tables first.
    Descending,
}

/// Upward traversal of a relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Traversal {
    /// Relationship to walk, e.g. `ChildOf`.
    pub rel: Entity,
    /// Try the subject itself before walking up.
    pub with_self: bool,
    /// Iterate in breadth-first order of relationship depth.
    pub cascade: Option<Order>,
}

/// Where a term looks for its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// The implicit subject (`$this`): the table being matched.
    This,
    /// An ancestor of the subject reached through a relationship.
    Up(Traversal),
    /// A fixed entity, independent of the matched table.
    Entity(Entity),
    /// A named variable. Only `this` is supported.
    Variable(String),
}

/// Term operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Oper {
    /// The id must be present.
    #[default]
    And,
    /// The id must be absent.
    Not,
    /// The id may be present.
    Optional,
}

/// Access intent of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InOut {
    /// Read-only for shared sources, read-write for owned ones.
    #[default]
    Default,
    /// Read only.
    In,
    /// Write only.
    Out,
    /// Read and write.
    InOut,
    /// Neither read nor written; the term only filters.
    None,
    /// Filter-only term that does not produce a field. Rejected by caches.
    Filter,
}

impl InOut {
    /// Returns true if the field is read, which makes it tracked by change detection.
    pub fn is_read(self) -> bool {
        matches!(self, InOut::Default | InOut::In | InOut::InOut)
    }

    /// Returns true if the field is written.
    pub fn is_write(self) -> bool {
        matches!(self, InOut::Default | InOut::Out | InOut::InOut)
    }
}

/// One clause of a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Term {
    pub id: Id,
    pub src: Source,
    pub oper: Oper,
    pub inout: InOut,
}

impl Term {
    /// Creates an `And` term on `$this`.
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            src: Source::This,
            oper: Oper::And,
            inout: InOut::Default,
        }
    }

    /// Looks for the id on ancestors reached through `rel`.
    pub fn up(mut self, rel: Entity) -> Self {
        self.src = Source::Up(Traversal {
            rel,
            with_self: false,
            cascade: None,
        });
        self
    }

    /// Looks for the id on the subject, then on ancestors reached through `rel`.
    pub fn self_up(mut self, rel: Entity) -> Self {
        self.src = Source::Up(Traversal {
            rel,
            with_self: true,
            cascade: None,
        });
        self
    }

    /// Upward traversal that also orders results by relationship depth.
    pub fn cascade(mut self, rel: Entity, order: Order) -> Self {
        self.src = Source::Up(Traversal {
            rel,
            with_self: false,
            cascade: Some(order),
        });
        self
    }

    /// Looks for the id on a fixed entity.
    pub fn src(mut self, entity: Entity) -> Self {
        self.src = Source::Entity(entity);
        self
    }

    /// Binds the term to a named variable.
    pub fn var(mut self, name: impl Into<String>) -> Self {
        self.src = Source::Variable(name.into());
        self
    }

    /// Requires the id to be absent.
    pub fn not(mut self) -> Self {
        self.oper = Oper::Not;
        self
    }

    /// Makes the id optional.
    pub fn optional(mut self) -> Self {
        self.oper = Oper::Optional;
        self
    }

    /// Sets the access intent.
    pub fn inout(mut self, inout: InOut) -> Self {
        self.inout = inout;
        self
    }

    /// Returns the traversal of an `Up` source.
    pub fn traversal(&self) -> Option<&Traversal> {
        match &self.src {
            Source::Up(trav) => Some(trav),
            _ => None,
        }
    }

    /// Returns true if the term's source is the matched table or one of its ancestors.
    pub fn is_this_relative(&self) -> bool {
        matches!(self.src, Source::This | Source::Up(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::CHILD_OF;

    #[test]
    fn test_term_builders() {
        let t = Term::new(20u32).self_up(CHILD_OF).optional();
        assert_eq!(t.oper, Oper::Optional);
        let trav = t.traversal().unwrap();
        assert!(trav.with_self);
        assert_eq!(trav.rel, CHILD_OF);
        assert!(t.is_this_relative());

        let fixed = Term::new(21u32).src(100);
        assert_eq!(fixed.src, Source::Entity(100));
        assert!(!fixed.is_this_relative());
    }

    #[test]
    fn test_inout_intent() {
        assert!(InOut::Default.is_read());
        assert!(!InOut::Out.is_read());
        assert!(!InOut::None.is_read());
        assert!(InOut::Out.is_write());
        assert!(!InOut::In.is_write());
    }
}
