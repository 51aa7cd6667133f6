//! Query descriptors.

use crate::term::Term;
use alloc::vec::Vec;
use quarry_core::Id;

/// Maximum number of terms in a query. Field sets are 64-bit masks.
pub const MAX_TERMS: usize = 64;

/// Declarative description of a query.
///
/// # Example
///
/// ```rust
/// use quarry_query::{QueryDesc, Term};
/// use quarry_core::CHILD_OF;
///
/// let desc = QueryDesc::new()
///     .with(20u32)
///     .without(21u32)
///     .term(Term::new(22u32).up(CHILD_OF));
///
/// assert_eq!(desc.terms().len(), 3);
/// ```
#[derive(Clone, Debug, Default)]
pub struct QueryDesc {
    terms: Vec<Term>,
    match_empty_tables: bool,
    detect_changes: bool,
}

impl QueryDesc {
    /// Creates an empty descriptor. A query without terms matches once.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an `And` term on `$this`.
    pub fn with(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id))
    }

    /// Adds a `Not` term on `$this`.
    pub fn without(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).not())
    }

    /// Adds an `Optional` term on `$this`.
    pub fn optional(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).optional())
    }

    /// Adds a term.
    pub fn term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    /// Also yield tables that currently have no entities.
    pub fn match_empty_tables(mut self, yes: bool) -> Self {
        self.match_empty_tables = yes;
        self
    }

    /// Keep per-field monitors so callers can ask whether results changed.
    pub fn detect_changes(mut self, yes: bool) -> Self {
        self.detect_changes = yes;
        self
    }

    /// Returns the terms.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Returns true if empty tables are yielded.
    pub fn matches_empty_tables(&self) -> bool {
        self.match_empty_tables
    }

    /// Returns true if change detection was requested.
    pub fn detects_changes(&self) -> bool {
        self.detect_changes
    }
}
