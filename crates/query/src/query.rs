//! Uncached queries.

use crate::compiler::{compile, Plan};
use crate::desc::QueryDesc;
use crate::engine::{PlanIter, QueryResult};
use crate::term::Term;
use crate::traverse::TraversalCache;
use quarry_core::{Result, Storage, TableId};

/// A compiled query evaluated from scratch on every iteration.
#[derive(Clone, Debug)]
pub struct Query {
    desc: QueryDesc,
    plan: Plan,
}

impl Query {
    /// Compiles a query.
    pub fn new(desc: QueryDesc) -> Result<Self> {
        let plan = compile(&desc)?;
        tracing::debug!(fields = plan.field_count(), "compiled query\n{}", plan);
        Ok(Self { desc, plan })
    }

    /// Returns the descriptor the query was built from.
    pub fn desc(&self) -> &QueryDesc {
        &self.desc
    }

    /// Returns the compiled plan.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Returns the validated terms.
    pub fn terms(&self) -> &[Term] {
        self.plan.terms()
    }

    /// Returns the number of fields.
    pub fn field_count(&self) -> usize {
        self.plan.field_count()
    }

    /// Iterates every table satisfying the query.
    pub fn iter<'a>(&'a self, storage: &'a dyn Storage) -> QueryIter<'a> {
        QueryIter {
            iter: PlanIter::new(&self.plan),
            storage,
            trav: TraversalCache::new(),
        }
    }

    /// Iterates the results for a single table.
    pub fn iter_table<'a>(&'a self, storage: &'a dyn Storage, table: TableId) -> QueryIter<'a> {
        QueryIter {
            iter: PlanIter::with_table(&self.plan, table),
            storage,
            trav: TraversalCache::new(),
        }
    }

    /// Returns true if the table satisfies the query.
    pub fn matches_table(&self, storage: &dyn Storage, table: TableId) -> bool {
        self.iter_table(storage, table).next().is_some()
    }
}

/// Iterator over the results of an uncached query.
pub struct QueryIter<'a> {
    iter: PlanIter<'a>,
    storage: &'a dyn Storage,
    trav: TraversalCache,
}

impl Iterator for QueryIter<'_> {
    type Item = QueryResult;

    fn next(&mut self) -> Option<QueryResult> {
        if self.iter.next(self.storage, &mut self.trav) {
            Some(self.iter.result().clone())
        } else {
            None
        }
    }
}
