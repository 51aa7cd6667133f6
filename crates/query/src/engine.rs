//! Plan execution engine.
//!
//! `PlanIter` interprets a compiled [`Plan`] as a resumable state machine.
//! Every instruction keeps a cursor in [`OpCtx`]; on backtrack ("redo") an
//! instruction resumes from its cursor to produce its next result, or fails so
//! the previous instruction gets redone. Reaching `Yield` produces a result.
//!
//! The engine never mutates storage. It can be narrowed to a single table, in
//! which case table-enumerating instructions only test that table.

use crate::compiler::{OpKind, Plan};
use crate::term::{Source, Term};
use crate::traverse::{DownElem, TraversalCache};
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use quarry_core::{find_id, Entity, Id, Storage, TableId};

/// Output of one plan evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// Matched table, None for queries that do not bind `$this`.
    pub table: Option<TableId>,
    /// Resolved id per field.
    pub ids: Vec<Id>,
    /// Source entity per field, 0 when the field comes from the table itself.
    pub sources: Vec<Entity>,
    /// Position of the id in the source's table type, None when not set.
    pub columns: Vec<Option<usize>>,
    /// Fields that were resolved.
    pub set_fields: u64,
    /// Fields resolved through relationship traversal.
    pub up_fields: u64,
}

impl QueryResult {
    fn for_plan(plan: &Plan) -> Self {
        let terms = plan.terms();
        Self {
            table: None,
            ids: terms.iter().map(|t| t.id).collect(),
            sources: terms.iter().map(fixed_source).collect(),
            columns: vec![None; terms.len()],
            set_fields: 0,
            up_fields: 0,
        }
    }

    /// Returns true if the field was resolved.
    #[inline]
    pub fn is_set(&self, field: usize) -> bool {
        self.set_fields & (1 << field) != 0
    }
}

fn fixed_source(term: &Term) -> Entity {
    match term.src {
        Source::Entity(e) => e,
        _ => 0,
    }
}

/// Resolution of a single field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Resolved {
    id: Id,
    src: Entity,
    column: usize,
    up: bool,
}

/// Per-instruction cursor.
#[derive(Clone, Debug, Default)]
enum OpCtx {
    #[default]
    Idle,
    Select {
        pos: usize,
        column: usize,
    },
    SelectAll {
        pos: usize,
    },
    With {
        column: usize,
    },
    SelfUp {
        self_column: Option<usize>,
    },
    UpSelect(UpSelectCtx),
}

#[derive(Clone, Debug, Default)]
struct UpSelectCtx {
    /// Still enumerating tables that own the id.
    self_phase: bool,
    self_pos: usize,
    self_column: usize,
    /// Position in the list of tables owning the id.
    owner_pos: usize,
    /// Row of the current owner entity inside its table.
    row: usize,
    owner: Option<Resolved>,
    elems: Option<Rc<Vec<DownElem>>>,
    elem: usize,
}

/// Resumable evaluation of a plan.
pub struct PlanIter<'p> {
    plan: &'p Plan,
    ctx: Vec<OpCtx>,
    vars: Vec<Entity>,
    this: Option<TableId>,
    constrained: bool,
    result: QueryResult,
    started: bool,
    done: bool,
}

impl<'p> PlanIter<'p> {
    /// Creates an iterator over every table satisfying the plan.
    pub fn new(plan: &'p Plan) -> Self {
        Self {
            plan,
            ctx: vec![OpCtx::Idle; plan.ops().len()],
            vars: vec![0; plan.var_count()],
            this: None,
            constrained: false,
            result: QueryResult::for_plan(plan),
            started: false,
            done: false,
        }
    }

    /// Creates an iterator that only tests `table`.
    pub fn with_table(plan: &'p Plan, table: TableId) -> Self {
        let mut it = Self::new(plan);
        it.this = Some(table);
        it.constrained = true;
        it
    }

    /// Returns the last produced result.
    pub fn result(&self) -> &QueryResult {
        &self.result
    }

    /// Returns the value of a variable. `$this` is not an entity variable.
    pub fn var(&self, var: usize) -> Entity {
        self.vars.get(var).copied().unwrap_or(0)
    }

    /// Advances to the next result. Returns false when exhausted.
    pub fn next(&mut self, storage: &dyn Storage, trav: &mut TraversalCache) -> bool {
        if self.done {
            return false;
        }
        let plan = self.plan;
        let ops = plan.ops();
        let (mut pc, mut redo) = if self.started {
            (ops.len() - 1, true)
        } else {
            self.started = true;
            (0, false)
        };

        loop {
            if self.eval(pc, redo, storage, trav) {
                if ops[pc].kind == OpKind::Yield {
                    self.result.table = self.this;
                    return true;
                }
                pc += 1;
                redo = false;
            } else {
                if pc == 0 {
                    self.done = true;
                    return false;
                }
                pc -= 1;
                redo = true;
            }
        }
    }

    fn eval(&mut self, pc: usize, redo: bool, storage: &dyn Storage, trav: &mut TraversalCache) -> bool {
        let op = self.plan.ops()[pc];
        let Some(field) = op.field else {
            return match op.kind {
                OpKind::SelectAll => self.eval_select_all(pc, redo, storage),
                _ => !redo,
            };
        };
        match op.kind {
            OpKind::Select if self.constrained => self.eval_with(pc, field, redo, storage),
            OpKind::Select => self.eval_select(pc, field, redo, storage),
            OpKind::UpSelect if self.constrained => {
                if self.traversal(field).map(|(_, with_self)| with_self).unwrap_or(false) {
                    self.eval_self_up(pc, field, redo, storage, trav)
                } else {
                    self.eval_up(field, redo, storage, trav)
                }
            }
            OpKind::UpSelect => self.eval_up_select(pc, field, redo, storage, trav),
            OpKind::With => self.eval_with(pc, field, redo, storage),
            OpKind::Up => self.eval_up(field, redo, storage, trav),
            OpKind::SelfUp => self.eval_self_up(pc, field, redo, storage, trav),
            OpKind::Fixed => {
                if redo {
                    return false;
                }
                match self.check(field, storage, trav) {
                    Some(r) => {
                        self.set_field(field, r);
                        true
                    }
                    None => false,
                }
            }
            OpKind::Optional => {
                if redo {
                    return false;
                }
                match self.check(field, storage, trav) {
                    Some(r) => self.set_field(field, r),
                    None => self.unset_field(field),
                }
                true
            }
            OpKind::Not => {
                if redo {
                    return false;
                }
                if self.check(field, storage, trav).is_some() {
                    return false;
                }
                self.unset_field(field);
                true
            }
            OpKind::SelectAll | OpKind::Yield => !redo,
        }
    }

    fn term(&self, field: usize) -> &Term {
        &self.plan.terms()[field]
    }

    fn traversal(&self, field: usize) -> Option<(Entity, bool)> {
        self.term(field).traversal().map(|t| (t.rel, t.with_self))
    }

    fn skip_table(&self, storage: &dyn Storage, table: TableId) -> bool {
        !self.plan.matches_empty_tables() && storage.table_count(table) == 0
    }

    fn eval_select(&mut self, pc: usize, field: usize, redo: bool, storage: &dyn Storage) -> bool {
        let id = self.term(field).id;
        let tables = storage.tables_with(id);
        let (mut pos, mut start) = match (&self.ctx[pc], redo) {
            (OpCtx::Select { pos, column }, true) => (*pos, *column + 1),
            _ => (0, 0),
        };
        while let Some(&table) = tables.get(pos) {
            if !self.skip_table(storage, table) {
                let ty = storage.table_type(table);
                if let Some(column) = find_id(ty, id, start) {
                    self.ctx[pc] = OpCtx::Select { pos, column };
                    self.this = Some(table);
                    self.set_field(
                        field,
                        Resolved {
                            id: ty[column],
                            src: 0,
                            column,
                            up: false,
                        },
                    );
                    return true;
                }
            }
            pos += 1;
            start = 0;
        }
        false
    }

    fn eval_select_all(&mut self, pc: usize, redo: bool, storage: &dyn Storage) -> bool {
        if self.constrained {
            return !redo;
        }
        let mut pos = match (&self.ctx[pc], redo) {
            (OpCtx::SelectAll { pos }, true) => *pos + 1,
            _ => 0,
        };
        let tables = storage.tables();
        while let Some(&table) = tables.get(pos) {
            if !self.skip_table(storage, table) {
                self.ctx[pc] = OpCtx::SelectAll { pos };
                self.this = Some(table);
                return true;
            }
            pos += 1;
        }
        false
    }

    fn eval_with(&mut self, pc: usize, field: usize, redo: bool, storage: &dyn Storage) -> bool {
        let Some(table) = self.this else {
            return false;
        };
        let start = match (&self.ctx[pc], redo) {
            (OpCtx::With { column }, true) => *column + 1,
            (_, true) => return false,
            _ => 0,
        };
        let id = self.term(field).id;
        let ty = storage.table_type(table);
        match find_id(ty, id, start) {
            Some(column) => {
                self.ctx[pc] = OpCtx::With { column };
                self.set_field(
                    field,
                    Resolved {
                        id: ty[column],
                        src: 0,
                        column,
                        up: false,
                    },
                );
                true
            }
            None => false,
        }
    }

    fn eval_up(&mut self, field: usize, redo: bool, storage: &dyn Storage, trav: &mut TraversalCache) -> bool {
        if redo {
            return false;
        }
        match self.resolve_up(field, storage, trav) {
            Some(r) => {
                self.set_field(field, r);
                true
            }
            None => false,
        }
    }

    fn eval_self_up(
        &mut self,
        pc: usize,
        field: usize,
        redo: bool,
        storage: &dyn Storage,
        trav: &mut TraversalCache,
    ) -> bool {
        let Some(table) = self.this else {
            return false;
        };
        let id = self.term(field).id;
        let ty = storage.table_type(table);
        if redo {
            // Only self matches can have more than one resolution.
            let Some(OpCtx::SelfUp {
                self_column: Some(prev),
            }) = self.ctx.get(pc)
            else {
                return false;
            };
            return match find_id(ty, id, prev + 1) {
                Some(column) => {
                    self.ctx[pc] = OpCtx::SelfUp {
                        self_column: Some(column),
                    };
                    self.set_field(
                        field,
                        Resolved {
                            id: ty[column],
                            src: 0,
                            column,
                            up: false,
                        },
                    );
                    true
                }
                None => false,
            };
        }

        if let Some(column) = find_id(ty, id, 0) {
            self.ctx[pc] = OpCtx::SelfUp {
                self_column: Some(column),
            };
            self.set_field(
                field,
                Resolved {
                    id: ty[column],
                    src: 0,
                    column,
                    up: false,
                },
            );
            return true;
        }
        self.ctx[pc] = OpCtx::SelfUp { self_column: None };
        self.eval_up(field, false, storage, trav)
    }

    fn eval_up_select(
        &mut self,
        pc: usize,
        field: usize,
        redo: bool,
        storage: &dyn Storage,
        trav: &mut TraversalCache,
    ) -> bool {
        let Some((rel, with_self)) = self.traversal(field) else {
            return false;
        };
        let id = self.term(field).id;
        let mut ctx = match (core::mem::take(&mut self.ctx[pc]), redo) {
            (OpCtx::UpSelect(ctx), true) => ctx,
            _ => UpSelectCtx {
                self_phase: with_self,
                ..UpSelectCtx::default()
            },
        };

        let found = self.next_up_select(&mut ctx, field, id, rel, redo, storage, trav);
        self.ctx[pc] = OpCtx::UpSelect(ctx);
        found
    }

    #[allow(clippy::too_many_arguments)]
    fn next_up_select(
        &mut self,
        ctx: &mut UpSelectCtx,
        field: usize,
        id: Id,
        rel: Entity,
        redo: bool,
        storage: &dyn Storage,
        trav: &mut TraversalCache,
    ) -> bool {
        let owners = storage.tables_with(id);
        let with_self = self.traversal(field).map(|(_, s)| s).unwrap_or(false);

        if ctx.self_phase {
            let mut start = if redo { ctx.self_column + 1 } else { 0 };
            while let Some(&table) = owners.get(ctx.self_pos) {
                if !self.skip_table(storage, table) {
                    let ty = storage.table_type(table);
                    if let Some(column) = find_id(ty, id, start) {
                        ctx.self_column = column;
                        self.this = Some(table);
                        self.set_field(
                            field,
                            Resolved {
                                id: ty[column],
                                src: 0,
                                column,
                                up: false,
                            },
                        );
                        return true;
                    }
                }
                ctx.self_pos += 1;
                start = 0;
            }
            ctx.self_phase = false;
        }

        loop {
            if let (Some(elems), Some(owner)) = (ctx.elems.clone(), ctx.owner) {
                while let Some(elem) = elems.get(ctx.elem).copied() {
                    ctx.elem += 1;
                    // Tables owning the id were produced by the self phase.
                    if (with_self && elem.leaf) || self.skip_table(storage, elem.table) {
                        continue;
                    }
                    self.this = Some(elem.table);
                    self.set_field(field, owner);
                    return true;
                }
                ctx.elems = None;
                ctx.owner = None;
                ctx.row += 1;
            }

            let Some(&owner_table) = owners.get(ctx.owner_pos) else {
                return false;
            };
            let entities = storage.table_entities(owner_table);
            let Some(&entity) = entities.get(ctx.row) else {
                ctx.owner_pos += 1;
                ctx.row = 0;
                continue;
            };
            if !storage.is_traversable(entity) {
                ctx.row += 1;
                continue;
            }
            let ty = storage.table_type(owner_table);
            let Some(column) = find_id(ty, id, 0) else {
                ctx.row += 1;
                continue;
            };
            ctx.owner = Some(Resolved {
                id: ty[column],
                src: entity,
                column,
                up: true,
            });
            ctx.elems = Some(trav.down(storage, rel, entity, id));
            ctx.elem = 0;
        }
    }

    fn resolve_up(&self, field: usize, storage: &dyn Storage, trav: &mut TraversalCache) -> Option<Resolved> {
        let table = self.this?;
        let (rel, _) = self.traversal(field)?;
        let id = self.term(field).id;
        trav.up(storage, table, rel, id).map(|m| Resolved {
            id: m.id,
            src: m.src,
            column: m.column,
            up: true,
        })
    }

    /// Evaluates a term once, without enumerating alternatives.
    fn check(&self, field: usize, storage: &dyn Storage, trav: &mut TraversalCache) -> Option<Resolved> {
        let term = self.term(field);
        let id = term.id;
        let own = |table: TableId| {
            let ty = storage.table_type(table);
            find_id(ty, id, 0).map(|column| (ty[column], column))
        };
        match &term.src {
            Source::This | Source::Variable(_) => {
                let (id, column) = own(self.this?)?;
                Some(Resolved {
                    id,
                    src: 0,
                    column,
                    up: false,
                })
            }
            Source::Up(t) => {
                if t.with_self {
                    if let Some((id, column)) = self.this.and_then(own) {
                        return Some(Resolved {
                            id,
                            src: 0,
                            column,
                            up: false,
                        });
                    }
                }
                self.resolve_up(field, storage, trav)
            }
            Source::Entity(e) => {
                let (table, _) = storage.entity_table(*e)?;
                let (id, column) = own(table)?;
                Some(Resolved {
                    id,
                    src: *e,
                    column,
                    up: false,
                })
            }
        }
    }

    fn set_field(&mut self, field: usize, r: Resolved) {
        let bit = 1u64 << field;
        self.result.ids[field] = r.id;
        self.result.sources[field] = r.src;
        self.result.columns[field] = Some(r.column);
        self.result.set_fields |= bit;
        if r.up {
            self.result.up_fields |= bit;
        } else {
            self.result.up_fields &= !bit;
        }
        if let Some(var) = self.plan.field_var(field) {
            self.vars[var] = r.src;
        }
    }

    fn unset_field(&mut self, field: usize) {
        let bit = 1u64 << field;
        let term = &self.plan.terms()[field];
        self.result.ids[field] = term.id;
        self.result.sources[field] = fixed_source(term);
        self.result.columns[field] = None;
        self.result.set_fields &= !bit;
        self.result.up_fields &= !bit;
        if let Some(var) = self.plan.field_var(field) {
            self.vars[var] = 0;
        }
    }
}
