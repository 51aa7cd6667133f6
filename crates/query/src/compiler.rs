//! Query compiler.
//!
//! Turns a validated term list into a linear plan. Each instruction records
//! which variables it reads and writes; variable 0 is `$this` (the matched
//! table) and every traversal term gets an entity variable for its source.
//! A query of `MAX_TERMS` traversal terms uses `MAX_TERMS + 1` variables, so
//! variable sets are 128-bit.
//!
//! Instruction order:
//!
//! 1. fixed-source terms, which do not depend on `$this`
//! 2. one instruction that enumerates candidate tables for `$this`
//! 3. remaining positive terms, then optional terms, then negated terms
//! 4. `Yield`

use crate::desc::{QueryDesc, MAX_TERMS};
use crate::term::{Oper, Source, Term};
use alloc::format;
use alloc::vec::Vec;
use core::fmt;
use quarry_core::{Error, Result, WILDCARD};

/// Index of a plan variable.
pub type VarId = usize;

/// The implicit subject variable.
pub const THIS_VAR: VarId = 0;

const THIS_MASK: u128 = 1 << THIS_VAR;

/// Instruction kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// Enumerate tables that own the field's id.
    Select,
    /// Enumerate every table.
    SelectAll,
    /// Enumerate tables that inherit the field's id through a relationship.
    UpSelect,
    /// Resolve the id on the bound table.
    With,
    /// Resolve the id on an ancestor of the bound table.
    Up,
    /// Resolve the id on the bound table, else on an ancestor.
    SelfUp,
    /// Resolve the id on a fixed entity.
    Fixed,
    /// Succeed only if the field's check fails.
    Not,
    /// Run the field's check; never fail.
    Optional,
    /// Produce a result.
    Yield,
}

impl OpKind {
    fn name(self) -> &'static str {
        match self {
            OpKind::Select => "select",
            OpKind::SelectAll => "select_all",
            OpKind::UpSelect => "up_select",
            OpKind::With => "with",
            OpKind::Up => "up",
            OpKind::SelfUp => "self_up",
            OpKind::Fixed => "fixed",
            OpKind::Not => "not",
            OpKind::Optional => "optional",
            OpKind::Yield => "yield",
        }
    }
}

/// One plan instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Op {
    pub kind: OpKind,
    /// Field the instruction resolves. None for `SelectAll` and `Yield`.
    pub field: Option<usize>,
    /// Variables read, as a bitmask over `VarId`.
    pub reads: u128,
    /// Variables written, as a bitmask over `VarId`.
    pub writes: u128,
}

/// A compiled query plan.
#[derive(Clone, Debug)]
pub struct Plan {
    terms: Vec<Term>,
    ops: Vec<Op>,
    /// Source variable of each field, for traversal terms.
    field_vars: Vec<Option<VarId>>,
    var_count: usize,
    match_empty: bool,
    fixed_fields: u64,
    up_fields: u64,
    read_fields: u64,
    write_fields: u64,
    cascade_field: Option<usize>,
}

/// Compiles a query descriptor into a plan.
pub fn compile(desc: &QueryDesc) -> Result<Plan> {
    let terms = validate(desc.terms())?;

    let mut field_vars = Vec::with_capacity(terms.len());
    let mut var_count = 1;
    for term in &terms {
        if matches!(term.src, Source::Up(_)) {
            field_vars.push(Some(var_count));
            var_count += 1;
        } else {
            field_vars.push(None);
        }
    }
    let var_mask = |field: usize| field_vars[field].map(|v| 1u128 << v).unwrap_or(0);

    let mut ops = Vec::with_capacity(terms.len() + 2);

    // Fixed sources first: they fail or succeed independently of `$this`.
    for (i, term) in terms.iter().enumerate() {
        if let Source::Entity(_) = term.src {
            let kind = match term.oper {
                Oper::And => OpKind::Fixed,
                Oper::Not => OpKind::Not,
                Oper::Optional => OpKind::Optional,
            };
            ops.push(Op {
                kind,
                field: Some(i),
                reads: 0,
                writes: 0,
            });
        }
    }

    let this_terms = || {
        terms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_this_relative())
    };

    let selector = this_terms()
        .find(|(_, t)| t.oper == Oper::And && t.src == Source::This)
        .or_else(|| this_terms().find(|(_, t)| t.oper == Oper::And))
        .map(|(i, _)| i);

    match selector {
        Some(i) => {
            let kind = if terms[i].src == Source::This {
                OpKind::Select
            } else {
                OpKind::UpSelect
            };
            ops.push(Op {
                kind,
                field: Some(i),
                reads: 0,
                writes: THIS_MASK | var_mask(i),
            });
        }
        None if this_terms().next().is_some() => ops.push(Op {
            kind: OpKind::SelectAll,
            field: None,
            reads: 0,
            writes: THIS_MASK,
        }),
        None => {}
    }

    for oper in [Oper::And, Oper::Optional, Oper::Not] {
        for (i, term) in this_terms() {
            if term.oper != oper || Some(i) == selector {
                continue;
            }
            let kind = match (oper, &term.src) {
                (Oper::And, Source::This) => OpKind::With,
                (Oper::And, Source::Up(trav)) if trav.with_self => OpKind::SelfUp,
                (Oper::And, _) => OpKind::Up,
                (Oper::Optional, _) => OpKind::Optional,
                (Oper::Not, _) => OpKind::Not,
            };
            let writes = if oper == Oper::Not { 0 } else { var_mask(i) };
            ops.push(Op {
                kind,
                field: Some(i),
                reads: THIS_MASK,
                writes,
            });
        }
    }

    ops.push(Op {
        kind: OpKind::Yield,
        field: None,
        reads: 0,
        writes: 0,
    });

    let mut plan = Plan {
        terms,
        ops,
        field_vars,
        var_count,
        match_empty: desc.matches_empty_tables(),
        fixed_fields: 0,
        up_fields: 0,
        read_fields: 0,
        write_fields: 0,
        cascade_field: None,
    };
    plan.compute_masks();
    Ok(plan)
}

fn validate(terms: &[Term]) -> Result<Vec<Term>> {
    if terms.len() > MAX_TERMS {
        return Err(Error::invalid_term(
            MAX_TERMS,
            format!("a query supports at most {} terms", MAX_TERMS),
        ));
    }

    let mut out = Vec::with_capacity(terms.len());
    let mut cascade = None;
    for (i, term) in terms.iter().enumerate() {
        let mut term = term.clone();
        if !term.id.is_valid() {
            return Err(Error::invalid_term(i, "invalid id"));
        }
        match &term.src {
            Source::Variable(name) if name == "this" => term.src = Source::This,
            Source::Variable(name) => {
                return Err(Error::unsupported_term(
                    i,
                    format!("named variable ${} is not supported, only $this", name),
                ));
            }
            Source::Entity(0) => {
                return Err(Error::invalid_term(i, "fixed source must be a valid entity"));
            }
            Source::Up(trav) => {
                if trav.rel == 0 || trav.rel == WILDCARD {
                    return Err(Error::invalid_term(i, "traversal requires a relationship"));
                }
                if trav.cascade.is_some() {
                    if cascade.is_some() {
                        return Err(Error::unsupported_term(
                            i,
                            "a query can have only one cascade term",
                        ));
                    }
                    cascade = Some(i);
                }
            }
            _ => {}
        }
        out.push(term);
    }
    Ok(out)
}

impl Plan {
    fn compute_masks(&mut self) {
        for op in &self.ops {
            if let Some(field) = op.field {
                if op.reads & THIS_MASK == 0 && op.writes & THIS_MASK == 0 {
                    self.fixed_fields |= 1 << field;
                }
            }
        }
        for (i, term) in self.terms.iter().enumerate() {
            let bit = 1u64 << i;
            if let Source::Up(trav) = &term.src {
                self.up_fields |= bit;
                if trav.cascade.is_some() {
                    self.cascade_field = Some(i);
                }
            }
            if term.oper != Oper::Not && term.inout.is_read() {
                self.read_fields |= bit;
            }
            if term.oper != Oper::Not && term.inout.is_write() {
                self.write_fields |= bit;
            }
        }
    }

    /// Returns the validated terms, one per field.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Returns the instructions.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Returns the number of fields.
    pub fn field_count(&self) -> usize {
        self.terms.len()
    }

    /// Returns the number of variables including `$this`.
    pub fn var_count(&self) -> usize {
        self.var_count
    }

    /// Returns the source variable of a traversal field.
    pub fn field_var(&self, field: usize) -> Option<VarId> {
        self.field_vars.get(field).copied().flatten()
    }

    /// Returns true if some instruction binds `$this`.
    pub fn has_this(&self) -> bool {
        self.ops.iter().any(|op| op.writes & THIS_MASK != 0)
    }

    /// Returns true if the plan yields tables without entities.
    pub fn matches_empty_tables(&self) -> bool {
        self.match_empty
    }

    /// Fields whose instruction neither reads nor writes `$this`.
    pub fn fixed_fields(&self) -> u64 {
        self.fixed_fields
    }

    /// Fields resolved through relationship traversal.
    pub fn up_fields(&self) -> u64 {
        self.up_fields
    }

    /// Fields that are read.
    pub fn read_fields(&self) -> u64 {
        self.read_fields
    }

    /// Fields that are written.
    pub fn write_fields(&self) -> u64 {
        self.write_fields
    }

    /// Field of the cascade term, if any.
    pub fn cascade_field(&self) -> Option<usize> {
        self.cascade_field
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, op) in self.ops.iter().enumerate() {
            write!(f, "{:2}. {:<10}", pc, op.kind.name())?;
            if let Some(field) = op.field {
                let term = &self.terms[field];
                write!(f, " f{} {}", field, term.id)?;
                match &term.src {
                    Source::Up(trav) => write!(f, " up #{}", trav.rel)?,
                    Source::Entity(e) => write!(f, " src #{}", e)?,
                    _ => {}
                }
            }
            if op.writes != 0 {
                write!(f, " w:{:#b}", op.writes)?;
            }
            if op.reads != 0 {
                write!(f, " r:{:#b}", op.reads)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{InOut, Order};
    use alloc::string::ToString;
    use alloc::vec;
    use quarry_core::{Id, CHILD_OF};

    fn kinds(plan: &Plan) -> Vec<OpKind> {
        plan.ops().iter().map(|op| op.kind).collect()
    }

    #[test]
    fn test_compile_simple() {
        let plan = compile(&QueryDesc::new().with(20u32).with(21u32)).unwrap();
        assert_eq!(kinds(&plan), vec![OpKind::Select, OpKind::With, OpKind::Yield]);
        assert_eq!(plan.field_count(), 2);
        assert!(plan.has_this());
        assert_eq!(plan.fixed_fields(), 0);
    }

    #[test]
    fn test_compile_orders_optional_and_not_last() {
        let desc = QueryDesc::new()
            .without(20u32)
            .optional(21u32)
            .with(22u32);
        let plan = compile(&desc).unwrap();
        assert_eq!(
            kinds(&plan),
            vec![OpKind::Select, OpKind::Optional, OpKind::Not, OpKind::Yield]
        );
        assert_eq!(plan.ops()[0].field, Some(2));
    }

    #[test]
    fn test_compile_fixed_first() {
        let desc = QueryDesc::new()
            .with(20u32)
            .term(Term::new(21u32).src(100));
        let plan = compile(&desc).unwrap();
        assert_eq!(kinds(&plan), vec![OpKind::Fixed, OpKind::Select, OpKind::Yield]);
        assert_eq!(plan.fixed_fields(), 0b10);
    }

    #[test]
    fn test_compile_up_select_when_no_self_term() {
        let desc = QueryDesc::new().term(Term::new(20u32).up(CHILD_OF));
        let plan = compile(&desc).unwrap();
        assert_eq!(kinds(&plan), vec![OpKind::UpSelect, OpKind::Yield]);
        assert_eq!(plan.field_var(0), Some(1));
        assert_eq!(plan.ops()[0].writes, 0b11);
        assert_eq!(plan.up_fields(), 1);
    }

    #[test]
    fn test_compile_select_all_for_negation_only() {
        let plan = compile(&QueryDesc::new().without(20u32)).unwrap();
        assert_eq!(kinds(&plan), vec![OpKind::SelectAll, OpKind::Not, OpKind::Yield]);
    }

    #[test]
    fn test_compile_empty_query() {
        let plan = compile(&QueryDesc::new()).unwrap();
        assert_eq!(kinds(&plan), vec![OpKind::Yield]);
        assert!(!plan.has_this());
    }

    #[test]
    fn test_compile_masks() {
        let desc = QueryDesc::new()
            .term(Term::new(20u32).inout(InOut::In))
            .term(Term::new(21u32).inout(InOut::Out))
            .term(Term::new(22u32).cascade(CHILD_OF, Order::Ascending).optional());
        let plan = compile(&desc).unwrap();
        assert_eq!(plan.read_fields(), 0b101);
        assert_eq!(plan.write_fields(), 0b110);
        assert_eq!(plan.cascade_field(), Some(2));
    }

    #[test]
    fn test_compile_rejects_named_variables() {
        let err = compile(&QueryDesc::new().term(Term::new(20u32).var("x"))).unwrap_err();
        assert!(matches!(err, Error::UnsupportedTerm { term: 0, .. }));

        let plan = compile(&QueryDesc::new().term(Term::new(20u32).var("this"))).unwrap();
        assert_eq!(plan.terms()[0].src, Source::This);
    }

    #[test]
    fn test_compile_rejects_invalid_terms() {
        assert!(compile(&QueryDesc::new().with(0u32)).is_err());
        assert!(compile(&QueryDesc::new().term(Term::new(20u32).up(0))).is_err());
        assert!(compile(&QueryDesc::new().term(Term::new(Id::pair(20, 0)))).is_err());

        let two_cascades = QueryDesc::new()
            .term(Term::new(20u32).cascade(CHILD_OF, Order::Ascending))
            .term(Term::new(21u32).cascade(CHILD_OF, Order::Ascending));
        assert!(compile(&two_cascades).is_err());

        let mut desc = QueryDesc::new();
        for i in 0..65u32 {
            desc = desc.with(20 + i);
        }
        assert!(compile(&desc).is_err());
    }

    #[test]
    fn test_compile_max_traversal_terms() {
        let mut desc = QueryDesc::new();
        for i in 0..MAX_TERMS as u32 {
            desc = desc.term(Term::new(100 + i).up(CHILD_OF));
        }
        let plan = compile(&desc).unwrap();
        assert_eq!(plan.var_count(), MAX_TERMS + 1);
        assert_eq!(plan.field_var(MAX_TERMS - 1), Some(MAX_TERMS));
        assert_eq!(plan.ops()[0].kind, OpKind::UpSelect);
        assert_eq!(plan.ops()[0].writes, THIS_MASK | 0b10);
        let last = plan.ops()[plan.ops().len() - 2];
        assert_eq!(last.writes, 1u128 << MAX_TERMS);
        assert_eq!(plan.up_fields(), u64::MAX);
    }

    #[test]
    fn test_plan_display() {
        let plan = compile(&QueryDesc::new().with(20u32).without(21u32)).unwrap();
        let text = plan.to_string();
        assert!(text.contains("select"));
        assert!(text.contains("not"));
        assert!(text.contains("yield"));
    }
}
