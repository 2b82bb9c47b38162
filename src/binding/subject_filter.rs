//! Row-level access policy of a binding set.
//!
//! A policy lists enforced items, each tied to a permission type of the
//! current principal. On the read side it becomes a WHERE fragment; on the
//! write side the row-security callback checks rows against the same
//! policy.

use crate::binding::BindingSet;
use crate::binding::column::{ColumnExpr, RenderScope};
use crate::binding::constraint::{CompareOp, Constraint};
use crate::definition::{Connective, FilterOp, SubjectFiltersDef};
use crate::error::BinderyError;
use crate::principal::{Principal, WILDCARD};
use crate::value::Value;

/// One enforced item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFilter {
    pub column: String,
    pub policy_type: String,
    pub op: FilterOp,
    pub allow_null: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFilters {
    connective: Connective,
    filters: Vec<SubjectFilter>,
}

impl SubjectFilters {
    /// Build and validate against the native items of `set`.
    pub fn from_def(def: &SubjectFiltersDef, set: &BindingSet) -> Result<Self, BinderyError> {
        let mut filters = Vec::with_capacity(def.filters.len());
        for f in &def.filters {
            if !set.has_item(&f.column) {
                return Err(BinderyError::MissingBindingItem {
                    binding_set: set.name().to_string(),
                    item: f.column.clone(),
                });
            }
            filters.push(SubjectFilter {
                column: f.column.clone(),
                policy_type: f.policy_type.clone().unwrap_or_else(|| f.column.clone()),
                op: f.op,
                allow_null: f.allow_null,
            });
        }
        Ok(SubjectFilters {
            connective: def.connective,
            filters,
        })
    }

    pub fn connective(&self) -> Connective {
        self.connective
    }

    pub fn filters(&self) -> &[SubjectFilter] {
        &self.filters
    }

    /// The read-side restriction for `principal`, or `None` when the
    /// principal may see every row.
    pub fn to_constraint(&self, principal: &dyn Principal) -> Option<Constraint> {
        let mut parts = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            match filter_constraint(filter, &principal.permissions(&filter.policy_type)) {
                Some(c) => parts.push(c),
                // One unrestricted alternative lifts an OR policy entirely.
                None if self.connective == Connective::Or => return None,
                None => {}
            }
        }
        match (parts.len(), self.connective) {
            (0, _) => None,
            (_, Connective::And) => Some(Constraint::And(parts)),
            (_, Connective::Or) => Some(Constraint::Or(parts)),
        }
    }

    /// WHERE fragment for `principal` with the main table aliased `alias`.
    pub fn where_clause(
        &self,
        set: &BindingSet,
        principal: &dyn Principal,
        alias: &str,
    ) -> Result<Option<String>, BinderyError> {
        let Some(constraint) = self.to_constraint(principal) else {
            return Ok(None);
        };
        let sql = constraint.render(&RenderScope::new(set, alias))?;
        Ok(if sql.is_empty() { None } else { Some(sql) })
    }
}

fn filter_constraint(filter: &SubjectFilter, permissions: &[String]) -> Option<Constraint> {
    if permissions.iter().any(|p| p == WILDCARD) {
        return None;
    }
    let column = || ColumnExpr::main(&filter.column);
    let mut alternatives: Vec<Constraint> = permissions
        .iter()
        .map(|p| {
            let value = ColumnExpr::Constant(Value::from(p.as_str()));
            match filter.op {
                FilterOp::Eq => Constraint::Compare {
                    op: CompareOp::Eq,
                    negate: false,
                    lhs: column(),
                    rhs: value,
                },
                FilterOp::Like => Constraint::Like {
                    negate: false,
                    operands: vec![column(), value],
                    prefix: String::new(),
                    suffix: String::new(),
                },
            }
        })
        .collect();
    if filter.allow_null {
        alternatives.push(Constraint::IsNull {
            negate: false,
            operand: column(),
        });
    }
    if alternatives.is_empty() {
        return Some(never());
    }
    Some(Constraint::Or(alternatives))
}

/// `1 = 0`
fn never() -> Constraint {
    Constraint::Compare {
        op: CompareOp::Eq,
        negate: false,
        lhs: ColumnExpr::Constant(Value::Integer(1)),
        rhs: ColumnExpr::Constant(Value::Integer(0)),
    }
}
