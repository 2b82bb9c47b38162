//! Row-level security enforcement on write.
//!
//! Every enforced item of the binding set's subject filters is checked
//! against the principal's permissions for the item's policy type:
//!
//! - a value matching a permission (exactly, or as a LIKE pattern) passes;
//! - a `*` permission passes every value;
//! - an empty value passes when the filter allows NULL;
//! - an empty value with exactly one permission is filled with it;
//! - an empty value with several permissions is ambiguous and fails.
//!
//! Under an AND policy every enforced item must pass and the first failure
//! rejects the row; under OR one passing item is enough. Delete rows are
//! checked against their original values and are never filled.

use std::sync::Arc;

use crate::binding::{BindingSet, SubjectFilter, SubjectFilters};
use crate::definition::{Connective, FilterOp, ParamDef};
use crate::error::BinderyError;
use crate::principal::WILDCARD;
use crate::sql::like_match;
use crate::value::Value;
use crate::write::{RowType, WriteCallback, WriteContext, WriteHeader, WriteRow};

/// Result of checking one enforced value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// Allowed after filling the empty value.
    Fill(String),
    Rejected,
}

/// Check one value of `filter` against `permissions`.
pub fn check_value(
    filter: &SubjectFilter,
    permissions: &[String],
    value: &Value,
    may_fill: bool,
) -> Result<Verdict, BinderyError> {
    if value.is_null_or_empty() {
        if filter.allow_null || permissions.iter().any(|p| p == WILDCARD) {
            return Ok(Verdict::Allowed);
        }
        return match permissions {
            [] => Ok(Verdict::Rejected),
            [only] if may_fill => Ok(Verdict::Fill(only.clone())),
            [_] => Ok(Verdict::Rejected),
            many => Err(BinderyError::AmbiguousEnforcedValue {
                column: filter.column.clone(),
                candidates: many.len(),
            }),
        };
    }

    let Some(text) = value.as_text() else {
        return Ok(Verdict::Rejected);
    };
    let allowed = permissions.iter().any(|p| {
        p == WILDCARD
            || match filter.op {
                FilterOp::Eq => *p == text,
                FilterOp::Like => like_match(&text, p),
            }
    });
    Ok(if allowed {
        Verdict::Allowed
    } else {
        Verdict::Rejected
    })
}

struct Enforced {
    filter: SubjectFilter,
    permissions: Vec<String>,
    index: usize,
}

pub struct RowLevelSecurity {
    set: Arc<BindingSet>,
    connective: Connective,
    enforced: Vec<Enforced>,
}

impl RowLevelSecurity {
    pub const KEY: &'static str = "rowSecurity";

    /// Permissions are read from the principal once per write.
    pub fn new(ctx: &WriteContext, _params: &[ParamDef]) -> Result<Self, BinderyError> {
        let set = Arc::clone(&ctx.binding_set);
        let filters = subject_filters(&set)?;
        let connective = filters.connective();
        let enforced = filters
            .filters()
            .iter()
            .map(|f| Enforced {
                filter: f.clone(),
                permissions: ctx.principal.permissions(&f.policy_type),
                index: 0,
            })
            .collect();
        Ok(RowLevelSecurity {
            set,
            connective,
            enforced,
        })
    }

    /// Fails unless `set` declares subject filters.
    pub fn check(set: &BindingSet, _params: &[ParamDef]) -> Result<(), BinderyError> {
        subject_filters(set).map(|_| ())
    }

    fn violation(&self, detail: String) -> BinderyError {
        BinderyError::SecurityViolation {
            binding_set: self.set.name().to_string(),
            detail,
        }
    }
}

fn subject_filters(set: &BindingSet) -> Result<&SubjectFilters, BinderyError> {
    set.subject_filters().ok_or_else(|| {
        BinderyError::InvalidDefinition(format!(
            "binding set '{}' has row security but no subject filters",
            set.name()
        ))
    })
}

impl WriteCallback for RowLevelSecurity {
    fn on_header(&mut self, header: &mut WriteHeader) -> Result<(), BinderyError> {
        for e in self.enforced.iter_mut() {
            e.index = header.append_item(&self.set, &e.filter.column)?;
        }
        Ok(())
    }

    fn on_row(&mut self, _header: &WriteHeader, row: &mut WriteRow) -> Result<(), BinderyError> {
        let deleting = row.row_type == RowType::Delete;
        let mut fills = Vec::new();
        let mut any_allowed = false;
        let mut rejected = Vec::new();

        for e in &self.enforced {
            let value = if deleting && !row.original.is_empty() {
                &row.original[e.index]
            } else {
                &row.values[e.index]
            };
            match check_value(&e.filter, &e.permissions, value, !deleting)? {
                Verdict::Allowed => any_allowed = true,
                Verdict::Fill(v) => {
                    any_allowed = true;
                    fills.push((e.index, v));
                }
                Verdict::Rejected => {
                    let shown = value.as_text().unwrap_or_else(|| "NULL".into());
                    let detail = format!("value {shown} of '{}' is not permitted", e.filter.column);
                    if self.connective == Connective::And {
                        return Err(self.violation(detail));
                    }
                    rejected.push(detail);
                }
            }
        }

        if self.connective == Connective::Or && !any_allowed && !self.enforced.is_empty() {
            return Err(self.violation(rejected.join("; ")));
        }
        for (index, value) in fills {
            row.values[index] = Value::Text(value);
        }
        Ok(())
    }
}
