//! Audit stamping: fill creation/modification columns on write.
//!
//! Each parameter configures one column: `name` is the item id and `value`
//! is `<expression>[;ignoreOnModify][;coalesceOnly]`, where the expression is
//! `$now`, `$userId` or a literal. Without parameters the conventional
//! `createdAt`/`createdBy`/`updatedAt`/`updatedBy` columns are stamped.
//!
//! Only configured columns the binding set actually has are stamped; a
//! binding set with none of them is a configuration error.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::binding::BindingSet;
use crate::definition::ParamDef;
use crate::error::BinderyError;
use crate::value::Value;
use crate::write::{RowType, WriteCallback, WriteContext, WriteHeader, WriteRow};

/// Source of a stamped value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExpr {
    Now,
    UserId,
    Literal(String),
}

impl ValueExpr {
    pub fn parse(expr: &str) -> Self {
        match expr.trim() {
            "$now" => ValueExpr::Now,
            "$userId" => ValueExpr::UserId,
            other => ValueExpr::Literal(other.to_string()),
        }
    }
}

/// One stamped column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditColumn {
    pub column: String,
    pub expr: ValueExpr,
    /// Leave the column alone on Modify rows.
    pub ignore_on_modify: bool,
    /// Only fill the column when the row leaves it empty.
    pub coalesce_only: bool,
}

impl AuditColumn {
    pub fn parse(param: &ParamDef) -> Result<Self, BinderyError> {
        let mut parts = param.value.split(';');
        let expr = parts.next().unwrap_or_default();
        let mut column = AuditColumn {
            column: param.name.clone(),
            expr: ValueExpr::parse(expr),
            ignore_on_modify: false,
            coalesce_only: false,
        };
        for flag in parts {
            match flag.trim() {
                "ignoreOnModify" => column.ignore_on_modify = true,
                "coalesceOnly" => column.coalesce_only = true,
                "" => {}
                other => {
                    return Err(BinderyError::InvalidDefinition(format!(
                        "audit column '{}': unknown flag '{other}'",
                        param.name
                    )));
                }
            }
        }
        Ok(column)
    }

    fn new(column: &str, expr: ValueExpr, creation: bool) -> Self {
        AuditColumn {
            column: column.to_string(),
            expr,
            ignore_on_modify: creation,
            coalesce_only: creation,
        }
    }
}

/// The conventional audit columns.
pub fn default_columns() -> Vec<AuditColumn> {
    vec![
        AuditColumn::new("createdAt", ValueExpr::Now, true),
        AuditColumn::new("createdBy", ValueExpr::UserId, true),
        AuditColumn::new("updatedAt", ValueExpr::Now, false),
        AuditColumn::new("updatedBy", ValueExpr::UserId, false),
    ]
}

pub struct AuditStamping {
    set: Arc<BindingSet>,
    columns: Vec<AuditColumn>,
    indices: Vec<usize>,
    now: DateTime<Utc>,
    user_id: Option<String>,
}

impl AuditStamping {
    pub const KEY: &'static str = "audit";

    pub fn new(ctx: &WriteContext, params: &[ParamDef]) -> Result<Self, BinderyError> {
        let set = &ctx.binding_set;
        let columns = present_columns(set, params)?;
        Ok(AuditStamping {
            set: Arc::clone(set),
            columns,
            indices: Vec::new(),
            now: ctx.now,
            user_id: ctx.principal.user_id().map(str::to_string),
        })
    }

    /// Fails unless `set` has at least one of the configured columns.
    pub fn check(set: &BindingSet, params: &[ParamDef]) -> Result<(), BinderyError> {
        present_columns(set, params).map(|_| ())
    }

    /// Stamped columns in configuration order.
    pub fn columns(&self) -> &[AuditColumn] {
        &self.columns
    }

    fn evaluate(&self, expr: &ValueExpr) -> Value {
        match expr {
            ValueExpr::Now => Value::Timestamp(self.now),
            ValueExpr::UserId => Value::from(self.user_id.clone()),
            ValueExpr::Literal(s) => Value::from(s.as_str()),
        }
    }
}

/// The configured audit columns that `set` actually has.
fn present_columns(set: &BindingSet, params: &[ParamDef]) -> Result<Vec<AuditColumn>, BinderyError> {
    let configured = if params.is_empty() {
        default_columns()
    } else {
        params
            .iter()
            .map(AuditColumn::parse)
            .collect::<Result<Vec<_>, _>>()?
    };
    let columns: Vec<AuditColumn> = configured
        .into_iter()
        .filter(|c| set.has_item(&c.column))
        .collect();
    if columns.is_empty() {
        return Err(BinderyError::InvalidDefinition(format!(
            "binding set '{}' has none of the audit columns",
            set.name()
        )));
    }
    Ok(columns)
}

impl WriteCallback for AuditStamping {
    fn on_header(&mut self, header: &mut WriteHeader) -> Result<(), BinderyError> {
        self.indices = self
            .columns
            .iter()
            .map(|c| header.append_item(&self.set, &c.column))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    fn on_row(&mut self, _header: &WriteHeader, row: &mut WriteRow) -> Result<(), BinderyError> {
        if row.row_type == RowType::Delete {
            return Ok(());
        }
        for (column, &index) in self.columns.iter().zip(&self.indices) {
            if row.row_type == RowType::Modify && column.ignore_on_modify {
                row.omitted.insert(column.column.clone());
                continue;
            }
            if column.coalesce_only && !row.values[index].is_null_or_empty() {
                continue;
            }
            row.values[index] = self.evaluate(&column.expr);
        }
        Ok(())
    }
}
