//! Join and filter conditions.
//!
//! A [`Constraint`] is a boolean expression tree over [`ColumnExpr`]s. It is
//! rendered into SQL against a [`RenderScope`]; relations render it once
//! against the `$MAIN_ALIAS` placeholder and cache the resulting template.
//!
//! # Operator table
//!
//! Negation flips the comparison operator instead of wrapping in `NOT`:
//!
//! | op  | negate=false | negate=true |
//! |-----|--------------|-------------|
//! | EQ  | `=`          | `<>`        |
//! | NEQ | `<>`         | `=`         |
//! | LT  | `<`          | `>`         |
//! | LE  | `<=`         | `>=`        |
//! | GT  | `>`          | `<`         |
//! | GE  | `>=`         | `<=`        |
//!
//! The swapped operators are only equivalent to `NOT (a op b)` for non-NULL
//! operands. With a NULL operand both forms yield NULL, so rows with NULL
//! operands never match either form.

use crate::binding::column::{ColumnExpr, RenderScope};
use crate::definition::{CompareOpDef, ConditionDef, OperandDef};
use crate::error::BinderyError;
use crate::value::quote_literal;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// SQL operator for `(self, negate)`.
    pub fn operator(self, negate: bool) -> &'static str {
        match (self, negate) {
            (CompareOp::Eq, false) | (CompareOp::Neq, true) => "=",
            (CompareOp::Eq, true) | (CompareOp::Neq, false) => "<>",
            (CompareOp::Lt, false) | (CompareOp::Gt, true) => "<",
            (CompareOp::Lt, true) | (CompareOp::Gt, false) => ">",
            (CompareOp::Le, false) | (CompareOp::Ge, true) => "<=",
            (CompareOp::Le, true) | (CompareOp::Ge, false) => ">=",
        }
    }
}

impl From<CompareOpDef> for CompareOp {
    fn from(op: CompareOpDef) -> Self {
        match op {
            CompareOpDef::Eq => CompareOp::Eq,
            CompareOpDef::Neq => CompareOp::Neq,
            CompareOpDef::Lt => CompareOp::Lt,
            CompareOpDef::Le => CompareOp::Le,
            CompareOpDef::Gt => CompareOp::Gt,
            CompareOpDef::Ge => CompareOp::Ge,
        }
    }
}

/// SQL operator of a null test.
pub fn is_null_operator(negate: bool) -> &'static str {
    if negate { "IS NOT NULL" } else { "IS NULL" }
}

/// A boolean expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Compare {
        op: CompareOp,
        negate: bool,
        lhs: ColumnExpr,
        rhs: ColumnExpr,
    },
    IsNull {
        negate: bool,
        operand: ColumnExpr,
    },
    /// `lhs LIKE 'prefix' || rhs || 'suffix'`. Holds the operands as written
    /// so a wrong operand count is reported at render time.
    Like {
        negate: bool,
        operands: Vec<ColumnExpr>,
        prefix: String,
        suffix: String,
    },
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    AndNot(Vec<Constraint>),
    OrNot(Vec<Constraint>),
}

impl Constraint {
    /// Build from a definition node of a relation to `relation`.
    pub fn from_def(def: &ConditionDef, relation: &str) -> Result<Self, BinderyError> {
        let operand = |d: &OperandDef| ColumnExpr::from_operand(d, relation, false);
        let children = |defs: &[ConditionDef]| {
            defs.iter()
                .map(|c| Constraint::from_def(c, relation))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(match def {
            ConditionDef::Compare {
                op,
                negate,
                operands,
            } => match operands.as_slice() {
                [lhs, rhs] => Constraint::Compare {
                    op: (*op).into(),
                    negate: *negate,
                    lhs: operand(lhs),
                    rhs: operand(rhs),
                },
                _ => {
                    return Err(BinderyError::InvalidDefinition(format!(
                        "comparison in relation to '{relation}' needs exactly 2 operands, got {}",
                        operands.len()
                    )));
                }
            },
            ConditionDef::IsNull { negate, operand: o } => Constraint::IsNull {
                negate: *negate,
                operand: operand(o),
            },
            ConditionDef::Like {
                negate,
                operands,
                prefix,
                suffix,
            } => Constraint::Like {
                negate: *negate,
                operands: operands.iter().map(operand).collect(),
                prefix: prefix.clone(),
                suffix: suffix.clone(),
            },
            ConditionDef::And { children: c } => Constraint::And(children(c)?),
            ConditionDef::Or { children: c } => Constraint::Or(children(c)?),
            ConditionDef::AndNot { children: c } => Constraint::AndNot(children(c)?),
            ConditionDef::OrNot { children: c } => Constraint::OrNot(children(c)?),
        })
    }

    /// Render the constraint as a SQL boolean expression.
    ///
    /// An empty combinator renders as the empty string.
    pub fn render(&self, scope: &RenderScope<'_>) -> Result<String, BinderyError> {
        match self {
            Constraint::Compare {
                op,
                negate,
                lhs,
                rhs,
            } => {
                let (l, r) = render_pair(lhs, rhs, scope)?;
                Ok(format!("{l} {} {r}", op.operator(*negate)))
            }
            Constraint::IsNull { negate, operand } => Ok(format!(
                "{} {}",
                operand.render(scope)?,
                is_null_operator(*negate)
            )),
            Constraint::Like {
                negate,
                operands,
                prefix,
                suffix,
            } => {
                if scope.is_case_when() {
                    return Err(BinderyError::UnsupportedInCaseWhen("LIKE".into()));
                }
                let [lhs, rhs] = operands.as_slice() else {
                    return Err(BinderyError::InvalidDefinition(format!(
                        "{}: LIKE needs exactly 2 operands, got {}",
                        scope.context(),
                        operands.len()
                    )));
                };
                let (l, r) = render_pair(lhs, rhs, scope)?;
                let mut pattern = Vec::with_capacity(3);
                if !prefix.is_empty() {
                    pattern.push(quote_literal(prefix));
                }
                pattern.push(r);
                if !suffix.is_empty() {
                    pattern.push(quote_literal(suffix));
                }
                let op = if *negate { "NOT LIKE" } else { "LIKE" };
                Ok(format!("{l} {op} {}", pattern.join(" || ")))
            }
            Constraint::And(children) => render_combinator(children, " AND ", scope),
            Constraint::Or(children) => render_combinator(children, " OR ", scope),
            Constraint::AndNot(children) => render_combinator(children, " AND NOT ", scope),
            Constraint::OrNot(children) => render_combinator(children, " OR NOT ", scope),
        }
    }

    /// Every column expression in the tree, depth first.
    pub fn operands(&self) -> Vec<&ColumnExpr> {
        match self {
            Constraint::Compare { lhs, rhs, .. } => vec![lhs, rhs],
            Constraint::IsNull { operand, .. } => vec![operand],
            Constraint::Like { operands, .. } => operands.iter().collect(),
            Constraint::And(c) | Constraint::Or(c) | Constraint::AndNot(c) | Constraint::OrNot(c) => {
                c.iter().flat_map(|child| child.operands()).collect()
            }
        }
    }
}

/// Render both operands of a binary node; identical renderings mean the
/// definition failed to tell the two sides apart.
///
/// CASE-WHEN rows inline right-hand values as literals, so two distinct
/// operands may legitimately render alike there. That mode relies on the
/// condition having been rendered once without a row.
fn render_pair(
    lhs: &ColumnExpr,
    rhs: &ColumnExpr,
    scope: &RenderScope<'_>,
) -> Result<(String, String), BinderyError> {
    let l = lhs.render(scope)?;
    let r = rhs.render(scope)?;
    if l == r && !scope.is_case_when() {
        return Err(BinderyError::AmbiguousConstraint {
            context: scope.context(),
            operand: l,
        });
    }
    Ok((l, r))
}

fn render_combinator(
    children: &[Constraint],
    op: &str,
    scope: &RenderScope<'_>,
) -> Result<String, BinderyError> {
    let mut parts = Vec::with_capacity(children.len());
    for child in children {
        let sql = child.render(scope)?;
        if !sql.is_empty() {
            parts.push(format!("({sql})"));
        }
    }
    Ok(parts.join(op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingSet;
    use crate::config::EngineConfig;
    use crate::sql::MAIN_ALIAS;
    use crate::test_helpers::*;
    use crate::value::Value;

    fn sets() -> (BindingSet, BindingSet) {
        let config = EngineConfig::default();
        (
            BindingSet::from_def(&orders_def(), &config).unwrap(),
            BindingSet::from_def(&customers_def(), &config).unwrap(),
        )
    }

    fn eq(lhs: ColumnExpr, rhs: ColumnExpr) -> Constraint {
        Constraint::Compare {
            op: CompareOp::Eq,
            negate: false,
            lhs,
            rhs,
        }
    }

    #[test]
    fn test_operator_table() {
        let cases = [
            (CompareOp::Eq, false, "="),
            (CompareOp::Eq, true, "<>"),
            (CompareOp::Neq, false, "<>"),
            (CompareOp::Neq, true, "="),
            (CompareOp::Lt, false, "<"),
            (CompareOp::Lt, true, ">"),
            (CompareOp::Le, false, "<="),
            (CompareOp::Le, true, ">="),
            (CompareOp::Gt, false, ">"),
            (CompareOp::Gt, true, "<"),
            (CompareOp::Ge, false, ">="),
            (CompareOp::Ge, true, "<="),
        ];
        for (op, negate, expected) in cases {
            assert_eq!(op.operator(negate), expected, "{op:?} negate={negate}");
        }
        assert_eq!(is_null_operator(false), "IS NULL");
        assert_eq!(is_null_operator(true), "IS NOT NULL");
    }

    #[test]
    fn test_compare_renders_template() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, MAIN_ALIAS).with_joined(&customers, "$MAIN_ALIAS_rel0");
        let c = eq(ColumnExpr::main("customer_id"), ColumnExpr::joined("id"));
        assert_eq!(
            c.render(&scope).unwrap(),
            "$MAIN_ALIAS.customer_id = $MAIN_ALIAS_rel0.id"
        );
    }

    #[test]
    fn test_ambiguous_compare_rejected() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, MAIN_ALIAS).with_joined(&customers, "$MAIN_ALIAS_rel0");
        let c = eq(ColumnExpr::main("customer_id"), ColumnExpr::main("customer_id"));
        let err = c.render(&scope).unwrap_err();
        assert!(matches!(err, BinderyError::AmbiguousConstraint { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_ambiguous_unsided_refs_rejected() {
        // Both unsided refs resolve to the main table's column.
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, MAIN_ALIAS).with_joined(&customers, "r");
        let unsided = || ColumnExpr::RelationRef {
            relation: "customers".into(),
            name: "amount".into(),
        };
        assert!(matches!(
            eq(unsided(), unsided()).render(&scope),
            Err(BinderyError::AmbiguousConstraint { .. })
        ));
    }

    #[test]
    fn test_is_null() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, "o").with_joined(&customers, "r");
        let c = Constraint::IsNull {
            negate: true,
            operand: ColumnExpr::joined("region"),
        };
        assert_eq!(c.render(&scope).unwrap(), "r.region IS NOT NULL");
    }

    #[test]
    fn test_like_with_prefix_and_suffix() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, "o").with_joined(&customers, "r");
        let c = Constraint::Like {
            negate: false,
            operands: vec![ColumnExpr::joined("name"), ColumnExpr::main("customer_id")],
            prefix: "%".into(),
            suffix: "%".into(),
        };
        assert_eq!(c.render(&scope).unwrap(), "r.name LIKE '%' || o.customer_id || '%'");

        let negated = Constraint::Like {
            negate: true,
            operands: vec![ColumnExpr::joined("name"), ColumnExpr::Constant(Value::from("A%"))],
            prefix: String::new(),
            suffix: String::new(),
        };
        assert_eq!(negated.render(&scope).unwrap(), "r.name NOT LIKE 'A%'");
    }

    #[test]
    fn test_like_operand_count() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, "o").with_joined(&customers, "r");
        let c = Constraint::Like {
            negate: false,
            operands: vec![ColumnExpr::joined("name")],
            prefix: String::new(),
            suffix: String::new(),
        };
        assert!(c.render(&scope).unwrap_err().is_configuration());
    }

    #[test]
    fn test_like_rejected_in_case_when() {
        let (orders, customers) = sets();
        let row = std::collections::HashMap::new();
        let scope = RenderScope::new(&orders, "o")
            .with_joined(&customers, "r")
            .with_case_when_row(&row);
        let c = Constraint::Like {
            negate: false,
            operands: vec![ColumnExpr::main("customer_id"), ColumnExpr::joined("name")],
            prefix: String::new(),
            suffix: String::new(),
        };
        assert!(matches!(
            c.render(&scope),
            Err(BinderyError::UnsupportedInCaseWhen(_))
        ));
    }

    #[test]
    fn test_case_when_row_may_render_equal_literals() {
        let (orders, customers) = sets();
        let row = std::collections::HashMap::from([("region".to_string(), Value::from("EU"))]);
        let scope = RenderScope::new(&orders, "o")
            .with_joined(&customers, "r")
            .with_case_when_row(&row);
        let c = eq(ColumnExpr::joined("region"), ColumnExpr::Constant(Value::from("EU")));
        assert_eq!(c.render(&scope).unwrap(), "'EU' = 'EU'");

        // Without a row the same condition is a plain column test.
        let template = RenderScope::new(&orders, "o").with_joined(&customers, "r");
        assert_eq!(c.render(&template).unwrap(), "r.region = 'EU'");
    }

    #[test]
    fn test_combinators_skip_empty_and_parenthesise() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, "o").with_joined(&customers, "r");
        let a = eq(ColumnExpr::main("customer_id"), ColumnExpr::joined("id"));
        let b = Constraint::IsNull {
            negate: false,
            operand: ColumnExpr::joined("region"),
        };
        let and = Constraint::And(vec![a.clone(), Constraint::Or(vec![]), b.clone()]);
        assert_eq!(
            and.render(&scope).unwrap(),
            "(o.customer_id = r.id) AND (r.region IS NULL)"
        );
        assert_eq!(
            Constraint::OrNot(vec![a.clone(), b.clone()]).render(&scope).unwrap(),
            "(o.customer_id = r.id) OR NOT (r.region IS NULL)"
        );
        assert_eq!(
            Constraint::AndNot(vec![a, b]).render(&scope).unwrap(),
            "(o.customer_id = r.id) AND NOT (r.region IS NULL)"
        );
        assert_eq!(Constraint::And(vec![]).render(&scope).unwrap(), "");
    }

    #[test]
    fn test_from_def_requires_two_compare_operands() {
        let def: ConditionDef = toml::from_str(
            r#"
            kind = "compare"
            op = "eq"
            operands = [{ ref = "x" }]
            "#,
        )
        .unwrap();
        assert!(Constraint::from_def(&def, "r").unwrap_err().is_configuration());
    }

    #[test]
    fn test_operands_walk() {
        let c = Constraint::And(vec![
            eq(ColumnExpr::main("a"), ColumnExpr::joined("b")),
            Constraint::IsNull {
                negate: false,
                operand: ColumnExpr::joined("c"),
            },
        ]);
        assert_eq!(c.operands().len(), 3);
    }
}
