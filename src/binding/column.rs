//! Column expressions and the aliasing context they render in.

use std::collections::HashMap;

use crate::binding::BindingSet;
use crate::definition::{OperandDef, Side};
use crate::error::BinderyError;
use crate::registry::BindingRegistry;
use crate::value::Value;

/// Which table of a relation a physical reference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    /// The querying (left) binding set.
    Main,
    /// The right-hand binding set of the relation being rendered.
    Joined,
}

/// A column-level expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnExpr {
    /// An item of a table fixed by role.
    Physical { table: TableRole, name: String },
    /// An item named without a side inside a relation to `relation`. It
    /// renders against the main table when the main binding set owns the
    /// item, else against the relation's alias.
    RelationRef { relation: String, name: String },
    /// `COALESCE(children...)`.
    Coalesce(Vec<ColumnExpr>),
    Constant(Value),
}

impl ColumnExpr {
    /// Build from a definition operand inside a relation to `relation`.
    ///
    /// With `force_joined`, side markers are ignored and every reference
    /// addresses the right-hand binding set (used for imports).
    pub fn from_operand(def: &OperandDef, relation: &str, force_joined: bool) -> Self {
        match def {
            OperandDef::Ref { item, side } => match (force_joined, side) {
                (true, _) | (false, Some(Side::Right)) => ColumnExpr::Physical {
                    table: TableRole::Joined,
                    name: item.clone(),
                },
                (false, Some(Side::Left)) => ColumnExpr::Physical {
                    table: TableRole::Main,
                    name: item.clone(),
                },
                (false, None) => ColumnExpr::RelationRef {
                    relation: relation.to_string(),
                    name: item.clone(),
                },
            },
            OperandDef::Constant { constant } => ColumnExpr::Constant(constant.clone()),
            OperandDef::Coalesce { coalesce } => ColumnExpr::Coalesce(
                coalesce
                    .iter()
                    .map(|c| ColumnExpr::from_operand(c, relation, force_joined))
                    .collect(),
            ),
        }
    }

    pub fn main(name: &str) -> Self {
        ColumnExpr::Physical {
            table: TableRole::Main,
            name: name.to_string(),
        }
    }

    pub fn joined(name: &str) -> Self {
        ColumnExpr::Physical {
            table: TableRole::Joined,
            name: name.to_string(),
        }
    }

    /// Render the expression in `scope`.
    pub fn render(&self, scope: &RenderScope<'_>) -> Result<String, BinderyError> {
        match self {
            ColumnExpr::Physical {
                table: TableRole::Main,
                name,
            } => scope.main_column(name),
            ColumnExpr::Physical {
                table: TableRole::Joined,
                name,
            } => scope.joined_column(name),
            ColumnExpr::RelationRef { name, .. } => {
                if scope.main_owns(name)? {
                    scope.main_column(name)
                } else {
                    scope.joined_column(name)
                }
            }
            ColumnExpr::Coalesce(children) => {
                let parts = children
                    .iter()
                    .map(|c| c.render(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("COALESCE({})", parts.join(", ")))
            }
            ColumnExpr::Constant(value) => Ok(value.to_sql_literal()),
        }
    }

    /// Names of right-hand items this expression references for certain.
    /// Unsided references are not included.
    pub fn joined_refs(&self) -> Vec<&str> {
        match self {
            ColumnExpr::Physical {
                table: TableRole::Joined,
                name,
            } => vec![name.as_str()],
            ColumnExpr::Coalesce(children) => {
                children.iter().flat_map(|c| c.joined_refs()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Names of all references regardless of side.
    pub fn all_refs(&self) -> Vec<&str> {
        match self {
            ColumnExpr::Physical { name, .. } | ColumnExpr::RelationRef { name, .. } => {
                vec![name.as_str()]
            }
            ColumnExpr::Coalesce(children) => children.iter().flat_map(|c| c.all_refs()).collect(),
            ColumnExpr::Constant(_) => Vec::new(),
        }
    }
}

// ── Render scope ────────────────────────────────────────────────────────

/// Everything a column expression needs to become SQL: the querying binding
/// set and its alias, optionally the right-hand side of the relation being
/// compiled, and the registry for items imported through other relations.
///
/// In CASE-WHEN mode, right-hand references render as literals taken from
/// one row of the reference table.
#[derive(Clone, Copy)]
pub struct RenderScope<'a> {
    main: &'a BindingSet,
    main_alias: &'a str,
    joined: Option<(&'a BindingSet, &'a str)>,
    registry: Option<&'a BindingRegistry>,
    current_relation: Option<usize>,
    case_when_row: Option<&'a HashMap<String, Value>>,
}

impl<'a> RenderScope<'a> {
    pub fn new(main: &'a BindingSet, main_alias: &'a str) -> Self {
        RenderScope {
            main,
            main_alias,
            joined: None,
            registry: None,
            current_relation: None,
            case_when_row: None,
        }
    }

    pub fn with_joined(mut self, joined: &'a BindingSet, alias: &'a str) -> Self {
        self.joined = Some((joined, alias));
        self
    }

    /// Allow main-side references to items imported through relations other
    /// than `current_relation`.
    pub fn with_registry(
        mut self,
        registry: &'a BindingRegistry,
        current_relation: Option<usize>,
    ) -> Self {
        self.registry = Some(registry);
        self.current_relation = current_relation;
        self
    }

    pub fn with_case_when_row(mut self, row: &'a HashMap<String, Value>) -> Self {
        self.case_when_row = Some(row);
        self
    }

    pub fn is_case_when(&self) -> bool {
        self.case_when_row.is_some()
    }

    /// Human-readable location for error messages.
    pub fn context(&self) -> String {
        match self.joined {
            Some((joined, _)) => format!("{} -> {}", self.main.name(), joined.name()),
            None => self.main.name().to_string(),
        }
    }

    fn main_owns(&self, name: &str) -> Result<bool, BinderyError> {
        if self.main.has_item(name) {
            return Ok(true);
        }
        match self.registry {
            Some(registry) => Ok(self
                .main
                .lookup_imported(registry, name, self.current_relation)?
                .is_some()),
            None => Ok(false),
        }
    }

    fn main_column(&self, name: &str) -> Result<String, BinderyError> {
        if let Ok(item) = self.main.item(name) {
            return Ok(item.qualified(self.main_alias));
        }
        if let Some(registry) = self.registry {
            if let Some(item) = self
                .main
                .lookup_imported(registry, name, self.current_relation)?
            {
                return Ok(item.qualified_expression(self.main_alias));
            }
        }
        Err(BinderyError::BindingItemNotFound {
            binding_set: self.main.name().to_string(),
            item: name.to_string(),
        })
    }

    fn joined_column(&self, name: &str) -> Result<String, BinderyError> {
        let Some((joined, alias)) = self.joined else {
            return Err(BinderyError::InvalidDefinition(format!(
                "{}: right-hand reference '{name}' outside a relation",
                self.context()
            )));
        };
        let item = joined.item(name)?;
        match self.case_when_row {
            Some(row) => row
                .get(name)
                .map(Value::to_sql_literal)
                .ok_or_else(|| {
                    BinderyError::InternalError(format!(
                        "probed row lacks right-hand value '{name}'"
                    ))
                }),
            None => Ok(item.qualified(alias)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::test_helpers::*;

    fn sets() -> (BindingSet, BindingSet) {
        let config = EngineConfig::default();
        (
            BindingSet::from_def(&orders_def(), &config).unwrap(),
            BindingSet::from_def(&customers_def(), &config).unwrap(),
        )
    }

    #[test]
    fn test_physical_refs_use_role_alias() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, "o").with_joined(&customers, "o_rel0");
        assert_eq!(ColumnExpr::main("customer_id").render(&scope).unwrap(), "o.customer_id");
        assert_eq!(ColumnExpr::joined("id").render(&scope).unwrap(), "o_rel0.id");
    }

    #[test]
    fn test_relation_ref_prefers_main_owner() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, "o").with_joined(&customers, "o_rel0");
        let owned = ColumnExpr::RelationRef {
            relation: "customers".into(),
            name: "amount".into(),
        };
        let foreign = ColumnExpr::RelationRef {
            relation: "customers".into(),
            name: "region".into(),
        };
        assert_eq!(owned.render(&scope).unwrap(), "o.amount");
        assert_eq!(foreign.render(&scope).unwrap(), "o_rel0.region");
    }

    #[test]
    fn test_coalesce_quotes_constants() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, "o").with_joined(&customers, "r");
        let expr = ColumnExpr::Coalesce(vec![
            ColumnExpr::joined("region"),
            ColumnExpr::Constant(Value::from("n/a")),
            ColumnExpr::Constant(Value::Integer(0)),
        ]);
        assert_eq!(expr.render(&scope).unwrap(), "COALESCE(r.region, 'n/a', 0)");
    }

    #[test]
    fn test_unknown_item_is_lookup_error() {
        let (orders, customers) = sets();
        let scope = RenderScope::new(&orders, "o").with_joined(&customers, "r");
        assert!(matches!(
            ColumnExpr::main("nope").render(&scope),
            Err(BinderyError::BindingItemNotFound { .. })
        ));
    }

    #[test]
    fn test_joined_ref_outside_relation_rejected() {
        let (orders, _) = sets();
        let scope = RenderScope::new(&orders, "o");
        assert!(ColumnExpr::joined("id").render(&scope).unwrap_err().is_configuration());
    }

    #[test]
    fn test_case_when_row_renders_literals() {
        let (orders, customers) = sets();
        let row: HashMap<String, Value> = [("id".to_string(), Value::Integer(7))].into();
        let scope = RenderScope::new(&orders, "o")
            .with_joined(&customers, "r")
            .with_case_when_row(&row);
        assert!(scope.is_case_when());
        assert_eq!(ColumnExpr::joined("id").render(&scope).unwrap(), "7");
        assert_eq!(ColumnExpr::main("customer_id").render(&scope).unwrap(), "o.customer_id");
    }

    #[test]
    fn test_from_operand_sides() {
        let left = OperandDef::Ref {
            item: "a".into(),
            side: Some(Side::Left),
        };
        let unsided = OperandDef::Ref {
            item: "a".into(),
            side: None,
        };
        assert_eq!(ColumnExpr::from_operand(&left, "r", false), ColumnExpr::main("a"));
        assert_eq!(ColumnExpr::from_operand(&left, "r", true), ColumnExpr::joined("a"));
        assert!(matches!(
            ColumnExpr::from_operand(&unsided, "r", false),
            ColumnExpr::RelationRef { .. }
        ));
    }

    #[test]
    fn test_ref_collection() {
        let expr = ColumnExpr::Coalesce(vec![
            ColumnExpr::joined("x"),
            ColumnExpr::main("y"),
            ColumnExpr::Constant(Value::Null),
        ]);
        assert_eq!(expr.joined_refs(), vec!["x"]);
        assert_eq!(expr.all_refs(), vec!["x", "y"]);
    }
}
