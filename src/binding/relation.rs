//! Relations: declared joins from one binding set to another.
//!
//! A relation knows its right-hand binding set by name only. The imported
//! items and the ON-clause template are resolved against the registry the
//! first time somebody asks for them and memoized for the life of the
//! registry.
//!
//! # Resolution guard
//!
//! Each memoized value sits in a [`OnceLock`] next to a [`Mutex`] that
//! serializes the fallible resolution. Readers take the lock only while the
//! value is still missing, and re-check after acquiring it, so concurrent
//! first access resolves exactly once.
//!
//! Imports and condition use separate locks. Import resolution never waits
//! on another relation, while condition resolution may wait on the imports
//! of sibling relations; with one lock per concern there is no cycle.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::debug;

use crate::binding::column::{ColumnExpr, RenderScope};
use crate::binding::constraint::Constraint;
use crate::binding::{BindingItem, BindingSet};
use crate::config::EngineConfig;
use crate::definition::{ImportsDef, JoinType, RelationDef};
use crate::error::BinderyError;
use crate::registry::BindingRegistry;
use crate::sql::{MAIN_ALIAS, substitute_main_alias};

// ── Import specification ────────────────────────────────────────────────

/// One explicitly imported item.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportItemSpec {
    pub name: String,
    pub caption: Option<String>,
    /// A right-hand reference, possibly wrapped in a coalesce.
    pub expr: ColumnExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportSpec {
    /// Every native item of the right-hand set, renamed with `prefix`.
    Default { prefix: String },
    Explicit(Vec<ImportItemSpec>),
}

impl ImportSpec {
    fn from_def(
        def: Option<&ImportsDef>,
        context: &str,
        right: &str,
        config: &EngineConfig,
    ) -> Result<Self, BinderyError> {
        let Some(def) = def else {
            return Ok(ImportSpec::Default {
                prefix: config.default_import_prefix.clone(),
            });
        };
        if def.items.is_empty() {
            let prefix = def
                .default
                .as_ref()
                .and_then(|d| d.prefix.clone())
                .unwrap_or_else(|| config.default_import_prefix.clone());
            return Ok(ImportSpec::Default { prefix });
        }
        if def.default.is_some() {
            return Err(BinderyError::InvalidDefinition(format!(
                "{context}: imports are either default or explicit, not both"
            )));
        }

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(def.items.len());
        for item in &def.items {
            if !seen.insert(item.name.as_str()) {
                return Err(BinderyError::DuplicateElement {
                    element: format!("import '{}'", item.name),
                    context: context.to_string(),
                });
            }
            let expr = match (&item.item, &item.coalesce) {
                (Some(r), None) => ColumnExpr::joined(r),
                (None, Some(operands)) => ColumnExpr::Coalesce(
                    operands
                        .iter()
                        .map(|o| ColumnExpr::from_operand(o, right, true))
                        .collect(),
                ),
                _ => {
                    return Err(BinderyError::InvalidDefinition(format!(
                        "{context}: import '{}' needs exactly one of ref or coalesce",
                        item.name
                    )));
                }
            };
            if expr.joined_refs().len() != 1 {
                return Err(BinderyError::InvalidDefinition(format!(
                    "{context}: import '{}' must wrap exactly one right-hand column",
                    item.name
                )));
            }
            items.push(ImportItemSpec {
                name: item.name.clone(),
                caption: item.caption.clone(),
                expr,
            });
        }
        Ok(ImportSpec::Explicit(items))
    }
}

// ── Imported items ──────────────────────────────────────────────────────

/// An item of the right-hand set exposed as a virtual column of the left set.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingItemFromRelation {
    id: String,
    caption: Option<String>,
    relation_index: usize,
    source: BindingItem,
    /// SQL with the main-alias placeholder, e.g. `$MAIN_ALIAS_rel0.name`.
    template: String,
}

impl BindingItemFromRelation {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    /// The right-hand item this import wraps.
    pub fn source(&self) -> &BindingItem {
        &self.source
    }

    pub fn relation_index(&self) -> usize {
        self.relation_index
    }

    pub fn alias_suffix(&self) -> String {
        format!("_rel{}", self.relation_index)
    }

    pub fn qualified_expression(&self, main_alias: &str) -> String {
        substitute_main_alias(&self.template, main_alias)
    }
}

// ── Relations ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Relation {
    left: String,
    right: String,
    index: usize,
    join: JoinType,
    case_when: bool,
    import_spec: ImportSpec,
    condition_spec: Constraint,
    imports: OnceLock<Vec<BindingItemFromRelation>>,
    imports_lock: Mutex<()>,
    condition: OnceLock<String>,
    condition_lock: Mutex<()>,
}

impl Relation {
    /// Build the structural part of a relation. Nothing is resolved yet.
    pub fn from_def(
        left: &str,
        index: usize,
        def: &RelationDef,
        config: &EngineConfig,
    ) -> Result<Self, BinderyError> {
        if def.right.trim().is_empty() {
            return Err(BinderyError::MissingRelationTarget {
                binding_set: left.to_string(),
                target: String::new(),
            });
        }
        let context = format!("relation {left} -> {}", def.right);
        let condition_spec = Constraint::from_def(def.single_condition(&context)?, &def.right)?;
        let import_spec =
            ImportSpec::from_def(def.single_imports(&context)?, &context, &def.right, config)?;

        Ok(Relation {
            left: left.to_string(),
            right: def.right.clone(),
            index,
            join: def.join,
            case_when: def.case_when,
            import_spec,
            condition_spec,
            imports: OnceLock::new(),
            imports_lock: Mutex::new(()),
            condition: OnceLock::new(),
            condition_lock: Mutex::new(()),
        })
    }

    pub fn left(&self) -> &str {
        &self.left
    }

    pub fn right(&self) -> &str {
        &self.right
    }

    /// Ordinal position in the left set's relation list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn join_type(&self) -> JoinType {
        self.join
    }

    /// Flagged for CASE-WHEN conversion but kept as a runtime join.
    pub fn is_case_when(&self) -> bool {
        self.case_when
    }

    pub fn import_spec(&self) -> &ImportSpec {
        &self.import_spec
    }

    pub fn condition_spec(&self) -> &Constraint {
        &self.condition_spec
    }

    /// `left -> right (_relN)`, for log events and errors.
    pub fn label(&self) -> String {
        format!("{} -> {} (_rel{})", self.left, self.right, self.index)
    }

    /// Table alias of the right-hand table under `main_alias`.
    pub fn alias(&self, main_alias: &str) -> String {
        format!("{main_alias}_rel{}", self.index)
    }

    /// Whether the imports have been resolved.
    pub fn is_resolved(&self) -> bool {
        self.imports.get().is_some()
    }

    /// Whether `id` could name one of this relation's imports. Cheap; does
    /// not resolve anything.
    pub fn may_export(&self, id: &str) -> bool {
        match &self.import_spec {
            ImportSpec::Default { prefix } => id.starts_with(prefix.as_str()),
            ImportSpec::Explicit(items) => items.iter().any(|i| i.name == id),
        }
    }

    /// The imported items, resolved on first call.
    pub fn imports(
        &self,
        registry: &BindingRegistry,
    ) -> Result<&[BindingItemFromRelation], BinderyError> {
        if let Some(imports) = self.imports.get() {
            return Ok(imports);
        }
        let _guard = lock(&self.imports_lock)?;
        if let Some(imports) = self.imports.get() {
            return Ok(imports);
        }
        let resolved = self.resolve_imports(registry)?;
        debug!(relation = %self.label(), count = resolved.len(), "imports resolved");
        Ok(self.imports.get_or_init(|| resolved))
    }

    /// The ON-clause template with the main-alias placeholder, built on first
    /// call.
    pub fn condition_template(&self, registry: &BindingRegistry) -> Result<&str, BinderyError> {
        if let Some(template) = self.condition.get() {
            return Ok(template);
        }
        let _guard = lock(&self.condition_lock)?;
        if let Some(template) = self.condition.get() {
            return Ok(template);
        }
        let template = self.build_condition(registry)?;
        debug!(relation = %self.label(), template = %template, "condition template built");
        Ok(self.condition.get_or_init(|| template))
    }

    /// The ON-clause for a main table aliased `main_alias`.
    pub fn condition(
        &self,
        registry: &BindingRegistry,
        main_alias: &str,
    ) -> Result<String, BinderyError> {
        Ok(substitute_main_alias(
            self.condition_template(registry)?,
            main_alias,
        ))
    }

    /// `<JOIN> <right table> <alias> ON <condition>`.
    pub fn join_clause(
        &self,
        registry: &BindingRegistry,
        main_alias: &str,
    ) -> Result<String, BinderyError> {
        let right = self.right_set(registry)?;
        let condition = self.condition(registry, main_alias)?;
        Ok(format!(
            "{} {} {} ON {condition}",
            self.join.as_sql(),
            right.table_reference(),
            self.alias(main_alias)
        ))
    }

    fn right_set(&self, registry: &BindingRegistry) -> Result<Arc<BindingSet>, BinderyError> {
        registry.get(&self.right).map_err(|e| match e {
            BinderyError::BindingSetNotFound(_) => BinderyError::MissingRelationTarget {
                binding_set: self.left.clone(),
                target: self.right.clone(),
            },
            other => other,
        })
    }

    fn resolve_imports(
        &self,
        registry: &BindingRegistry,
    ) -> Result<Vec<BindingItemFromRelation>, BinderyError> {
        let right = self.right_set(registry)?;
        let rel_alias = self.alias(MAIN_ALIAS);

        match &self.import_spec {
            ImportSpec::Default { prefix } => Ok(right
                .items()
                .iter()
                .map(|item| BindingItemFromRelation {
                    id: format!("{prefix}{}", item.id),
                    caption: item.caption().map(str::to_string),
                    relation_index: self.index,
                    source: item.clone(),
                    template: item.qualified(&rel_alias),
                })
                .collect()),
            ImportSpec::Explicit(specs) => {
                let left = registry.get(&self.left)?;
                let scope = RenderScope::new(&left, MAIN_ALIAS).with_joined(&right, &rel_alias);
                specs
                    .iter()
                    .map(|spec| {
                        let source_id = spec.expr.joined_refs().first().copied().unwrap_or("");
                        let source = right.item(source_id).map_err(|_| {
                            BinderyError::MissingBindingItem {
                                binding_set: self.right.clone(),
                                item: source_id.to_string(),
                            }
                        })?;
                        Ok(BindingItemFromRelation {
                            id: spec.name.clone(),
                            caption: spec
                                .caption
                                .clone()
                                .or_else(|| source.caption().map(str::to_string)),
                            relation_index: self.index,
                            source: source.clone(),
                            template: spec.expr.render(&scope)?,
                        })
                    })
                    .collect()
            }
        }
    }

    fn build_condition(&self, registry: &BindingRegistry) -> Result<String, BinderyError> {
        let left = registry.get(&self.left)?;
        let right = self.right_set(registry)?;
        let rel_alias = self.alias(MAIN_ALIAS);
        let scope = RenderScope::new(&left, MAIN_ALIAS)
            .with_joined(&right, &rel_alias)
            .with_registry(registry, Some(self.index));
        let sql = self.condition_spec.render(&scope)?;
        if sql.is_empty() {
            return Err(BinderyError::InvalidDefinition(format!(
                "{}: condition renders empty",
                self.label()
            )));
        }
        Ok(sql)
    }
}

fn lock(mutex: &Mutex<()>) -> Result<MutexGuard<'_, ()>, BinderyError> {
    mutex
        .lock()
        .map_err(|_| BinderyError::InternalError("relation resolution lock poisoned".into()))
}
