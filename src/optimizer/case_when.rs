//! CASE-WHEN conversion of reference-data joins.
//!
//! An outer join to a small reference table (status codes, country names)
//! costs a join per query for what is effectively a constant lookup. A
//! relation flagged `case_when = true` is rewritten at load into one
//! computed item per import:
//!
//! ```sql
//! CASE WHEN $MAIN_ALIAS.status = 1 THEN 'open'
//!      WHEN $MAIN_ALIAS.status = 2 THEN 'closed'
//!      ...
//!      ELSE CASE WHEN ... END
//! END
//! ```
//!
//! The WHEN branches are built from the distinct rows of the reference table.
//! After every `case_when_branch_limit` branches a nested CASE starts in the
//! ELSE arm, so an expression over `n` rows ends with `ceil(n / limit)` ENDs.
//!
//! Conversion is skipped, with a warning, for inner joins, empty or
//! oversized reference tables, LIKE conditions, coalesce imports and any
//! data-source error. The relation then stays a runtime join.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::binding::column::{ColumnExpr, RenderScope, TableRole};
use crate::binding::constraint::Constraint;
use crate::binding::BindingSet;
use crate::config::EngineConfig;
use crate::datasource::{DataSource, DataSourceProvider};
use crate::definition::{BindingSetDef, ColumnDef, ConvertedRelation, RelationDef};
use crate::error::BinderyError;
use crate::sql::{MAIN_ALIAS, quote_ident};
use crate::value::Value;

/// Computed items replacing one relation.
#[derive(Debug)]
struct Conversion {
    columns: Vec<ColumnDef>,
    record: ConvertedRelation,
}

/// One import to inline: the exposed name and the right-hand source item.
#[derive(Debug)]
struct ImportPair {
    name: String,
    source: String,
    caption: Option<String>,
}

/// Convert every flagged relation in `defs` that can be converted.
///
/// Right-hand binding sets are looked up in `defs` first, then in
/// `registered`. Returns the labels of the converted relations. Never fails.
pub fn convert_flagged(
    defs: &mut [BindingSetDef],
    registered: &HashMap<String, BindingSetDef>,
    provider: &dyn DataSourceProvider,
    config: &EngineConfig,
) -> Vec<String> {
    let mut converted = Vec::new();
    for i in 0..defs.len() {
        let flagged: Vec<usize> = defs[i]
            .relations
            .iter()
            .enumerate()
            .filter(|(_, rel)| rel.case_when)
            .map(|(j, _)| j)
            .collect();
        if flagged.is_empty() {
            continue;
        }

        let mut removed = Vec::new();
        for j in flagged {
            let rel = defs[i].relations[j].clone();
            let right = defs
                .iter()
                .find(|d| d.id == rel.right)
                .or_else(|| registered.get(&rel.right))
                .cloned();
            let label = format!("{} -> {}", defs[i].id, rel.right);

            match convert_relation(&defs[i], &rel, right.as_ref(), provider, config) {
                Ok(conversion) => {
                    debug!(
                        relation = %label,
                        items = conversion.record.generated_items.len(),
                        "relation converted to CASE expressions"
                    );
                    defs[i].columns.extend(conversion.columns);
                    defs[i].converted_relations.push(conversion.record);
                    removed.push(j);
                    converted.push(label);
                }
                Err(e) => {
                    warn!(
                        relation = %label,
                        file = %defs[i].file_label(),
                        error = %e,
                        "CASE-WHEN conversion not applied; keeping runtime join"
                    );
                }
            }
        }
        for j in removed.into_iter().rev() {
            defs[i].relations.remove(j);
        }
    }
    converted
}

fn convert_relation(
    left_def: &BindingSetDef,
    rel: &RelationDef,
    right_def: Option<&BindingSetDef>,
    provider: &dyn DataSourceProvider,
    config: &EngineConfig,
) -> Result<Conversion, BinderyError> {
    if !rel.join.is_outer() {
        return Err(BinderyError::CaseWhenSkipped(format!(
            "{} is never converted",
            rel.join.as_sql()
        )));
    }
    let right_def = right_def.ok_or_else(|| BinderyError::MissingRelationTarget {
        binding_set: left_def.id.clone(),
        target: rel.right.clone(),
    })?;
    let context = format!("relation {} -> {}", left_def.id, rel.right);
    let condition = Constraint::from_def(rel.single_condition(&context)?, &rel.right)?;
    let imports = import_pairs(rel, right_def, &context, config)?;

    let left = provisional(left_def, config)?;
    let right = provisional(right_def, config)?;
    for import in &imports {
        if left.has_item(&import.name) {
            return Err(BinderyError::InvalidDefinition(format!(
                "{context}: import '{}' collides with an existing item",
                import.name
            )));
        }
    }

    // Operand sides are checked once against the placeholder aliases.
    condition.render(&RenderScope::new(&left, MAIN_ALIAS).with_joined(&right, right.alias()))?;

    let source = provider.data_source(&right_def.data_source)?;
    let table = right.table_reference();
    let count = row_count(source.as_ref(), &table)?;
    if count == 0 {
        return Err(BinderyError::CaseWhenSkipped(format!(
            "reference table {table} is empty"
        )));
    }
    if let Some(max) = config.case_when_max_rows {
        if count > max {
            return Err(BinderyError::CaseWhenSkipped(format!(
                "reference table {table} has {count} rows, limit is {max}"
            )));
        }
    }

    let condition_refs = right_refs(&condition, &left);
    let mut columns = Vec::with_capacity(imports.len());
    for import in &imports {
        let fragments = when_fragments(
            source.as_ref(),
            &condition,
            &left,
            &right,
            &import.source,
            &condition_refs,
        )?;
        if fragments.is_empty() {
            return Err(BinderyError::CaseWhenSkipped(format!(
                "no values for '{}' in {table}",
                import.source
            )));
        }
        columns.push(generated_column(
            import,
            right_def,
            assemble_case(&fragments, config.case_when_branch_limit),
        ));
    }

    let original = serde_json::to_string(rel)
        .map_err(|e| BinderyError::InternalError(format!("cannot serialize relation: {e}")))?;
    Ok(Conversion {
        record: ConvertedRelation {
            right: rel.right.clone(),
            original,
            generated_items: columns.iter().map(|c| c.id.clone()).collect(),
        },
        columns,
    })
}

/// Build a binding set of the definition's own items only.
fn provisional(def: &BindingSetDef, config: &EngineConfig) -> Result<BindingSet, BinderyError> {
    let mut def = def.clone();
    def.relations.clear();
    def.subject_filters = None;
    def.write_processing = None;
    BindingSet::from_def(&def, config)
}

fn import_pairs(
    rel: &RelationDef,
    right_def: &BindingSetDef,
    context: &str,
    config: &EngineConfig,
) -> Result<Vec<ImportPair>, BinderyError> {
    let imports = rel.single_imports(context)?;
    let explicit = imports.map(|i| i.items.as_slice()).unwrap_or_default();
    if explicit.is_empty() {
        let prefix = imports
            .and_then(|i| i.default.as_ref())
            .and_then(|d| d.prefix.clone())
            .unwrap_or_else(|| config.default_import_prefix.clone());
        return Ok(right_def
            .columns
            .iter()
            .map(|c| ImportPair {
                name: format!("{prefix}{}", c.id),
                source: c.id.clone(),
                caption: None,
            })
            .collect());
    }
    explicit
        .iter()
        .map(|item| match (&item.item, &item.coalesce) {
            (Some(source), None) => Ok(ImportPair {
                name: item.name.clone(),
                source: source.clone(),
                caption: item.caption.clone(),
            }),
            _ => Err(BinderyError::UnsupportedInCaseWhen(format!(
                "import '{}' without a plain ref",
                item.name
            ))),
        })
        .collect()
}

/// Right-hand items the condition reads, in first-use order.
fn right_refs(condition: &Constraint, left: &BindingSet) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for operand in condition.operands() {
        collect_right_refs(operand, left, &mut refs);
    }
    refs
}

fn collect_right_refs(expr: &ColumnExpr, left: &BindingSet, out: &mut Vec<String>) {
    let name = match expr {
        ColumnExpr::Physical {
            table: TableRole::Joined,
            name,
        } => name,
        ColumnExpr::RelationRef { name, .. } if !left.has_item(name) => name,
        ColumnExpr::Coalesce(children) => {
            for child in children {
                collect_right_refs(child, left, out);
            }
            return;
        }
        _ => return,
    };
    if !out.contains(name) {
        out.push(name.clone());
    }
}

fn row_count(source: &dyn DataSource, table: &str) -> Result<u64, BinderyError> {
    let result = source.query(&format!("SELECT COUNT(*) FROM {table}"))?;
    match result.scalar() {
        Some(Value::Integer(n)) => Ok((*n).max(0) as u64),
        Some(Value::Text(s)) => s
            .trim()
            .parse()
            .map_err(|_| BinderyError::DataSource(format!("unexpected row count: {s}"))),
        other => Err(BinderyError::DataSource(format!(
            "unexpected row count: {other:?}"
        ))),
    }
}

/// One `WHEN <condition> THEN <value>` per distinct reference row, ordered
/// by the imported value.
fn when_fragments(
    source: &dyn DataSource,
    condition: &Constraint,
    left: &BindingSet,
    right: &BindingSet,
    value_item: &str,
    condition_refs: &[String],
) -> Result<Vec<String>, BinderyError> {
    let mut columns = vec![value_item];
    columns.extend(
        condition_refs
            .iter()
            .map(String::as_str)
            .filter(|c| *c != value_item),
    );

    let alias = right.alias();
    let select = columns
        .iter()
        .map(|c| Ok(format!("{} AS {}", right.item(c)?.qualified(alias), quote_ident(c))))
        .collect::<Result<Vec<_>, BinderyError>>()?;
    let order: Vec<String> = (1..=columns.len()).map(|n| n.to_string()).collect();
    let sql = format!(
        "SELECT DISTINCT {} FROM {} {alias} ORDER BY {}",
        select.join(", "),
        right.table_reference(),
        order.join(", ")
    );

    let result = source.query(&sql)?;
    let mut fragments = Vec::with_capacity(result.rows.len());
    for row in result.rows {
        if row.len() < columns.len() {
            return Err(BinderyError::DataSource(format!(
                "expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        let values: HashMap<String, Value> = columns
            .iter()
            .map(|c| c.to_string())
            .zip(row)
            .collect();
        let scope = RenderScope::new(left, MAIN_ALIAS)
            .with_joined(right, alias)
            .with_case_when_row(&values);
        let when = condition.render(&scope)?;
        let then = values
            .get(value_item)
            .map(Value::to_sql_literal)
            .unwrap_or_else(|| "NULL".to_string());
        fragments.push(format!("WHEN {when} THEN {then}"));
    }
    Ok(fragments)
}

/// Join WHEN fragments into a CASE expression, nesting a new CASE in the
/// ELSE arm after every `branch_limit` fragments.
pub fn assemble_case(fragments: &[String], branch_limit: usize) -> String {
    let blocks: Vec<String> = fragments
        .chunks(branch_limit.max(1))
        .map(|chunk| chunk.join(" "))
        .collect();
    let mut sql = String::new();
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            sql.push_str(" ELSE ");
        }
        sql.push_str("CASE ");
        sql.push_str(block);
    }
    for _ in 0..blocks.len() {
        sql.push_str(" END");
    }
    sql
}

fn generated_column(import: &ImportPair, right_def: &BindingSetDef, expr: String) -> ColumnDef {
    let source = right_def.columns.iter().find(|c| c.id == import.source);
    let mut attributes = source.map(|c| c.attributes.clone()).unwrap_or_default();
    if let Some(caption) = &import.caption {
        attributes.insert("caption".into(), caption.clone());
    }
    ColumnDef {
        id: import.name.clone(),
        column: Some(expr),
        jdbc_type: source.and_then(|c| c.jdbc_type.clone()),
        size: source.and_then(|c| c.size),
        scale: source.and_then(|c| c.scale),
        nullable: Some(true),
        signed: source.and_then(|c| c.signed),
        key: false,
        read_only: true,
        aggr: None,
        attributes,
    }
}
