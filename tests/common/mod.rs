//! Shared fixtures for integration tests: definition documents on disk and
//! scripted data sources.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use bindery::datasource::{ColumnMeta, QueryResult, StaticDataSource, StaticProvider};
use bindery::{BindingRegistry, EngineConfig, JdbcType, LoadReport, Value};

/// Orders with a runtime join to customers and a CASE-WHEN join to statuses.
pub const SALES_DEFS: &str = r#"
[[binding_set]]
id = "orders"
table = "sales.orders"
data_source = "main"

[[binding_set.column]]
id = "order_id"
type = "INTEGER"
key = true

[[binding_set.column]]
id = "customer_id"
type = "INTEGER"

[[binding_set.column]]
id = "status"
type = "INTEGER"

[[binding_set.column]]
id = "amount"

[[binding_set.relation]]
join = "leftOuter"
right = "customers"
imports = { default = { prefix = "cust_" } }
condition = { kind = "compare", op = "eq", operands = [
    { ref = "customer_id", side = "left" },
    { ref = "id", side = "right" },
] }

[[binding_set.relation]]
join = "leftOuter"
right = "statuses"
case_when = true
imports = { item = [{ name = "status_label", ref = "label" }] }
condition = { kind = "compare", op = "eq", operands = [
    { ref = "status", side = "left" },
    { ref = "code", side = "right" },
] }
"#;

pub const REFERENCE_DEFS: &str = r#"
[[binding_set]]
id = "customers"
table = "crm.customers"
data_source = "main"

[[binding_set.column]]
id = "id"
type = "INTEGER"
key = true

[[binding_set.column]]
id = "name"
type = "VARCHAR"

[[binding_set]]
id = "statuses"
table = "sales.statuses"
data_source = "main"

[[binding_set.column]]
id = "code"
type = "INTEGER"
key = true

[[binding_set.column]]
id = "label"
type = "VARCHAR"
"#;

/// Secured, audited order lines.
pub const SECURED_DEFS: &str = r#"
[[binding_set]]
id = "order_lines"
table = "sales.order_lines"
data_source = "main"

[[binding_set.column]]
id = "line_id"
type = "INTEGER"
key = true

[[binding_set.column]]
id = "region"
type = "VARCHAR"

[[binding_set.column]]
id = "note"
type = "VARCHAR"

[[binding_set.column]]
id = "createdAt"
type = "TIMESTAMP"

[[binding_set.column]]
id = "createdBy"
type = "VARCHAR"

[[binding_set.column]]
id = "updatedAt"
type = "TIMESTAMP"

[[binding_set.column]]
id = "updatedBy"
type = "VARCHAR"

[binding_set.subject_filters]
connective = "and"
filter = [{ column = "region" }]

[[binding_set.write_processing.callback]]
implementation = "rowSecurity"

[[binding_set.write_processing.callback]]
implementation = "audit"
"#;

/// Write `docs` as numbered `*.toml` files into `dir`.
pub fn write_defs(dir: &Path, docs: &[&str]) {
    for (i, doc) in docs.iter().enumerate() {
        std::fs::write(dir.join(format!("{i:02}_defs.toml")), doc)
            .expect("failed to write definition file");
    }
}

/// A source answering the statuses COUNT and DISTINCT probes.
pub fn status_source(labels: &[&str]) -> StaticDataSource {
    StaticDataSource::new()
        .respond(
            "COUNT(*)",
            QueryResult {
                columns: vec![ColumnMeta::new("count", JdbcType::BigInt)],
                rows: vec![vec![Value::Integer(labels.len() as i64)]],
            },
        )
        .respond(
            "SELECT DISTINCT",
            QueryResult {
                columns: vec![
                    ColumnMeta::new("label", JdbcType::Varchar),
                    ColumnMeta::new("code", JdbcType::Integer),
                ],
                rows: labels
                    .iter()
                    .enumerate()
                    .map(|(i, l)| vec![Value::from(*l), Value::Integer(i as i64 + 1)])
                    .collect(),
            },
        )
}

pub fn provider(source: StaticDataSource) -> StaticProvider {
    StaticProvider::new().with("main", Arc::new(source))
}

pub fn no_probe() -> EngineConfig {
    EngineConfig {
        probe_column_types: false,
        ..EngineConfig::default()
    }
}

/// Load documents through a temporary definition directory.
pub fn load_docs(
    docs: &[&str],
    config: EngineConfig,
    provider: &StaticProvider,
) -> (BindingRegistry, LoadReport) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    write_defs(dir.path(), docs);
    let defs = bindery::definition::load_dir(dir.path()).expect("definitions must parse");
    let mut registry = BindingRegistry::new(config);
    let report = registry.load(defs, provider).expect("load must not abort");
    (registry, report)
}
