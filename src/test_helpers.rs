//! Test helpers for building binding definitions and registries.
//!
//! Provides small builders so unit tests can focus on the behavior under
//! test instead of assembling definitions by hand.

use crate::config::EngineConfig;
use crate::datasource::StaticProvider;
use crate::definition::{
    BindingSetDef, CallbackDef, ColumnDef, CompareOpDef, ConditionDef, Connective,
    DefaultImportDef, FilterOp, ImportsDef, JoinType, OperandDef, RelationDef, Side,
    SubjectFilterDef, SubjectFiltersDef, WriteProcessingDef,
};
use crate::registry::BindingRegistry;

// ── Columns ─────────────────────────────────────────────────────────────

/// Untyped column named `id`.
pub fn column_def(id: &str) -> ColumnDef {
    ColumnDef {
        id: id.to_string(),
        ..ColumnDef::default()
    }
}

/// Column with a declared type name.
pub fn typed_column_def(id: &str, ty: &str) -> ColumnDef {
    ColumnDef {
        jdbc_type: Some(ty.to_string()),
        ..column_def(id)
    }
}

fn key_column_def(id: &str, ty: &str) -> ColumnDef {
    ColumnDef {
        key: true,
        ..typed_column_def(id, ty)
    }
}

fn side_ref(item: &str, side: Side) -> OperandDef {
    OperandDef::Ref {
        item: item.to_string(),
        side: Some(side),
    }
}

fn customer_condition() -> ConditionDef {
    ConditionDef::Compare {
        op: CompareOpDef::Eq,
        negate: false,
        operands: vec![side_ref("customer_id", Side::Left), side_ref("id", Side::Right)],
    }
}

fn table_def(id: &str, table: &str, columns: Vec<ColumnDef>) -> BindingSetDef {
    BindingSetDef {
        id: id.to_string(),
        table: Some(table.to_string()),
        derived: None,
        data_source: "main".to_string(),
        columns,
        relations: Vec::new(),
        write_processing: None,
        subject_filters: None,
        source_file: None,
        converted_relations: Vec::new(),
    }
}

// ── Binding sets ────────────────────────────────────────────────────────

/// `orders` joined left-outer to `customers`, importing everything with
/// the `cust_` prefix.
pub fn orders_def() -> BindingSetDef {
    let mut def = table_def(
        "orders",
        "sales.orders",
        vec![
            key_column_def("order_id", "INTEGER"),
            column_def("customer_id"),
            column_def("amount"),
        ],
    );
    def.relations = vec![RelationDef {
        join: JoinType::LeftOuter,
        right: "customers".to_string(),
        case_when: false,
        imports: vec![ImportsDef {
            default: Some(DefaultImportDef {
                prefix: Some("cust_".to_string()),
            }),
            items: Vec::new(),
        }],
        condition: vec![customer_condition()],
    }];
    def
}

/// `customers` with every column type declared.
pub fn customers_def() -> BindingSetDef {
    let mut name = typed_column_def("name", "VARCHAR");
    name.attributes
        .insert("caption".to_string(), "Customer name".to_string());
    table_def(
        "customers",
        "crm.customers",
        vec![
            key_column_def("id", "INTEGER"),
            name,
            typed_column_def("region", "VARCHAR"),
        ],
    )
}

pub fn regions_def() -> BindingSetDef {
    table_def(
        "regions",
        "ref.regions",
        vec![
            typed_column_def("code", "VARCHAR"),
            typed_column_def("label", "VARCHAR"),
        ],
    )
}

/// `orders` with row-level filters on `region` AND `tenant`.
pub fn secured_orders_def() -> BindingSetDef {
    let mut def = orders_def();
    def.columns.push(column_def("region"));
    def.columns.push(column_def("tenant"));
    let filter = |column: &str| SubjectFilterDef {
        column: column.to_string(),
        policy_type: None,
        op: FilterOp::Eq,
        allow_null: false,
    };
    def.subject_filters = Some(SubjectFiltersDef {
        connective: Connective::And,
        filters: vec![filter("region"), filter("tenant")],
    });
    def
}

/// `orders` with the conventional audit columns and an `audit` callback.
pub fn audited_orders_def() -> BindingSetDef {
    let mut def = table_def(
        "orders",
        "sales.orders",
        vec![
            key_column_def("order_id", "INTEGER"),
            typed_column_def("note", "VARCHAR"),
            typed_column_def("createdAt", "TIMESTAMP"),
            typed_column_def("createdBy", "VARCHAR"),
            typed_column_def("updatedAt", "TIMESTAMP"),
            typed_column_def("updatedBy", "VARCHAR"),
        ],
    );
    def.write_processing = Some(WriteProcessingDef {
        callbacks: vec![CallbackDef {
            implementation: "audit".to_string(),
            params: Vec::new(),
        }],
    });
    def
}

// ── Relations and registries ────────────────────────────────────────────

/// Relation to `right` on `customer_id = id`, with imports given as TOML.
pub fn relation_def(right: &str, imports_toml: &str) -> RelationDef {
    let imports: ImportsDef =
        toml::from_str(imports_toml).expect("imports fixture must be valid TOML");
    RelationDef {
        join: JoinType::LeftOuter,
        right: right.to_string(),
        case_when: false,
        imports: vec![imports],
        condition: vec![customer_condition()],
    }
}

/// Registry loaded from `defs` without probing any data source.
pub fn registry_of(defs: Vec<BindingSetDef>) -> BindingRegistry {
    let config = EngineConfig {
        probe_column_types: false,
        ..EngineConfig::default()
    };
    let mut registry = BindingRegistry::new(config);
    registry
        .load(defs, &StaticProvider::new())
        .expect("fixture definitions must load");
    registry
}

pub fn orders_registry() -> BindingRegistry {
    registry_of(vec![orders_def(), customers_def()])
}

// ── Assertions ──────────────────────────────────────────────────────────

/// Assert that `sql` contains `fragment`, printing the SQL on failure.
pub fn assert_sql_contains(sql: &str, fragment: &str) {
    assert!(
        sql.contains(fragment),
        "expected SQL to contain {fragment:?}\n  sql: {sql}"
    );
}
