//! Integration tests for the write pipeline of a binding set loaded from a
//! definition file: row-level security followed by audit stamping.

mod common;

use std::sync::Arc;

use bindery::datasource::StaticProvider;
use bindery::write::{RowType, WriteHeader, WriteRow};
use bindery::{
    BinderyError, BindingRegistry, StaticPrincipal, Value, WriteBatch, WriteContext,
};
use chrono::{TimeZone, Utc};
use common::*;

fn registry() -> BindingRegistry {
    let (registry, report) = load_docs(&[SECURED_DEFS], no_probe(), &StaticProvider::new());
    assert!(report.is_clean(), "{report:?}");
    registry
}

fn context(registry: &BindingRegistry, principal: StaticPrincipal) -> WriteContext {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    WriteContext::new(registry.get("order_lines").unwrap(), Arc::new(principal)).with_now(now)
}

fn batch(ctx: &WriteContext, rows: Vec<WriteRow>) -> WriteBatch {
    WriteBatch {
        header: WriteHeader::for_items(&ctx.binding_set, &["line_id", "note"]).unwrap(),
        rows,
    }
}

fn process(ctx: &WriteContext, batch: WriteBatch) -> Result<WriteBatch, BinderyError> {
    ctx.binding_set.write_processing().process(ctx, batch)
}

#[test]
fn test_callbacks_declared_in_order() {
    let registry = registry();
    let set = registry.get("order_lines").unwrap();
    let keys: Vec<&str> = set
        .write_processing()
        .callbacks()
        .iter()
        .map(|c| c.key())
        .collect();
    assert_eq!(keys, vec!["rowSecurity", "audit"]);
}

#[test]
fn test_insert_fills_region_and_stamps_audit_columns() {
    let registry = registry();
    let ctx = context(&registry, StaticPrincipal::new("alice").grant("region", &["EU"]));
    let out = process(
        &ctx,
        batch(
            &ctx,
            vec![WriteRow::new(
                RowType::Insert,
                vec![Value::Integer(1), Value::from("first")],
            )],
        ),
    )
    .unwrap();

    assert_eq!(
        out.header.columns,
        vec![
            "line_id",
            "note",
            "region",
            "createdAt",
            "createdBy",
            "updatedAt",
            "updatedBy"
        ]
    );
    let row = &out.rows[0];
    assert_eq!(row.value(&out.header, "region"), Some(&Value::from("EU")));
    assert_eq!(row.value(&out.header, "createdBy"), Some(&Value::from("alice")));
    assert_eq!(
        row.value(&out.header, "updatedAt"),
        Some(&Value::Timestamp(ctx.now))
    );
}

#[test]
fn test_foreign_region_aborts_whole_batch() {
    let registry = registry();
    let ctx = context(
        &registry,
        StaticPrincipal::new("alice").grant("region", &["EU", "US"]),
    );
    let mut header = WriteHeader::for_items(&ctx.binding_set, &["line_id", "region"]).unwrap();
    header.append_item(&ctx.binding_set, "note").unwrap();
    let rows = vec![
        WriteRow::new(RowType::Insert, vec![Value::Integer(1), Value::from("EU")]),
        WriteRow::new(RowType::Insert, vec![Value::Integer(2), Value::from("APAC")]),
    ];
    let err = process(&ctx, WriteBatch { header, rows }).unwrap_err();
    assert!(err.aborts_write());
    assert!(err.to_string().contains("order_lines"));
}

#[test]
fn test_empty_region_with_two_permissions_is_ambiguous() {
    let registry = registry();
    let ctx = context(
        &registry,
        StaticPrincipal::new("alice").grant("region", &["EU", "US"]),
    );
    let err = process(
        &ctx,
        batch(
            &ctx,
            vec![WriteRow::new(RowType::Insert, vec![Value::Integer(1), Value::Null])],
        ),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        BinderyError::AmbiguousEnforcedValue { candidates: 2, .. }
    ));
}

#[test]
fn test_modify_keeps_creation_stamps_out_of_the_write() {
    let registry = registry();
    let ctx = context(&registry, StaticPrincipal::new("bob").grant("region", &["*"]));
    let header =
        WriteHeader::for_items(&ctx.binding_set, &["line_id", "region", "note"]).unwrap();
    let rows = vec![
        WriteRow::new(
            RowType::Modify,
            vec![Value::Integer(7), Value::from("US"), Value::from("edited")],
        )
        .with_original(vec![Value::Integer(7), Value::from("US"), Value::from("draft")]),
    ];
    let out = process(&ctx, WriteBatch { header, rows }).unwrap();
    let emitted = out.rows[0].emitted_columns(&out.header);
    assert_eq!(
        emitted,
        vec!["line_id", "region", "note", "updatedAt", "updatedBy"]
    );
    assert_eq!(
        out.rows[0].value(&out.header, "updatedBy"),
        Some(&Value::from("bob"))
    );
}

#[test]
fn test_delete_checked_against_original_region() {
    let registry = registry();
    let ctx = context(&registry, StaticPrincipal::new("alice").grant("region", &["EU"]));
    let header = WriteHeader::for_items(&ctx.binding_set, &["line_id", "region"]).unwrap();
    let rows = vec![
        WriteRow::new(RowType::Delete, vec![Value::Integer(3), Value::Null])
            .with_original(vec![Value::Integer(3), Value::from("US")]),
    ];
    let err = process(&ctx, WriteBatch { header, rows }).unwrap_err();
    assert!(matches!(err, BinderyError::SecurityViolation { .. }));
}

#[test]
fn test_read_side_filter_matches_write_policy() {
    let registry = registry();
    let sql = bindery::SelectBuilder::new(&registry, "order_lines")
        .unwrap()
        .items(&["line_id", "region"])
        .alias("l")
        .principal(Arc::new(
            StaticPrincipal::new("alice").grant("region", &["EU", "US"]),
        ))
        .build()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT l.line_id AS \"line_id\", l.region AS \"region\" FROM sales.order_lines l \
         WHERE ((l.region = 'EU') OR (l.region = 'US'))"
    );
}
