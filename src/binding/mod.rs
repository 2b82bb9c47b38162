//! Binding sets and binding items.
//!
//! A [`BindingSet`] describes one queryable table or derived table: its typed
//! items, the relations (joins) to other binding sets, its write-processing
//! pipeline and its row-level policy. Binding sets are built from
//! [`BindingSetDef`]s by the registry and are immutable once the registry
//! hands them out; the only state that changes afterwards is the lazily
//! resolved, write-once content of their relations.

pub mod column;
pub mod constraint;
pub mod relation;
pub mod subject_filter;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::definition::{BindingSetDef, ColumnDef, ConvertedRelation};
use crate::error::BinderyError;
use crate::hash::table_alias;
use crate::registry::BindingRegistry;
use crate::sql::qualify;
use crate::types::JdbcType;
use crate::write::WriteProcessing;

pub use column::{ColumnExpr, RenderScope, TableRole};
pub use constraint::{CompareOp, Constraint};
pub use relation::{BindingItemFromRelation, ImportSpec, Relation};
pub use subject_filter::{SubjectFilter, SubjectFilters};

// ── Binding items ───────────────────────────────────────────────────────

/// Aggregation mode of an item.
///
/// `None` marks a grouping column: its presence makes the type-probing query
/// carry a `GROUP BY` over all such items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Unset,
    None,
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

impl Aggregation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Aggregation::None),
            "sum" => Some(Aggregation::Sum),
            "count" => Some(Aggregation::Count),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            "avg" => Some(Aggregation::Avg),
            _ => Option::None,
        }
    }
}

/// Where an item's JDBC type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSource {
    Declared,
    Probed,
    Default,
}

/// One typed column of a binding set.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingItem {
    pub id: String,
    /// Plain column name or an expression using the `$MAIN_ALIAS` placeholder.
    pub column_expression: String,
    pub jdbc_type: JdbcType,
    pub type_source: TypeSource,
    pub size: Option<i32>,
    pub scale: Option<i32>,
    pub nullable: Option<bool>,
    pub signed: Option<bool>,
    pub key: bool,
    pub read_only: bool,
    pub aggregation: Aggregation,
    pub attributes: BTreeMap<String, String>,
}

impl BindingItem {
    pub fn from_def(def: &ColumnDef, config: &EngineConfig) -> Result<Self, BinderyError> {
        if def.id.trim().is_empty() {
            return Err(BinderyError::InvalidDefinition(
                "column without an id".into(),
            ));
        }
        let (jdbc_type, type_source) = match &def.jdbc_type {
            Some(name) => {
                let ty = JdbcType::from_name(name).ok_or_else(|| {
                    BinderyError::InvalidDefinition(format!(
                        "column '{}': unknown type '{name}'",
                        def.id
                    ))
                })?;
                (ty, TypeSource::Declared)
            }
            None => (config.default_jdbc_type, TypeSource::Default),
        };
        let aggregation = match &def.aggr {
            Some(name) => Aggregation::from_name(name).ok_or_else(|| {
                BinderyError::InvalidDefinition(format!(
                    "column '{}': unknown aggregation '{name}'",
                    def.id
                ))
            })?,
            None => Aggregation::Unset,
        };
        Ok(BindingItem {
            id: def.id.clone(),
            column_expression: def.column.clone().unwrap_or_else(|| def.id.clone()),
            jdbc_type,
            type_source,
            size: def.size,
            scale: def.scale,
            nullable: def.nullable,
            signed: def.signed,
            key: def.key,
            read_only: def.read_only,
            aggregation,
            attributes: def.attributes.clone(),
        })
    }

    /// The column expression qualified with `alias`.
    pub fn qualified(&self, alias: &str) -> String {
        qualify(&self.column_expression, alias)
    }

    /// Display caption from the `caption` or `ui:caption` attribute.
    pub fn caption(&self) -> Option<&str> {
        self.attributes
            .get("caption")
            .or_else(|| self.attributes.get("ui:caption"))
            .map(String::as_str)
    }

    pub fn type_declared(&self) -> bool {
        self.type_source == TypeSource::Declared
    }
}

// ── Item lookup across relations ────────────────────────────────────────

/// An item reachable from a binding set: either native or imported through
/// one of its relations.
#[derive(Debug, Clone, Copy)]
pub enum ItemRef<'a> {
    Native(&'a BindingItem),
    Imported {
        relation: &'a Relation,
        item: &'a BindingItemFromRelation,
    },
}

impl ItemRef<'_> {
    pub fn id(&self) -> &str {
        match self {
            ItemRef::Native(item) => &item.id,
            ItemRef::Imported { item, .. } => item.id(),
        }
    }

    pub fn jdbc_type(&self) -> JdbcType {
        match self {
            ItemRef::Native(item) => item.jdbc_type,
            ItemRef::Imported { item, .. } => item.source().jdbc_type,
        }
    }

    pub fn is_key(&self) -> bool {
        match self {
            ItemRef::Native(item) => item.key,
            ItemRef::Imported { .. } => false,
        }
    }

    /// SQL expression of the item when the main table is aliased `main_alias`.
    pub fn qualified_expression(&self, main_alias: &str) -> String {
        match self {
            ItemRef::Native(item) => item.qualified(main_alias),
            ItemRef::Imported { item, .. } => item.qualified_expression(main_alias),
        }
    }

    /// Position of the relation that must be joined to reach this item.
    pub fn relation_index(&self) -> Option<usize> {
        match self {
            ItemRef::Native(_) => None,
            ItemRef::Imported { relation, .. } => Some(relation.index()),
        }
    }
}

// ── Binding sets ────────────────────────────────────────────────────────

/// The table a binding set reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    Table(String),
    Derived(String),
}

#[derive(Debug)]
pub struct BindingSet {
    name: String,
    table: TableSource,
    data_source: String,
    alias: String,
    items: Vec<BindingItem>,
    index: HashMap<String, usize>,
    relations: Vec<Relation>,
    write_processing: WriteProcessing,
    subject_filters: Option<SubjectFilters>,
    converted_relations: Vec<ConvertedRelation>,
    source_file: Option<PathBuf>,
}

impl BindingSet {
    /// Build a binding set from its definition.
    ///
    /// Relations are built structurally only: their targets are names that
    /// are resolved against the registry on first use. Write processing is
    /// attached separately by the registry.
    pub fn from_def(def: &BindingSetDef, config: &EngineConfig) -> Result<Self, BinderyError> {
        if def.id.trim().is_empty() {
            return Err(BinderyError::InvalidDefinition(
                "binding set without an id".into(),
            ));
        }
        let table = match (&def.table, &def.derived) {
            (Some(t), None) => TableSource::Table(t.clone()),
            (None, Some(sql)) => TableSource::Derived(sql.clone()),
            _ => {
                return Err(BinderyError::InvalidDefinition(format!(
                    "binding set '{}' needs exactly one of table or derived",
                    def.id
                )));
            }
        };

        let mut items = Vec::with_capacity(def.columns.len());
        let mut index = HashMap::new();
        for column in &def.columns {
            let item = BindingItem::from_def(column, config)?;
            if index.insert(item.id.clone(), items.len()).is_some() {
                return Err(BinderyError::DuplicateElement {
                    element: format!("column '{}'", item.id),
                    context: def.id.clone(),
                });
            }
            items.push(item);
        }

        let relations = def
            .relations
            .iter()
            .enumerate()
            .map(|(i, rel)| Relation::from_def(&def.id, i, rel, config))
            .collect::<Result<Vec<_>, _>>()?;

        let mut set = BindingSet {
            name: def.id.clone(),
            table,
            data_source: def.data_source.clone(),
            alias: table_alias(&def.id),
            items,
            index,
            relations,
            write_processing: WriteProcessing::default(),
            subject_filters: None,
            converted_relations: def.converted_relations.clone(),
            source_file: def.source_file.clone(),
        };
        if let Some(filters) = &def.subject_filters {
            set.subject_filters = Some(SubjectFilters::from_def(filters, &set)?);
        }
        Ok(set)
    }

    pub(crate) fn set_write_processing(&mut self, processing: WriteProcessing) {
        self.write_processing = processing;
    }

    pub(crate) fn items_mut(&mut self) -> &mut [BindingItem] {
        &mut self.items
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &TableSource {
        &self.table
    }

    /// The table reference for a FROM clause.
    pub fn table_reference(&self) -> String {
        match &self.table {
            TableSource::Table(name) => name.clone(),
            TableSource::Derived(sql) => format!("({sql})"),
        }
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    /// Deterministic default alias of the main table.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Native items in declaration order.
    pub fn items(&self) -> &[BindingItem] {
        &self.items
    }

    pub fn has_item(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// A native item by id.
    pub fn item(&self, id: &str) -> Result<&BindingItem, BinderyError> {
        self.index
            .get(id)
            .map(|&i| &self.items[i])
            .ok_or_else(|| BinderyError::BindingItemNotFound {
                binding_set: self.name.clone(),
                item: id.to_string(),
            })
    }

    pub fn key_items(&self) -> impl Iterator<Item = &BindingItem> {
        self.items.iter().filter(|i| i.key)
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn write_processing(&self) -> &WriteProcessing {
        &self.write_processing
    }

    pub fn subject_filters(&self) -> Option<&SubjectFilters> {
        self.subject_filters.as_ref()
    }

    /// Relations replaced by CASE-WHEN conversion at load.
    pub fn converted_relations(&self) -> &[ConvertedRelation] {
        &self.converted_relations
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    /// Look up an item, native first, then through the relations in order.
    ///
    /// Resolves the imports of candidate relations on first use.
    pub fn lookup<'a>(
        &'a self,
        registry: &BindingRegistry,
        id: &str,
    ) -> Result<ItemRef<'a>, BinderyError> {
        if let Ok(item) = self.item(id) {
            return Ok(ItemRef::Native(item));
        }
        self.lookup_imported(registry, id, None)?
            .ok_or_else(|| BinderyError::BindingItemNotFound {
                binding_set: self.name.clone(),
                item: id.to_string(),
            })
    }

    /// Look up an item imported through any relation except `skip`.
    pub(crate) fn lookup_imported<'a>(
        &'a self,
        registry: &BindingRegistry,
        id: &str,
        skip: Option<usize>,
    ) -> Result<Option<ItemRef<'a>>, BinderyError> {
        for relation in &self.relations {
            if Some(relation.index()) == skip || !relation.may_export(id) {
                continue;
            }
            if let Some(item) = relation.imports(registry)?.iter().find(|i| i.id() == id) {
                return Ok(Some(ItemRef::Imported { relation, item }));
            }
        }
        Ok(None)
    }

    /// Ids of all native and imported items, in order.
    pub fn all_item_ids(&self, registry: &BindingRegistry) -> Result<Vec<String>, BinderyError> {
        let mut ids: Vec<String> = self.items.iter().map(|i| i.id.clone()).collect();
        for relation in &self.relations {
            ids.extend(relation.imports(registry)?.iter().map(|i| i.id().to_string()));
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;

    #[test]
    fn test_item_defaults_from_config() {
        let config = EngineConfig {
            default_jdbc_type: JdbcType::Integer,
            ..EngineConfig::default()
        };
        let item = BindingItem::from_def(&column_def("qty"), &config).unwrap();
        assert_eq!(item.jdbc_type, JdbcType::Integer);
        assert_eq!(item.type_source, TypeSource::Default);
        assert_eq!(item.column_expression, "qty");
    }

    #[test]
    fn test_item_declared_type_and_aggregation() {
        let mut def = typed_column_def("total", "numeric");
        def.aggr = Some("SUM".into());
        let item = BindingItem::from_def(&def, &EngineConfig::default()).unwrap();
        assert_eq!(item.jdbc_type, JdbcType::Numeric);
        assert!(item.type_declared());
        assert_eq!(item.aggregation, Aggregation::Sum);
    }

    #[test]
    fn test_item_unknown_type_rejected() {
        let def = typed_column_def("x", "GEOMETRY");
        let err = BindingItem::from_def(&def, &EngineConfig::default()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_item_qualified_expression() {
        let mut def = column_def("upper_name");
        def.column = Some("UPPER($MAIN_ALIAS.name)".into());
        let item = BindingItem::from_def(&def, &EngineConfig::default()).unwrap();
        assert_eq!(item.qualified("o"), "UPPER(o.name)");

        let plain = BindingItem::from_def(&column_def("name"), &EngineConfig::default()).unwrap();
        assert_eq!(plain.qualified("o"), "o.name");
    }

    #[test]
    fn test_binding_set_from_def() {
        let bs = BindingSet::from_def(&orders_def(), &EngineConfig::default()).unwrap();
        assert_eq!(bs.name(), "orders");
        assert_eq!(bs.table_reference(), "sales.orders");
        assert_eq!(bs.data_source(), "main");
        assert_eq!(bs.items().len(), 3);
        assert!(bs.item("order_id").unwrap().key);
        assert_eq!(bs.key_items().count(), 1);
        assert_eq!(bs.relations().len(), 1);
        assert!(bs.alias().starts_with("orders_"));
    }

    #[test]
    fn test_binding_set_item_not_found_is_lookup_error() {
        let bs = BindingSet::from_def(&orders_def(), &EngineConfig::default()).unwrap();
        let err = bs.item("nope").unwrap_err();
        assert!(matches!(err, BinderyError::BindingItemNotFound { .. }));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_binding_set_duplicate_column() {
        let mut def = orders_def();
        def.columns.push(column_def("order_id"));
        let err = BindingSet::from_def(&def, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, BinderyError::DuplicateElement { .. }));
    }

    #[test]
    fn test_binding_set_needs_one_table_source() {
        let mut def = orders_def();
        def.derived = Some("SELECT 1".into());
        assert!(BindingSet::from_def(&def, &EngineConfig::default()).is_err());

        def.table = None;
        let bs = BindingSet::from_def(&def, &EngineConfig::default()).unwrap();
        assert_eq!(bs.table_reference(), "(SELECT 1)");
    }

    #[test]
    fn test_alias_stable_across_builds() {
        let a = BindingSet::from_def(&orders_def(), &EngineConfig::default()).unwrap();
        let b = BindingSet::from_def(&orders_def(), &EngineConfig::default()).unwrap();
        assert_eq!(a.alias(), b.alias());
    }

    #[test]
    fn test_lookup_native_and_imported() {
        let registry = orders_registry();
        let orders = registry.get("orders").unwrap();

        let native = orders.lookup(&registry, "amount").unwrap();
        assert!(matches!(native, ItemRef::Native(_)));
        assert_eq!(native.relation_index(), None);

        let imported = orders.lookup(&registry, "cust_name").unwrap();
        assert_eq!(imported.relation_index(), Some(0));
        assert_eq!(imported.qualified_expression("o"), "o_rel0.name");

        assert!(matches!(
            orders.lookup(&registry, "cust_nope"),
            Err(BinderyError::BindingItemNotFound { .. })
        ));
    }

    #[test]
    fn test_all_item_ids_include_imports() {
        let registry = orders_registry();
        let orders = registry.get("orders").unwrap();
        let ids = orders.all_item_ids(&registry).unwrap();
        assert_eq!(
            ids,
            vec!["order_id", "customer_id", "amount", "cust_id", "cust_name", "cust_region"]
        );
    }
}
