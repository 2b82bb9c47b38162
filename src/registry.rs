//! Binding registry: the name-indexed store of loaded binding sets.
//!
//! # Loading
//!
//! [`BindingRegistry::load`] runs in passes:
//!
//! 1. **Names.** Duplicate binding-set names reject the later definition
//!    (or abort the whole load with `abort_on_duplicate`).
//! 2. **CASE-WHEN conversion.** Flagged relations may be rewritten into
//!    computed items; see [`crate::optimizer`].
//! 3. **Structure.** Each definition becomes a [`BindingSet`]. Relation
//!    targets stay names; write callbacks run their load-time checks. A
//!    failing definition is rejected alone.
//! 4. **Type probing.** For binding sets with undeclared item types, one
//!    `SELECT … WHERE 1=0` statement per set asks the data source for column
//!    metadata. When it fails, items are probed one by one; items that still
//!    fail keep their configured type.
//!
//! Relations are never linked during load. They resolve against the
//! registry on first use, so definitions may arrive in any order and
//! reference each other cyclically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::binding::{Aggregation, BindingItem, BindingSet, TypeSource};
use crate::config::EngineConfig;
use crate::datasource::{ColumnMeta, DataSourceProvider};
use crate::definition::BindingSetDef;
use crate::error::BinderyError;
use crate::optimizer::case_when;
use crate::sql::quote_ident;
use crate::write::{CallbackRegistry, WriteProcessing};

/// Outcome of one [`BindingRegistry::load`] call.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Names of the binding sets that were registered.
    pub loaded: Vec<String>,
    /// Definitions that were rejected, with the reason.
    pub rejected: Vec<(String, BinderyError)>,
    /// Labels of relations replaced by CASE-WHEN conversion.
    pub converted: Vec<String>,
    /// Items whose type could not be probed.
    pub probe_failures: Vec<ProbeFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.probe_failures.is_empty()
    }
}

/// An item (or a whole binding set, when `item` is `None`) whose column type
/// could not be learned from the data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub binding_set: String,
    pub item: Option<String>,
    pub error: String,
}

pub struct BindingRegistry {
    config: EngineConfig,
    callbacks: CallbackRegistry,
    sets: HashMap<String, Arc<BindingSet>>,
    /// Definitions of `sets`, after CASE-WHEN conversion. Later loads
    /// convert relations that target them.
    definitions: HashMap<String, BindingSetDef>,
}

impl BindingRegistry {
    /// An empty registry with the built-in write callbacks.
    pub fn new(config: EngineConfig) -> Self {
        BindingRegistry {
            config,
            callbacks: CallbackRegistry::default(),
            sets: HashMap::new(),
            definitions: HashMap::new(),
        }
    }

    /// Replace the write-callback registry used for subsequent loads.
    pub fn with_callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load definitions into the registry.
    ///
    /// Returns `Err` only when `abort_on_duplicate` is set and a duplicate
    /// name is found; the registry is left unchanged in that case. Every
    /// other failure is scoped to its definition and listed in the report.
    pub fn load(
        &mut self,
        defs: Vec<BindingSetDef>,
        provider: &dyn DataSourceProvider,
    ) -> Result<LoadReport, BinderyError> {
        let mut report = LoadReport::default();

        // ── Pass 0: names ───────────────────────────────────────────────
        let mut seen: HashSet<String> = self.sets.keys().cloned().collect();
        let mut accepted = Vec::with_capacity(defs.len());
        for def in defs {
            if !seen.insert(def.id.clone()) {
                let err = BinderyError::DuplicateBindingSet(def.id.clone());
                if self.config.abort_on_duplicate {
                    return Err(err);
                }
                warn!(binding_set = %def.id, file = %def.file_label(), "duplicate binding set rejected");
                report.rejected.push((def.id.clone(), err));
                continue;
            }
            accepted.push(def);
        }

        // ── Pass 1: CASE-WHEN conversion ────────────────────────────────
        if self.config.case_when_enabled {
            report.converted = case_when::convert_flagged(
                &mut accepted,
                &self.definitions,
                provider,
                &self.config,
            );
        }

        // ── Pass 2: structure ───────────────────────────────────────────
        let mut built = Vec::with_capacity(accepted.len());
        for def in accepted {
            match self.build(&def) {
                Ok(set) => built.push((set, def)),
                Err(e) => {
                    warn!(binding_set = %def.id, file = %def.file_label(), error = %e, "binding set rejected");
                    report.rejected.push((def.id.clone(), e));
                }
            }
        }

        // ── Pass 3: type probing ────────────────────────────────────────
        if self.config.probe_column_types {
            for (set, _) in &mut built {
                report
                    .probe_failures
                    .extend(probe_column_types(set, provider));
            }
        }

        for (set, def) in built {
            report.loaded.push(set.name().to_string());
            self.definitions.insert(def.id.clone(), def);
            self.sets.insert(set.name().to_string(), Arc::new(set));
        }

        for name in &report.loaded {
            if let Some(set) = self.sets.get(name) {
                for rel in set.relations() {
                    if !self.sets.contains_key(rel.right()) {
                        warn!(relation = %rel.label(), "relation target is not registered");
                    }
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            converted = report.converted.len(),
            probe_failures = report.probe_failures.len(),
            "binding sets loaded"
        );
        Ok(report)
    }

    fn build(&self, def: &BindingSetDef) -> Result<BindingSet, BinderyError> {
        let mut set = BindingSet::from_def(def, &self.config)?;
        let processing = WriteProcessing::from_def(def.write_processing.as_ref(), &self.callbacks)?;
        processing.check(&set)?;
        set.set_write_processing(processing);
        Ok(set)
    }

    /// A binding set by name.
    pub fn get(&self, name: &str) -> Result<Arc<BindingSet>, BinderyError> {
        self.sets
            .get(name)
            .cloned()
            .ok_or_else(|| BinderyError::BindingSetNotFound(name.to_string()))
    }

    /// A binding set by name, verifying that every required item exists
    /// natively or through one of its relations.
    pub fn get_with_items(
        &self,
        name: &str,
        required: &[&str],
    ) -> Result<Arc<BindingSet>, BinderyError> {
        let set = self.get(name)?;
        for id in required {
            set.lookup(self, id)?;
        }
        Ok(set)
    }

    pub fn has_binding_set(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Drop every binding set.
    pub fn clear(&mut self) {
        self.sets.clear();
        self.definitions.clear();
    }
}

// ── Type probing ────────────────────────────────────────────────────────

/// `SELECT <items> FROM <table> <alias> WHERE 1=0 [GROUP BY <grouping items>]`
pub fn probe_sql(set: &BindingSet, indices: &[usize]) -> String {
    let alias = set.alias();
    let items: Vec<&BindingItem> = indices.iter().map(|&i| &set.items()[i]).collect();
    let select: Vec<String> = items
        .iter()
        .map(|item| format!("{} AS {}", item.qualified(alias), quote_ident(&item.id)))
        .collect();
    let group_by: Vec<String> = items
        .iter()
        .filter(|item| item.aggregation == Aggregation::None)
        .map(|item| item.qualified(alias))
        .collect();

    let mut sql = format!(
        "SELECT {} FROM {} {alias} WHERE 1=0",
        select.join(", "),
        set.table_reference()
    );
    if !group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by.join(", "));
    }
    sql
}

fn apply_meta(item: &mut BindingItem, meta: &ColumnMeta) {
    item.jdbc_type = meta.jdbc_type;
    item.type_source = TypeSource::Probed;
    if item.nullable.is_none() {
        item.nullable = meta.nullable;
    }
    if item.size.is_none() {
        item.size = meta.size;
    }
    if item.scale.is_none() {
        item.scale = meta.scale;
    }
    if item.signed.is_none() {
        item.signed = meta.signed;
    }
}

/// Learn the types of undeclared items. Never fails; returns what could not
/// be probed.
fn probe_column_types(
    set: &mut BindingSet,
    provider: &dyn DataSourceProvider,
) -> Vec<ProbeFailure> {
    let pending: Vec<usize> = set
        .items()
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.type_declared())
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return Vec::new();
    }

    let source = match provider.data_source(set.data_source()) {
        Ok(source) => source,
        Err(e) => {
            warn!(binding_set = %set.name(), error = %e, "no data source for type probing");
            return vec![ProbeFailure {
                binding_set: set.name().to_string(),
                item: None,
                error: e.to_string(),
            }];
        }
    };

    let all: Vec<usize> = (0..set.items().len()).collect();
    let sql = probe_sql(set, &all);
    match source.describe(&sql) {
        Ok(meta) if meta.len() == all.len() => {
            for &i in &pending {
                apply_meta(&mut set.items_mut()[i], &meta[i]);
            }
            debug!(binding_set = %set.name(), probed = pending.len(), "column types probed");
            return Vec::new();
        }
        Ok(meta) => {
            debug!(
                binding_set = %set.name(),
                expected = all.len(),
                got = meta.len(),
                "probe returned unexpected column count; probing items individually"
            );
        }
        Err(e) => {
            debug!(binding_set = %set.name(), error = %e, "set probe failed; probing items individually");
        }
    }

    let mut failures = Vec::new();
    for i in pending {
        let sql = probe_sql(set, &[i]);
        let result = source.describe(&sql).and_then(|meta| match meta.as_slice() {
            [one] => Ok(one.clone()),
            _ => Err(BinderyError::DataSource(format!(
                "expected one column, got {}",
                meta.len()
            ))),
        });
        match result {
            Ok(meta) => apply_meta(&mut set.items_mut()[i], &meta),
            Err(e) => {
                let item = &set.items()[i];
                warn!(
                    binding_set = %set.name(),
                    item = %item.id,
                    jdbc_type = %item.jdbc_type,
                    error = %e,
                    "column type probe failed; keeping configured type"
                );
                failures.push(ProbeFailure {
                    binding_set: set.name().to_string(),
                    item: Some(item.id.clone()),
                    error: e.to_string(),
                });
            }
        }
    }
    failures
}
