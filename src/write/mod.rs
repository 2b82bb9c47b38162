//! Write-processing pipeline.
//!
//! Every binding set carries an ordered list of callback declarations. For
//! each write, fresh callback instances are created from the declarations
//! and run over the batch: first every `on_header` hook (which may append
//! columns), then every `on_row` hook for each row in turn. Callback
//! instances hold per-write state and are never shared between writes.
//!
//! Callbacks are configured by implementation key. [`CallbackRegistry`]
//! maps keys to factories; unknown keys are rejected when the definition is
//! loaded, as are declarations that fail the callback's own check against
//! the binding set.
//!
//! A callback error aborts the write: [`WriteProcessing::process`] consumes
//! the batch and returns nothing on failure, so no partially processed rows
//! can reach the database.

pub mod audit;
pub mod row_security;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::binding::BindingSet;
use crate::definition::{ParamDef, WriteProcessingDef};
use crate::error::BinderyError;
use crate::principal::Principal;
use crate::types::JdbcType;
use crate::value::Value;

pub use audit::AuditStamping;
pub use row_security::RowLevelSecurity;

// ── Batches ─────────────────────────────────────────────────────────────

/// Kind of change a row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowType {
    Insert,
    Modify,
    Delete,
}

/// Column list of a write batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteHeader {
    pub columns: Vec<String>,
    pub column_types: Vec<JdbcType>,
    pub key_columns: Vec<String>,
}

impl WriteHeader {
    /// Header for `columns` of `set`, with types and key flags taken from the
    /// binding set.
    pub fn for_items(set: &BindingSet, columns: &[&str]) -> Result<Self, BinderyError> {
        let mut header = WriteHeader::default();
        for column in columns {
            header.append_item(set, column)?;
        }
        Ok(header)
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Index of `id`, appending it with the binding set's type and key flag
    /// when absent.
    pub fn append_item(&mut self, set: &BindingSet, id: &str) -> Result<usize, BinderyError> {
        if let Some(i) = self.index_of(id) {
            return Ok(i);
        }
        let item = set.item(id).map_err(|_| BinderyError::MissingBindingItem {
            binding_set: set.name().to_string(),
            item: id.to_string(),
        })?;
        self.columns.push(item.id.clone());
        self.column_types.push(item.jdbc_type);
        if item.key {
            self.key_columns.push(item.id.clone());
        }
        Ok(self.columns.len() - 1)
    }
}

/// One row of a write batch, index-aligned with the header.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRow {
    pub row_type: RowType,
    pub values: Vec<Value>,
    /// Values before the change, for Modify and Delete rows.
    pub original: Vec<Value>,
    /// Columns that must not be written for this row.
    pub omitted: BTreeSet<String>,
}

impl WriteRow {
    pub fn new(row_type: RowType, values: Vec<Value>) -> Self {
        WriteRow {
            row_type,
            values,
            original: Vec::new(),
            omitted: BTreeSet::new(),
        }
    }

    pub fn with_original(mut self, original: Vec<Value>) -> Self {
        self.original = original;
        self
    }

    /// Pad with NULLs up to `width` columns.
    pub fn pad_to(&mut self, width: usize) {
        if self.values.len() < width {
            self.values.resize(width, Value::Null);
        }
        if !self.original.is_empty() && self.original.len() < width {
            self.original.resize(width, Value::Null);
        }
    }

    pub fn value<'a>(&'a self, header: &WriteHeader, column: &str) -> Option<&'a Value> {
        header.index_of(column).and_then(|i| self.values.get(i))
    }

    pub fn original_value<'a>(&'a self, header: &WriteHeader, column: &str) -> Option<&'a Value> {
        header.index_of(column).and_then(|i| self.original.get(i))
    }

    /// Header columns this row writes, in header order.
    pub fn emitted_columns<'h>(&self, header: &'h WriteHeader) -> Vec<&'h str> {
        header
            .columns
            .iter()
            .filter(|c| !self.omitted.contains(*c))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub header: WriteHeader,
    pub rows: Vec<WriteRow>,
}

// ── Callbacks ───────────────────────────────────────────────────────────

/// Per-write environment handed to callback factories.
#[derive(Clone)]
pub struct WriteContext {
    pub binding_set: Arc<BindingSet>,
    pub principal: Arc<dyn Principal>,
    pub now: DateTime<Utc>,
}

impl WriteContext {
    pub fn new(binding_set: Arc<BindingSet>, principal: Arc<dyn Principal>) -> Self {
        WriteContext {
            binding_set,
            principal,
            now: Utc::now(),
        }
    }

    /// Fix the timestamp used for `$now`.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// A write interceptor. One instance serves exactly one write.
pub trait WriteCallback: Send {
    /// Inspect or extend the column list before any row is processed.
    fn on_header(&mut self, header: &mut WriteHeader) -> Result<(), BinderyError>;

    /// Inspect or rewrite one row. The row is already padded to the header.
    fn on_row(&mut self, header: &WriteHeader, row: &mut WriteRow) -> Result<(), BinderyError>;
}

/// Creates a callback instance for one write from its declared parameters.
pub type CallbackFactory = Arc<
    dyn Fn(&WriteContext, &[ParamDef]) -> Result<Box<dyn WriteCallback>, BinderyError>
        + Send
        + Sync,
>;

/// Checks a callback declaration against the binding set that declares it.
/// Runs once, when the definition is loaded.
pub type CallbackCheck =
    Arc<dyn Fn(&BindingSet, &[ParamDef]) -> Result<(), BinderyError> + Send + Sync>;

#[derive(Clone)]
struct CallbackEntry {
    factory: CallbackFactory,
    check: Option<CallbackCheck>,
}

/// Maps implementation keys to factories.
#[derive(Clone)]
pub struct CallbackRegistry {
    entries: HashMap<String, CallbackEntry>,
}

impl Default for CallbackRegistry {
    /// The built-in callbacks.
    fn default() -> Self {
        let mut registry = CallbackRegistry::empty();
        registry.register_checked(
            AuditStamping::KEY,
            |ctx, params| Ok(Box::new(AuditStamping::new(ctx, params)?) as Box<dyn WriteCallback>),
            AuditStamping::check,
        );
        registry.register_checked(
            RowLevelSecurity::KEY,
            |ctx, params| {
                Ok(Box::new(RowLevelSecurity::new(ctx, params)?) as Box<dyn WriteCallback>)
            },
            RowLevelSecurity::check,
        );
        registry
    }
}

impl CallbackRegistry {
    pub fn empty() -> Self {
        CallbackRegistry {
            entries: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, key: &str, factory: F)
    where
        F: Fn(&WriteContext, &[ParamDef]) -> Result<Box<dyn WriteCallback>, BinderyError>
            + Send
            + Sync
            + 'static,
    {
        self.entries.insert(
            key.to_string(),
            CallbackEntry {
                factory: Arc::new(factory),
                check: None,
            },
        );
    }

    /// Register a factory together with a load-time check of its
    /// declarations.
    pub fn register_checked<F, C>(&mut self, key: &str, factory: F, check: C)
    where
        F: Fn(&WriteContext, &[ParamDef]) -> Result<Box<dyn WriteCallback>, BinderyError>
            + Send
            + Sync
            + 'static,
        C: Fn(&BindingSet, &[ParamDef]) -> Result<(), BinderyError> + Send + Sync + 'static,
    {
        self.entries.insert(
            key.to_string(),
            CallbackEntry {
                factory: Arc::new(factory),
                check: Some(Arc::new(check)),
            },
        );
    }

    pub fn get(&self, key: &str) -> Result<CallbackFactory, BinderyError> {
        self.entry(key).map(|e| e.factory)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn entry(&self, key: &str) -> Result<CallbackEntry, BinderyError> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| BinderyError::UnknownCallback(key.to_string()))
    }
}

/// A configured callback: factory plus immutable parameters.
#[derive(Clone)]
pub struct CallbackDecl {
    key: String,
    params: Vec<ParamDef>,
    factory: CallbackFactory,
    check: Option<CallbackCheck>,
}

impl CallbackDecl {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn params(&self) -> &[ParamDef] {
        &self.params
    }
}

impl fmt::Debug for CallbackDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackDecl")
            .field("key", &self.key)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// The ordered callback declarations of a binding set.
#[derive(Debug, Clone, Default)]
pub struct WriteProcessing {
    callbacks: Vec<CallbackDecl>,
}

impl WriteProcessing {
    /// Resolve declarations against `registry`; unknown keys fail.
    pub fn from_def(
        def: Option<&WriteProcessingDef>,
        registry: &CallbackRegistry,
    ) -> Result<Self, BinderyError> {
        let Some(def) = def else {
            return Ok(WriteProcessing::default());
        };
        let callbacks = def
            .callbacks
            .iter()
            .map(|cb| {
                let entry = registry.entry(&cb.implementation)?;
                Ok(CallbackDecl {
                    key: cb.implementation.clone(),
                    params: cb.params.clone(),
                    factory: entry.factory,
                    check: entry.check,
                })
            })
            .collect::<Result<Vec<_>, BinderyError>>()?;
        Ok(WriteProcessing { callbacks })
    }

    /// Run every declaration's load-time check against `set`.
    pub fn check(&self, set: &BindingSet) -> Result<(), BinderyError> {
        for decl in &self.callbacks {
            if let Some(check) = &decl.check {
                check(set, &decl.params)?;
            }
        }
        Ok(())
    }

    pub fn callbacks(&self) -> &[CallbackDecl] {
        &self.callbacks
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Fresh callback instances for one write.
    pub fn instantiate(
        &self,
        ctx: &WriteContext,
    ) -> Result<Vec<Box<dyn WriteCallback>>, BinderyError> {
        self.callbacks
            .iter()
            .map(|decl| (decl.factory)(ctx, &decl.params))
            .collect()
    }

    /// Run the pipeline over `batch`.
    pub fn process(
        &self,
        ctx: &WriteContext,
        mut batch: WriteBatch,
    ) -> Result<WriteBatch, BinderyError> {
        let width = batch.header.len();
        if let Some(row) = batch.rows.iter().find(|r| r.values.len() > width) {
            return Err(BinderyError::InternalError(format!(
                "row has {} values for {width} columns",
                row.values.len()
            )));
        }

        let mut callbacks = self.instantiate(ctx)?;
        for callback in callbacks.iter_mut() {
            callback.on_header(&mut batch.header)?;
        }
        let width = batch.header.len();
        for row in batch.rows.iter_mut() {
            row.pad_to(width);
            for callback in callbacks.iter_mut() {
                callback.on_row(&batch.header, row)?;
            }
        }
        Ok(batch)
    }
}
