//! bindery: binding-set metadata and SQL generation.
//!
//! A *binding set* describes one queryable table: its typed items, the
//! relations (joins) through which it imports items of other binding sets,
//! the write callbacks that intercept changes to it, and the row-level
//! subject filters that restrict who may see and change which rows.
//!
//! Binding sets are loaded from declarative TOML definitions into a
//! [`BindingRegistry`]. Relations are linked lazily: import lists and join
//! conditions are compiled to SQL templates on first use and memoized for
//! the lifetime of the registry.
//!
//! # Layout
//!
//! - [`definition`]: the definition schema and TOML loading.
//! - [`registry`]: loading passes, type probing, lookup by name.
//! - [`binding`]: binding sets, items, relations, join constraints.
//! - [`optimizer`]: load-time CASE-WHEN inlining of lookup joins.
//! - [`select`]: SELECT composition for consumers.
//! - [`write`]: the write-callback pipeline, audit stamping and row-level
//!   security.
//! - [`datasource`]: database access behind a trait, with a PostgreSQL
//!   implementation and a scripted in-memory one.

pub mod binding;
pub mod config;
pub mod datasource;
pub mod definition;
pub mod error;
pub mod hash;
pub mod optimizer;
pub mod principal;
pub mod registry;
pub mod select;
pub mod sql;
pub mod types;
pub mod value;
pub mod write;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use binding::{BindingItem, BindingSet, ItemRef, Relation};
pub use config::EngineConfig;
pub use datasource::{DataSource, DataSourceProvider};
pub use error::{BinderyError, BinderyErrorKind};
pub use principal::{Principal, StaticPrincipal};
pub use registry::{BindingRegistry, LoadReport};
pub use select::SelectBuilder;
pub use types::JdbcType;
pub use value::Value;
pub use write::{WriteBatch, WriteContext, WriteProcessing};
