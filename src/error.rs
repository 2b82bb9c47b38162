//! Error types for bindery.
//!
//! All errors that can occur within the engine are represented by [`BinderyError`].
//! Errors are propagated via `Result<T, BinderyError>` throughout the codebase.
//!
//! # Error Classification
//!
//! Errors are classified into kinds that determine how a caller reacts:
//! - **Configuration**: a bad binding definition. Raised during load or on the
//!   first lazy resolution of a relation; scoped to the offending definition.
//! - **Lookup**: an unknown binding set or item requested by a caller.
//! - **Security**: a row-level policy violation. Aborts the whole write.
//! - **Optimizer**: CASE-WHEN conversion could not be applied. Only ever logged.
//! - **System**: data-source, I/O and parse failures.
//! - **Internal**: bugs.
//!
//! Nothing in this crate retries.

use std::fmt;

/// Primary error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum BinderyError {
    // ── Configuration errors ─────────────────────────────────────────────
    /// Two definitions share the same binding-set name.
    #[error("duplicate binding set: {0}")]
    DuplicateBindingSet(String),

    /// A relation names a right-hand binding set that is not registered.
    #[error("relation of '{binding_set}' references unknown binding set '{target}'")]
    MissingRelationTarget { binding_set: String, target: String },

    /// A definition element that may appear at most once appeared more often.
    #[error("more than one {element} element in {context}")]
    DuplicateElement { element: String, context: String },

    /// A write-processing callback names an implementation that is not registered.
    #[error("unknown write callback implementation: {0}")]
    UnknownCallback(String),

    /// Both operands of a comparison render to the same SQL.
    #[error("ambiguous constraint in {context}: both operands render as {operand}")]
    AmbiguousConstraint { context: String, operand: String },

    /// A binding definition is structurally invalid.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// Relations of one binding set read each other's imports in a cycle.
    #[error("join cycle in binding set '{binding_set}': {}", .relations.join(", "))]
    JoinCycle {
        binding_set: String,
        relations: Vec<String>,
    },

    /// A write callback or relation requires an item the binding set lacks.
    #[error("binding set '{binding_set}' lacks required item '{item}'")]
    MissingBindingItem { binding_set: String, item: String },

    // ── Lookup errors ────────────────────────────────────────────────────
    /// The requested binding set is not registered.
    #[error("binding set not found: {0}")]
    BindingSetNotFound(String),

    /// The requested item does not exist in the binding set.
    #[error("binding item '{item}' not found in binding set '{binding_set}'")]
    BindingItemNotFound { binding_set: String, item: String },

    // ── Security errors: abort the write ────────────────────────────────
    /// A row does not satisfy the binding set's row-level policy.
    #[error("security violation on '{binding_set}': {detail}")]
    SecurityViolation { binding_set: String, detail: String },

    /// An empty enforced value cannot be filled because several permissions apply.
    #[error("ambiguous enforced value for column '{column}': {candidates} permitted values")]
    AmbiguousEnforcedValue { column: String, candidates: usize },

    // ── Optimizer errors: logged, never escalated ───────────────────────
    /// A constraint node cannot be inlined into a CASE expression.
    #[error("{0} is not supported in CASE-WHEN conversion")]
    UnsupportedInCaseWhen(String),

    /// CASE-WHEN conversion was declined for a relation.
    #[error("CASE-WHEN conversion skipped: {0}")]
    CaseWhenSkipped(String),

    // ── System errors ────────────────────────────────────────────────────
    /// The data source rejected a statement or could not be reached.
    #[error("data source error: {0}")]
    DataSource(String),

    /// A definition or configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A definition or configuration document could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    // ── Internal errors: should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<postgres::Error> for BinderyError {
    fn from(e: postgres::Error) -> Self {
        BinderyError::DataSource(e.to_string())
    }
}

impl From<toml::de::Error> for BinderyError {
    fn from(e: toml::de::Error) -> Self {
        BinderyError::Parse(e.to_string())
    }
}

/// Classification of errors for callers and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderyErrorKind {
    Configuration,
    Lookup,
    Security,
    Optimizer,
    System,
    Internal,
}

impl fmt::Display for BinderyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinderyErrorKind::Configuration => write!(f, "CONFIGURATION"),
            BinderyErrorKind::Lookup => write!(f, "LOOKUP"),
            BinderyErrorKind::Security => write!(f, "SECURITY"),
            BinderyErrorKind::Optimizer => write!(f, "OPTIMIZER"),
            BinderyErrorKind::System => write!(f, "SYSTEM"),
            BinderyErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl BinderyError {
    /// Classify the error.
    pub fn kind(&self) -> BinderyErrorKind {
        match self {
            BinderyError::DuplicateBindingSet(_)
            | BinderyError::MissingRelationTarget { .. }
            | BinderyError::DuplicateElement { .. }
            | BinderyError::UnknownCallback(_)
            | BinderyError::AmbiguousConstraint { .. }
            | BinderyError::InvalidDefinition(_)
            | BinderyError::JoinCycle { .. }
            | BinderyError::MissingBindingItem { .. } => BinderyErrorKind::Configuration,

            BinderyError::BindingSetNotFound(_) | BinderyError::BindingItemNotFound { .. } => {
                BinderyErrorKind::Lookup
            }

            BinderyError::SecurityViolation { .. } | BinderyError::AmbiguousEnforcedValue { .. } => {
                BinderyErrorKind::Security
            }

            BinderyError::UnsupportedInCaseWhen(_) | BinderyError::CaseWhenSkipped(_) => {
                BinderyErrorKind::Optimizer
            }

            BinderyError::DataSource(_) | BinderyError::Io(_) | BinderyError::Parse(_) => {
                BinderyErrorKind::System
            }

            BinderyError::InternalError(_) => BinderyErrorKind::Internal,
        }
    }

    /// Whether this error must abort the surrounding write transaction.
    pub fn aborts_write(&self) -> bool {
        self.kind() == BinderyErrorKind::Security
    }

    /// Whether this error indicates a bad binding definition.
    pub fn is_configuration(&self) -> bool {
        self.kind() == BinderyErrorKind::Configuration
    }
}
