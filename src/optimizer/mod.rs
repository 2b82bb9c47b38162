//! Load-time rewrites of binding definitions.
//!
//! Rewrites run on definitions before they become binding sets and are
//! strictly best-effort: a rewrite that cannot be applied leaves the
//! definition untouched and only logs a warning.

pub mod case_when;

pub use case_when::{assemble_case, convert_flagged};
