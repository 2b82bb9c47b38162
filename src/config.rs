//! Engine configuration.
//!
//! Settings are read from a TOML document. Every setting has a default, so an
//! empty document (or no document at all) yields a working configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::BinderyError;
use crate::types::JdbcType;

/// Runtime settings for loading and compiling binding sets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Probe the data source for column types not declared in a definition.
    pub probe_column_types: bool,

    /// Master switch for CASE-WHEN conversion of flagged relations.
    ///
    /// When false, flagged relations stay regular runtime joins.
    pub case_when_enabled: bool,

    /// Number of WHEN branches per CASE block before a nested CASE starts.
    ///
    /// Keeps generated expressions below the expression-depth limits of
    /// typical SQL engines.
    pub case_when_branch_limit: usize,

    /// Reference tables with more rows than this are not converted.
    /// `None` converts tables of any size.
    pub case_when_max_rows: Option<u64>,

    /// Type assumed for items whose type is neither declared nor probed.
    pub default_jdbc_type: JdbcType,

    /// Prefix for default imports whose definition omits one.
    pub default_import_prefix: String,

    /// Abort the whole load on a duplicate binding-set name instead of
    /// rejecting only the later definition.
    pub abort_on_duplicate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_column_types: true,
            case_when_enabled: true,
            case_when_branch_limit: 100,
            case_when_max_rows: None,
            default_jdbc_type: JdbcType::Varchar,
            default_import_prefix: String::new(),
            abort_on_duplicate: false,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration document.
    pub fn from_toml_str(doc: &str) -> Result<Self, BinderyError> {
        let config: EngineConfig = toml::from_str(doc)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, BinderyError> {
        let doc = std::fs::read_to_string(path)?;
        Self::from_toml_str(&doc)
    }

    fn validate(&self) -> Result<(), BinderyError> {
        if self.case_when_branch_limit == 0 {
            return Err(BinderyError::InvalidDefinition(
                "case_when_branch_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.probe_column_types);
        assert!(config.case_when_enabled);
        assert_eq!(config.case_when_branch_limit, 100);
        assert_eq!(config.case_when_max_rows, None);
        assert_eq!(config.default_jdbc_type, JdbcType::Varchar);
        assert!(!config.abort_on_duplicate);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.case_when_branch_limit, 100);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_toml_str(
            r#"
            probe_column_types = false
            case_when_branch_limit = 50
            case_when_max_rows = 1000
            default_jdbc_type = "INTEGER"
            default_import_prefix = "ref_"
            "#,
        )
        .unwrap();
        assert!(!config.probe_column_types);
        assert_eq!(config.case_when_branch_limit, 50);
        assert_eq!(config.case_when_max_rows, Some(1000));
        assert_eq!(config.default_jdbc_type, JdbcType::Integer);
        assert_eq!(config.default_import_prefix, "ref_");
    }

    #[test]
    fn test_zero_branch_limit_rejected() {
        let err = EngineConfig::from_toml_str("case_when_branch_limit = 0").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = EngineConfig::from_toml_str("no_such_setting = 1").unwrap_err();
        assert!(matches!(err, BinderyError::Parse(_)));
    }
}
