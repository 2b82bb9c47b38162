//! Cell values exchanged with data sources and the write pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or a string of whitespace only.
    pub fn is_null_or_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Double(_))
    }

    /// The value as plain text, as used for permission comparison.
    /// `None` for NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(b.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Double(d) => Some(d.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Timestamp(ts) => Some(ts.to_rfc3339()),
        }
    }

    /// Render the value as a SQL literal: numbers unquoted, strings single-quoted
    /// with embedded quotes doubled. Non-finite doubles have no numeric
    /// literal and render as a cast of PostgreSQL's special float input.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Boolean(true) => "TRUE".to_string(),
            Value::Boolean(false) => "FALSE".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Double(d) if d.is_nan() => "CAST('NaN' AS DOUBLE PRECISION)".to_string(),
            Value::Double(d) if d.is_infinite() => {
                let sign = if d.is_sign_negative() { "-" } else { "" };
                format!("CAST('{sign}Infinity' AS DOUBLE PRECISION)")
            }
            Value::Double(d) => d.to_string(),
            Value::Text(s) => quote_literal(s),
            Value::Timestamp(ts) => quote_literal(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Quote a SQL string literal.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn test_sql_literal_numeric_unquoted() {
        assert_eq!(Value::Integer(42).to_sql_literal(), "42");
        assert_eq!(Value::Double(1.5).to_sql_literal(), "1.5");
        assert_eq!(Value::from("EU").to_sql_literal(), "'EU'");
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
        assert_eq!(Value::Boolean(true).to_sql_literal(), "TRUE");
    }

    #[test]
    fn test_non_finite_doubles_cast() {
        assert_eq!(
            Value::Double(f64::NAN).to_sql_literal(),
            "CAST('NaN' AS DOUBLE PRECISION)"
        );
        assert_eq!(
            Value::Double(f64::INFINITY).to_sql_literal(),
            "CAST('Infinity' AS DOUBLE PRECISION)"
        );
        assert_eq!(
            Value::Double(f64::NEG_INFINITY).to_sql_literal(),
            "CAST('-Infinity' AS DOUBLE PRECISION)"
        );
    }

    #[test]
    fn test_null_or_empty() {
        assert!(Value::Null.is_null_or_empty());
        assert!(Value::from("  ").is_null_or_empty());
        assert!(!Value::from("x").is_null_or_empty());
        assert!(!Value::Integer(0).is_null_or_empty());
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
    }
}
