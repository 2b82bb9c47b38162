//! JDBC-style column types.
//!
//! Binding items carry a [`JdbcType`] either declared in the definition or
//! learned by probing the data source. The numeric codes follow
//! `java.sql.Types` so definitions written for JDBC tooling keep their meaning.

use serde::{Deserialize, Serialize};

/// A column type, identified the way JDBC identifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JdbcType {
    Bit,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Float,
    Double,
    Numeric,
    Decimal,
    Char,
    #[default]
    Varchar,
    LongVarchar,
    Clob,
    Date,
    Time,
    Timestamp,
    TimestampWithTimezone,
    Binary,
    Blob,
    Other,
}

impl JdbcType {
    /// The `java.sql.Types` code.
    pub fn code(&self) -> i32 {
        match self {
            JdbcType::Bit => -7,
            JdbcType::Boolean => 16,
            JdbcType::TinyInt => -6,
            JdbcType::SmallInt => 5,
            JdbcType::Integer => 4,
            JdbcType::BigInt => -5,
            JdbcType::Real => 7,
            JdbcType::Float => 6,
            JdbcType::Double => 8,
            JdbcType::Numeric => 2,
            JdbcType::Decimal => 3,
            JdbcType::Char => 1,
            JdbcType::Varchar => 12,
            JdbcType::LongVarchar => -1,
            JdbcType::Clob => 2005,
            JdbcType::Date => 91,
            JdbcType::Time => 92,
            JdbcType::Timestamp => 93,
            JdbcType::TimestampWithTimezone => 2014,
            JdbcType::Binary => -2,
            JdbcType::Blob => 2004,
            JdbcType::Other => 1111,
        }
    }

    /// The canonical upper-case type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JdbcType::Bit => "BIT",
            JdbcType::Boolean => "BOOLEAN",
            JdbcType::TinyInt => "TINYINT",
            JdbcType::SmallInt => "SMALLINT",
            JdbcType::Integer => "INTEGER",
            JdbcType::BigInt => "BIGINT",
            JdbcType::Real => "REAL",
            JdbcType::Float => "FLOAT",
            JdbcType::Double => "DOUBLE",
            JdbcType::Numeric => "NUMERIC",
            JdbcType::Decimal => "DECIMAL",
            JdbcType::Char => "CHAR",
            JdbcType::Varchar => "VARCHAR",
            JdbcType::LongVarchar => "LONGVARCHAR",
            JdbcType::Clob => "CLOB",
            JdbcType::Date => "DATE",
            JdbcType::Time => "TIME",
            JdbcType::Timestamp => "TIMESTAMP",
            JdbcType::TimestampWithTimezone => "TIMESTAMP_WITH_TIMEZONE",
            JdbcType::Binary => "BINARY",
            JdbcType::Blob => "BLOB",
            JdbcType::Other => "OTHER",
        }
    }

    /// Parse a type name as written in a definition. Case-insensitive;
    /// returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        let t = match name.trim().to_uppercase().as_str() {
            "BIT" => JdbcType::Bit,
            "BOOLEAN" | "BOOL" => JdbcType::Boolean,
            "TINYINT" => JdbcType::TinyInt,
            "SMALLINT" => JdbcType::SmallInt,
            "INTEGER" | "INT" => JdbcType::Integer,
            "BIGINT" => JdbcType::BigInt,
            "REAL" => JdbcType::Real,
            "FLOAT" => JdbcType::Float,
            "DOUBLE" => JdbcType::Double,
            "NUMERIC" => JdbcType::Numeric,
            "DECIMAL" => JdbcType::Decimal,
            "CHAR" => JdbcType::Char,
            "VARCHAR" => JdbcType::Varchar,
            "LONGVARCHAR" => JdbcType::LongVarchar,
            "CLOB" => JdbcType::Clob,
            "DATE" => JdbcType::Date,
            "TIME" => JdbcType::Time,
            "TIMESTAMP" => JdbcType::Timestamp,
            "TIMESTAMP_WITH_TIMEZONE" | "TIMESTAMPTZ" => JdbcType::TimestampWithTimezone,
            "BINARY" => JdbcType::Binary,
            "BLOB" => JdbcType::Blob,
            "OTHER" => JdbcType::Other,
            _ => return None,
        };
        Some(t)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            JdbcType::TinyInt
                | JdbcType::SmallInt
                | JdbcType::Integer
                | JdbcType::BigInt
                | JdbcType::Real
                | JdbcType::Float
                | JdbcType::Double
                | JdbcType::Numeric
                | JdbcType::Decimal
        )
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            JdbcType::Char | JdbcType::Varchar | JdbcType::LongVarchar | JdbcType::Clob
        )
    }

    /// Whether values of this type are signed. Only meaningful for numerics.
    pub fn is_signed(&self) -> bool {
        self.is_numeric()
    }
}

impl std::fmt::Display for JdbcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_case_insensitive() {
        assert_eq!(JdbcType::from_name("varchar"), Some(JdbcType::Varchar));
        assert_eq!(JdbcType::from_name(" Integer "), Some(JdbcType::Integer));
        assert_eq!(JdbcType::from_name("int"), Some(JdbcType::Integer));
        assert_eq!(JdbcType::from_name("geometry"), None);
    }

    #[test]
    fn test_codes_match_java_sql_types() {
        assert_eq!(JdbcType::Varchar.code(), 12);
        assert_eq!(JdbcType::Integer.code(), 4);
        assert_eq!(JdbcType::BigInt.code(), -5);
        assert_eq!(JdbcType::Timestamp.code(), 93);
    }

    #[test]
    fn test_name_roundtrip() {
        for t in [
            JdbcType::Bit,
            JdbcType::Integer,
            JdbcType::Decimal,
            JdbcType::Varchar,
            JdbcType::Date,
            JdbcType::TimestampWithTimezone,
            JdbcType::Other,
        ] {
            assert_eq!(JdbcType::from_name(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_classification() {
        assert!(JdbcType::Decimal.is_numeric());
        assert!(!JdbcType::Varchar.is_numeric());
        assert!(JdbcType::Char.is_textual());
        assert!(!JdbcType::Date.is_textual());
    }

    #[test]
    fn test_default_is_varchar() {
        assert_eq!(JdbcType::default(), JdbcType::Varchar);
    }
}
