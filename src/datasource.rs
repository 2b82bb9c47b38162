//! Data-source access.
//!
//! The engine needs very little from a database: column metadata of a
//! statement (type probing) and small result sets (CASE-WHEN probing).
//! Both go through the [`DataSource`] trait so bootstrap can run against
//! PostgreSQL ([`PgDataSource`]) or a scripted in-memory source
//! ([`StaticDataSource`]).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use postgres::types::Type;
use postgres::{Client, NoTls, SimpleQueryMessage};

use crate::error::BinderyError;
use crate::types::JdbcType;
use crate::value::Value;

/// Metadata of one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub jdbc_type: JdbcType,
    pub nullable: Option<bool>,
    pub size: Option<i32>,
    pub scale: Option<i32>,
    pub signed: Option<bool>,
}

impl ColumnMeta {
    pub fn new(name: &str, jdbc_type: JdbcType) -> Self {
        ColumnMeta {
            name: name.to_string(),
            jdbc_type,
            nullable: None,
            size: None,
            scale: None,
            signed: Some(jdbc_type.is_signed()),
        }
    }
}

/// Rows returned by a query together with their column metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// The single value of a one-row, one-column result.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|r| r.first())
    }
}

/// A connection to one database.
pub trait DataSource: Send + Sync {
    /// Column metadata of `sql` without fetching rows.
    fn describe(&self, sql: &str) -> Result<Vec<ColumnMeta>, BinderyError>;

    /// Execute `sql` and return all rows.
    fn query(&self, sql: &str) -> Result<QueryResult, BinderyError>;
}

/// Resolves data-source identifiers from binding definitions.
pub trait DataSourceProvider: Send + Sync {
    fn data_source(&self, id: &str) -> Result<Arc<dyn DataSource>, BinderyError>;
}

// ── PostgreSQL ──────────────────────────────────────────────────────────

/// A single, dedicated PostgreSQL connection.
///
/// Bootstrap probing is single-threaded, so one connection behind a mutex
/// is all that is needed.
pub struct PgDataSource {
    client: Mutex<Client>,
}

impl PgDataSource {
    /// Connect using a libpq-style connection string or URL.
    pub fn connect(url: &str) -> Result<Self, BinderyError> {
        let client = Client::connect(url, NoTls)?;
        Ok(PgDataSource {
            client: Mutex::new(client),
        })
    }

    fn with_client<T>(
        &self,
        f: impl FnOnce(&mut Client) -> Result<T, BinderyError>,
    ) -> Result<T, BinderyError> {
        let mut client = self
            .client
            .lock()
            .map_err(|_| BinderyError::InternalError("connection lock poisoned".into()))?;
        f(&mut client)
    }
}

impl DataSource for PgDataSource {
    fn describe(&self, sql: &str) -> Result<Vec<ColumnMeta>, BinderyError> {
        self.with_client(|client| {
            let stmt = client.prepare(sql)?;
            Ok(stmt
                .columns()
                .iter()
                .map(|c| ColumnMeta::new(c.name(), jdbc_type_of(c.type_())))
                .collect())
        })
    }

    fn query(&self, sql: &str) -> Result<QueryResult, BinderyError> {
        self.with_client(|client| {
            // Column types come from the prepared statement; values travel as
            // text so NUMERIC and friends need no extra driver features.
            let stmt = client.prepare(sql)?;
            let columns: Vec<ColumnMeta> = stmt
                .columns()
                .iter()
                .map(|c| ColumnMeta::new(c.name(), jdbc_type_of(c.type_())))
                .collect();

            let mut rows = Vec::new();
            for msg in client.simple_query(sql)? {
                if let SimpleQueryMessage::Row(row) = msg {
                    let values = columns
                        .iter()
                        .enumerate()
                        .map(|(i, meta)| value_from_text(row.get(i), meta.jdbc_type))
                        .collect();
                    rows.push(values);
                }
            }
            Ok(QueryResult { columns, rows })
        })
    }
}

/// Map a PostgreSQL type to its JDBC counterpart.
pub fn jdbc_type_of(ty: &Type) -> JdbcType {
    let table = [
        (Type::BOOL, JdbcType::Boolean),
        (Type::INT2, JdbcType::SmallInt),
        (Type::INT4, JdbcType::Integer),
        (Type::INT8, JdbcType::BigInt),
        (Type::FLOAT4, JdbcType::Real),
        (Type::FLOAT8, JdbcType::Double),
        (Type::NUMERIC, JdbcType::Numeric),
        (Type::BPCHAR, JdbcType::Char),
        (Type::CHAR, JdbcType::Char),
        (Type::VARCHAR, JdbcType::Varchar),
        (Type::TEXT, JdbcType::Varchar),
        (Type::NAME, JdbcType::Varchar),
        (Type::DATE, JdbcType::Date),
        (Type::TIME, JdbcType::Time),
        (Type::TIMESTAMP, JdbcType::Timestamp),
        (Type::TIMESTAMPTZ, JdbcType::TimestampWithTimezone),
        (Type::BYTEA, JdbcType::Binary),
    ];
    table
        .iter()
        .find(|(pg, _)| pg == ty)
        .map(|(_, jdbc)| *jdbc)
        .unwrap_or(JdbcType::Other)
}

/// Convert a text-protocol cell into a [`Value`] of the column's type.
///
/// Numbers that do not fit the numeric variants are kept as text.
pub fn value_from_text(text: Option<&str>, jdbc_type: JdbcType) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    match jdbc_type {
        JdbcType::Boolean | JdbcType::Bit => match text {
            "t" | "true" | "1" => Value::Boolean(true),
            "f" | "false" | "0" => Value::Boolean(false),
            _ => Value::Text(text.to_string()),
        },
        JdbcType::TinyInt | JdbcType::SmallInt | JdbcType::Integer | JdbcType::BigInt => text
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::Text(text.to_string())),
        t if t.is_numeric() => {
            if let Ok(i) = text.parse::<i64>() {
                Value::Integer(i)
            } else {
                text.parse::<f64>()
                    .map(Value::Double)
                    .unwrap_or_else(|_| Value::Text(text.to_string()))
            }
        }
        _ => Value::Text(text.to_string()),
    }
}

// ── Scripted in-memory source ───────────────────────────────────────────

/// An in-memory data source answering statements from a script.
///
/// Each rule pairs a SQL fragment with a response; the first rule whose
/// fragment occurs in the statement wins. Statements without a matching rule
/// fail. Every statement is recorded for later inspection.
#[derive(Default)]
pub struct StaticDataSource {
    rules: Vec<(String, Result<QueryResult, String>)>,
    executed: Mutex<Vec<String>>,
}

impl StaticDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements containing `fragment` with `result`.
    pub fn respond(mut self, fragment: &str, result: QueryResult) -> Self {
        self.rules.push((fragment.to_string(), Ok(result)));
        self
    }

    /// Fail statements containing `fragment` with `message`.
    pub fn fail(mut self, fragment: &str, message: &str) -> Self {
        self.rules
            .push((fragment.to_string(), Err(message.to_string())));
        self
    }

    /// All statements seen so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn answer(&self, sql: &str) -> Result<QueryResult, BinderyError> {
        if let Ok(mut log) = self.executed.lock() {
            log.push(sql.to_string());
        }
        match self.rules.iter().find(|(fragment, _)| sql.contains(fragment)) {
            Some((_, Ok(result))) => Ok(result.clone()),
            Some((_, Err(message))) => Err(BinderyError::DataSource(message.clone())),
            None => Err(BinderyError::DataSource(format!(
                "no scripted response for: {sql}"
            ))),
        }
    }
}

impl DataSource for StaticDataSource {
    fn describe(&self, sql: &str) -> Result<Vec<ColumnMeta>, BinderyError> {
        self.answer(sql).map(|r| r.columns)
    }

    fn query(&self, sql: &str) -> Result<QueryResult, BinderyError> {
        self.answer(sql)
    }
}

/// A provider over a fixed map of data sources.
#[derive(Default)]
pub struct StaticProvider {
    sources: HashMap<String, Arc<dyn DataSource>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, source: Arc<dyn DataSource>) -> Self {
        self.sources.insert(id.to_string(), source);
        self
    }
}

impl DataSourceProvider for StaticProvider {
    fn data_source(&self, id: &str) -> Result<Arc<dyn DataSource>, BinderyError> {
        self.sources
            .get(id)
            .cloned()
            .ok_or_else(|| BinderyError::DataSource(format!("unknown data source: {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jdbc_type_of_common_types() {
        assert_eq!(jdbc_type_of(&Type::INT4), JdbcType::Integer);
        assert_eq!(jdbc_type_of(&Type::TEXT), JdbcType::Varchar);
        assert_eq!(jdbc_type_of(&Type::NUMERIC), JdbcType::Numeric);
        assert_eq!(jdbc_type_of(&Type::TIMESTAMPTZ), JdbcType::TimestampWithTimezone);
        assert_eq!(jdbc_type_of(&Type::JSONB), JdbcType::Other);
    }

    #[test]
    fn test_value_from_text() {
        assert_eq!(value_from_text(None, JdbcType::Integer), Value::Null);
        assert_eq!(value_from_text(Some("42"), JdbcType::Integer), Value::Integer(42));
        assert_eq!(value_from_text(Some("1.25"), JdbcType::Numeric), Value::Double(1.25));
        assert_eq!(value_from_text(Some("7"), JdbcType::Numeric), Value::Integer(7));
        assert_eq!(value_from_text(Some("t"), JdbcType::Boolean), Value::Boolean(true));
        assert_eq!(
            value_from_text(Some("EU"), JdbcType::Varchar),
            Value::Text("EU".into())
        );
    }

    #[test]
    fn test_static_source_first_rule_wins() {
        let source = StaticDataSource::new()
            .respond(
                "COUNT(*)",
                QueryResult {
                    columns: vec![ColumnMeta::new("count", JdbcType::BigInt)],
                    rows: vec![vec![Value::Integer(3)]],
                },
            )
            .fail("FROM broken", "relation does not exist");

        let count = source.query("SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(count.scalar(), Some(&Value::Integer(3)));

        let err = source.query("SELECT x FROM broken").unwrap_err();
        assert!(matches!(err, BinderyError::DataSource(_)));

        assert!(source.query("SELECT 1").is_err());
        assert_eq!(source.executed().len(), 3);
    }

    #[test]
    fn test_static_provider_unknown_id() {
        let provider = StaticProvider::new().with("main", Arc::new(StaticDataSource::new()));
        assert!(provider.data_source("main").is_ok());
        assert!(provider.data_source("other").is_err());
    }
}
