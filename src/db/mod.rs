// ABOUTME: Relational capability used by every replication component
// ABOUTME: Defines the Relational trait, result sets, and the MySQL implementation

pub mod context;
pub mod mysql;
pub mod query;

pub use context::DatabaseContext;
pub use mysql::MysqlConnection;
pub use query::{Query, Statement};

use crate::error::Side;
use crate::model::{Row, Value};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Result-set column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    /// Native type name, lowercase (`varchar`, `int`, `datetime`, ...).
    pub type_name: String,
    /// Declared length in characters, when the server reports one.
    pub length: Option<u32>,
    /// `Some(true)` when the column is declared NOT NULL.
    pub not_null: Option<bool>,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            length: None,
            not_null: None,
        }
    }
}

/// Rows plus the field metadata that describes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub fields: Vec<FieldMeta>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// First cell of the first row, if any.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// First cell of the first row as an unsigned count.
    pub fn count(&self) -> Result<u64> {
        let value = self
            .scalar()
            .context("Count query returned no rows")?;
        value_as_u64(value).with_context(|| format!("Count query returned {:?}", value))
    }
}

/// Interpret an integer-like cell as `u64`.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Int(v) => u64::try_from(*v).ok(),
        Value::UInt(v) => Some(*v),
        Value::Text(v) => v.trim().parse().ok(),
        Value::Bytes(v) => std::str::from_utf8(v).ok()?.trim().parse().ok(),
        _ => None,
    }
}

/// Interpret a cell as text, for catalog columns.
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => other.to_field(),
    }
}

/// One open connection to a relational database.
///
/// Implemented for MySQL by [`MysqlConnection`]; the integration tests drive the
/// engine through an in-memory implementation of the same trait.
#[async_trait]
pub trait Relational: Send {
    /// Which side of the pair this connection talks to.
    fn side(&self) -> Side;

    /// Default database of the connection.
    fn database(&self) -> &str;

    /// Run a statement that returns rows.
    async fn query(&mut self, query: &Query) -> Result<ResultSet>;

    /// Run a statement that returns no rows; yields the affected row count.
    async fn execute(&mut self, query: &Query) -> Result<u64>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
