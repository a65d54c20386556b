// ABOUTME: Core data model shared by every replication component
// ABOUTME: Table references, column/index descriptors, canonical types, and row values

use crate::utils::{sanitize_identifier, validate_mysql_identifier};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Canonical datetime rendering used for logs, CSV files and restore input.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Text columns wider than this many characters become `LONGTEXT`.
pub const MAX_VARCHAR_CHARS: u32 = 16383;

/// Width used when a text column reports no usable length.
pub const DEFAULT_VARCHAR_CHARS: u32 = 255;

/// A table name, optionally qualified with the database it lives in.
///
/// Unqualified references resolve against the connection's default database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Unqualified reference. The name is validated when the reference is
    /// rendered into a statement.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Parse `table` or `database.table`, validating both parts.
    ///
    /// # Examples
    ///
    /// ```
    /// # use table_replicator::model::TableRef;
    /// let table = TableRef::parse("wms.BAS_SKU").unwrap();
    /// assert_eq!(table.schema.as_deref(), Some("wms"));
    /// assert_eq!(table.name, "BAS_SKU");
    /// assert!(TableRef::parse("wms.BAS SKU").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let table = match input.split_once('.') {
            Some((schema, name)) => Self::qualified(schema, name),
            None => Self::new(input),
        };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(schema) = &self.schema {
            validate_mysql_identifier(schema).with_context(|| {
                format!("Invalid database name in '{}'", sanitize_identifier(&self.to_string()))
            })?;
        }
        validate_mysql_identifier(&self.name)
            .with_context(|| format!("Invalid table name '{}'", sanitize_identifier(&self.name)))
    }

    /// Same reference with the table name swapped for the stored spelling.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            schema: self.schema.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Numeric types that keep their declared name when materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Decimal,
    Float,
    Double,
}

/// The small set of column types the replicator knows how to recreate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalType {
    Text { length: u32 },
    Integer,
    Numeric(NumericKind),
    Date,
    DateTime,
    Time,
    Json,
}

impl CanonicalType {
    /// Map a native MySQL type name (lowercase or not) plus its declared
    /// character length onto a canonical type.
    ///
    /// Anything unrecognised becomes `VARCHAR(255)`.
    pub fn from_native(type_name: &str, length: Option<u32>) -> Self {
        let text_length = match length {
            Some(n) if n > 0 => n,
            _ => DEFAULT_VARCHAR_CHARS,
        };
        match type_name.trim().to_ascii_lowercase().as_str() {
            "varchar" | "char" | "text" | "tinytext" | "mediumtext" | "longtext" => {
                CanonicalType::Text {
                    length: text_length,
                }
            }
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" => {
                CanonicalType::Integer
            }
            "decimal" | "numeric" => CanonicalType::Numeric(NumericKind::Decimal),
            "float" => CanonicalType::Numeric(NumericKind::Float),
            "double" | "real" => CanonicalType::Numeric(NumericKind::Double),
            "date" => CanonicalType::Date,
            "datetime" | "timestamp" => CanonicalType::DateTime,
            "time" => CanonicalType::Time,
            "json" => CanonicalType::Json,
            _ => CanonicalType::Text {
                length: DEFAULT_VARCHAR_CHARS,
            },
        }
    }

    /// Column type as written in a generated `CREATE TABLE`.
    pub fn ddl(&self) -> String {
        match self {
            CanonicalType::Text { length } if *length > MAX_VARCHAR_CHARS => "LONGTEXT".to_string(),
            CanonicalType::Text { length } => format!("VARCHAR({})", length),
            CanonicalType::Integer => "INT".to_string(),
            CanonicalType::Numeric(NumericKind::Decimal) => "DECIMAL".to_string(),
            CanonicalType::Numeric(NumericKind::Float) => "FLOAT".to_string(),
            CanonicalType::Numeric(NumericKind::Double) => "DOUBLE".to_string(),
            CanonicalType::Date => "DATE".to_string(),
            CanonicalType::DateTime => "DATETIME".to_string(),
            CanonicalType::Time => "TIME".to_string(),
            CanonicalType::Json => "JSON".to_string(),
        }
    }

    /// True for columns whose CSV values are normalized on restore.
    pub fn is_temporal_date(&self) -> bool {
        matches!(self, CanonicalType::Date | CanonicalType::DateTime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Native type name as reported by the catalog, lowercased.
    pub data_type: String,
    pub canonical: CanonicalType,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDescriptor {
    pub fn is_primary(&self) -> bool {
        self.name.eq_ignore_ascii_case("PRIMARY")
    }
}

/// Everything the engine needs to know about one table, read fresh per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    /// Stored spelling of the table name.
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexDescriptor>,
}

impl TableDescription {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }
}

/// Signed time-of-day or interval, as MySQL `TIME` allows values beyond 24h.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeValue {
    pub negative: bool,
    pub days: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.days * 24 + u32::from(self.hours);
        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "{:02}:{:02}:{:02}", hours, self.minutes, self.seconds)?;
        if self.micros > 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

/// A single scalar cell.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(TimeValue),
}

/// One row; positions match the column list fixed for the operation.
pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// Render as a CSV field. `None` means SQL NULL.
    pub fn to_field(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(v.to_string()),
            Value::UInt(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
            Value::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
            Value::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            Value::DateTime(v) => Some(v.format(DATETIME_FORMAT).to_string()),
            Value::Time(v) => Some(v.to_string()),
        }
    }

    /// Approximate encoded size, used for backup estimates.
    pub fn display_len(&self) -> usize {
        self.to_field().map(|s| s.len()).unwrap_or(4)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                u64::try_from(*a).map(|a| a == *b).unwrap_or(false)
            }
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            // Int and UInt compare equal across variants, so they share a hash.
            Value::Int(v) => match u64::try_from(*v) {
                Ok(u) => {
                    1u8.hash(state);
                    u.hash(state);
                }
                Err(_) => {
                    2u8.hash(state);
                    v.hash(state);
                }
            },
            Value::UInt(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Value::Float(v) => {
                3u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Double(v) => {
                4u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Text(v) => {
                5u8.hash(state);
                v.hash(state);
            }
            Value::Bytes(v) => {
                6u8.hash(state);
                v.hash(state);
            }
            Value::Date(v) => {
                7u8.hash(state);
                v.hash(state);
            }
            Value::DateTime(v) => {
                8u8.hash(state);
                v.hash(state);
            }
            Value::Time(v) => {
                9u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
