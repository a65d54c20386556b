// ABOUTME: mysql_async implementation of the Relational trait
// ABOUTME: Converts between driver values and the crate's Value model

use super::{FieldMeta, Query, Relational, ResultSet};
use crate::error::Side;
use crate::model::{Row, TimeValue, Value};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, Params};

/// Charset id MySQL reports for binary strings.
const BINARY_CHARSET: u16 = 63;

/// A pooled MySQL connection bound to one side of the replication pair.
///
/// The connection returns to its pool when this value is dropped.
pub struct MysqlConnection {
    conn: Conn,
    side: Side,
    database: String,
}

impl MysqlConnection {
    pub fn new(conn: Conn, side: Side, database: impl Into<String>) -> Self {
        Self {
            conn,
            side,
            database: database.into(),
        }
    }
}

#[async_trait]
impl Relational for MysqlConnection {
    fn side(&self) -> Side {
        self.side
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn query(&mut self, query: &Query) -> Result<ResultSet> {
        let statement = query.render()?;
        tracing::debug!("[{}] {}: {}", self.side, query.label(), statement.sql);

        let params = to_params(&statement.params);
        let result = self
            .conn
            .exec_iter(statement.sql.as_str(), params)
            .await
            .with_context(|| format!("{} failed on {} database", query.label(), self.side))?;

        let columns = result.columns().map(|c| c.to_vec()).unwrap_or_default();
        let rows: Vec<mysql_async::Row> = result
            .collect_and_drop()
            .await
            .with_context(|| format!("Failed to read {} results", query.label()))?;

        let fields = columns.iter().map(field_meta).collect();
        let rows = rows
            .into_iter()
            .map(|row| convert_row(&columns, row))
            .collect();

        Ok(ResultSet { fields, rows })
    }

    async fn execute(&mut self, query: &Query) -> Result<u64> {
        let statement = query.render()?;
        tracing::debug!("[{}] {}: {}", self.side, query.label(), statement.sql);

        if statement.params.is_empty() {
            self.conn
                .query_drop(statement.sql.as_str())
                .await
                .with_context(|| format!("{} failed on {} database", query.label(), self.side))?;
        } else {
            self.conn
                .exec_drop(statement.sql.as_str(), to_params(&statement.params))
                .await
                .with_context(|| format!("{} failed on {} database", query.label(), self.side))?;
        }

        Ok(self.conn.affected_rows())
    }

    async fn begin(&mut self) -> Result<()> {
        self.conn
            .query_drop("START TRANSACTION")
            .await
            .with_context(|| format!("Failed to begin transaction on {} database", self.side))
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn
            .query_drop("COMMIT")
            .await
            .with_context(|| format!("Failed to commit transaction on {} database", self.side))
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn
            .query_drop("ROLLBACK")
            .await
            .with_context(|| format!("Failed to roll back transaction on {} database", self.side))
    }
}

fn to_params(values: &[Value]) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(to_mysql_value).collect())
    }
}

/// Convert a crate value into a driver value for parameter binding.
pub fn to_mysql_value(value: &Value) -> mysql_async::Value {
    use chrono::{Datelike, Timelike};
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Int(v) => mysql_async::Value::Int(*v),
        Value::UInt(v) => mysql_async::Value::UInt(*v),
        Value::Float(v) => mysql_async::Value::Float(*v),
        Value::Double(v) => mysql_async::Value::Double(*v),
        Value::Text(v) => mysql_async::Value::Bytes(v.as_bytes().to_vec()),
        Value::Bytes(v) => mysql_async::Value::Bytes(v.clone()),
        Value::Date(d) => mysql_async::Value::Date(
            d.year() as u16,
            d.month() as u8,
            d.day() as u8,
            0,
            0,
            0,
            0,
        ),
        Value::DateTime(dt) => mysql_async::Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
        Value::Time(t) => mysql_async::Value::Time(
            t.negative, t.days, t.hours, t.minutes, t.seconds, t.micros,
        ),
    }
}

fn convert_row(columns: &[Column], row: mysql_async::Row) -> Row {
    (0..row.len())
        .map(|i| {
            let raw = row.as_ref(i).cloned().unwrap_or(mysql_async::Value::NULL);
            from_mysql_value(columns.get(i), raw)
        })
        .collect()
}

/// Convert a driver value into a crate value, using column metadata to tell
/// text from binary and dates from datetimes.
pub fn from_mysql_value(column: Option<&Column>, raw: mysql_async::Value) -> Value {
    match raw {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Int(v) => Value::Int(v),
        mysql_async::Value::UInt(v) => Value::UInt(v),
        mysql_async::Value::Float(v) => Value::Float(v),
        mysql_async::Value::Double(v) => Value::Double(v),
        mysql_async::Value::Bytes(bytes) => {
            let binary = column
                .map(|c| c.character_set() == BINARY_CHARSET && !is_numeric(c.column_type()))
                .unwrap_or(false);
            if binary {
                Value::Bytes(bytes)
            } else {
                match String::from_utf8(bytes) {
                    Ok(text) => Value::Text(text),
                    Err(e) => Value::Bytes(e.into_bytes()),
                }
            }
        }
        mysql_async::Value::Date(year, month, day, hour, minute, second, micros) => {
            let date_only = column
                .map(|c| {
                    matches!(
                        c.column_type(),
                        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE
                    )
                })
                .unwrap_or(false);
            let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));
            match date {
                Some(date) if date_only => Value::Date(date),
                Some(date) => date
                    .and_hms_micro_opt(
                        u32::from(hour),
                        u32::from(minute),
                        u32::from(second),
                        micros,
                    )
                    .map(Value::DateTime)
                    .unwrap_or_else(|| {
                        Value::Text(format!(
                            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                            year, month, day, hour, minute, second
                        ))
                    }),
                // Zero dates such as 0000-00-00 have no chrono representation.
                None if date_only => Value::Text(format!("{:04}-{:02}-{:02}", year, month, day)),
                None => Value::Text(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                )),
            }
        }
        mysql_async::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            Value::Time(TimeValue {
                negative,
                days,
                hours,
                minutes,
                seconds,
                micros,
            })
        }
    }
}

fn is_numeric(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL
    )
}

fn field_meta(column: &Column) -> FieldMeta {
    let charset = column.character_set();
    let type_name = native_type_name(column.column_type(), charset);
    let length = match column.column_type() {
        ColumnType::MYSQL_TYPE_VAR_STRING
        | ColumnType::MYSQL_TYPE_VARCHAR
        | ColumnType::MYSQL_TYPE_STRING
        | ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB => {
            Some(column.column_length() / charset_max_bytes(charset))
        }
        _ => None,
    };
    FieldMeta {
        name: column.name_str().into_owned(),
        type_name: type_name.to_string(),
        length,
        not_null: Some(column.flags().contains(ColumnFlags::NOT_NULL_FLAG)),
    }
}

/// Lowercase type name for a wire column type.
pub fn native_type_name(column_type: ColumnType, charset: u16) -> &'static str {
    let binary = charset == BINARY_CHARSET;
    match column_type {
        ColumnType::MYSQL_TYPE_VAR_STRING | ColumnType::MYSQL_TYPE_VARCHAR if binary => "varbinary",
        ColumnType::MYSQL_TYPE_VAR_STRING | ColumnType::MYSQL_TYPE_VARCHAR => "varchar",
        ColumnType::MYSQL_TYPE_STRING if binary => "binary",
        ColumnType::MYSQL_TYPE_STRING => "char",
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
            if binary =>
        {
            "blob"
        }
        ColumnType::MYSQL_TYPE_TINY_BLOB => "tinytext",
        ColumnType::MYSQL_TYPE_BLOB => "text",
        ColumnType::MYSQL_TYPE_MEDIUM_BLOB => "mediumtext",
        ColumnType::MYSQL_TYPE_LONG_BLOB => "longtext",
        ColumnType::MYSQL_TYPE_TINY => "tinyint",
        ColumnType::MYSQL_TYPE_SHORT => "smallint",
        ColumnType::MYSQL_TYPE_INT24 => "mediumint",
        ColumnType::MYSQL_TYPE_LONG => "int",
        ColumnType::MYSQL_TYPE_LONGLONG => "bigint",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "decimal",
        ColumnType::MYSQL_TYPE_FLOAT => "float",
        ColumnType::MYSQL_TYPE_DOUBLE => "double",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "date",
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "datetime",
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "timestamp",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "time",
        ColumnType::MYSQL_TYPE_YEAR => "year",
        ColumnType::MYSQL_TYPE_JSON => "json",
        ColumnType::MYSQL_TYPE_ENUM => "enum",
        ColumnType::MYSQL_TYPE_SET => "set",
        ColumnType::MYSQL_TYPE_BIT => "bit",
        _ => "other",
    }
}

/// Bytes per character for the collation ids the server commonly reports.
pub fn charset_max_bytes(charset: u16) -> u32 {
    match charset {
        45 | 46 | 224..=247 | 255..=323 => 4,
        33 | 83 | 192..=215 => 3,
        _ => 1,
    }
}
