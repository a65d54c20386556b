// ABOUTME: Typed description of every statement the replicator issues
// ABOUTME: Renders queries to MySQL text with quoted identifiers and positional values

use crate::model::{IndexDescriptor, Row, TableRef, Value};
use crate::utils::{quote_mysql_ident, validate_mysql_identifier};
use anyhow::{bail, Context, Result};

/// A statement the engine wants executed, independent of how it is sent.
///
/// Identifiers are validated and quoted when rendered; every value travels as
/// a positional parameter. Only [`Query::Custom`] and its paging/counting
/// variants carry caller-supplied SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Ping,
    /// Stored spelling of a table, matched case-insensitively.
    LookupTable { table: TableRef },
    /// `COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, IS_NULLABLE, COLUMN_KEY`
    /// in ordinal order.
    Columns { table: TableRef },
    /// `INDEX_NAME, COLUMN_NAME, NON_UNIQUE, SEQ_IN_INDEX` ordered by index then position.
    IndexColumns { table: TableRef },
    ShowCreateTable { table: TableRef },
    ServerVariable { name: String },
    CountRows { table: TableRef },
    Select {
        table: TableRef,
        order_by: Vec<String>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    /// Source rows whose key has no match in the target (anti-join).
    MissingRows {
        source: TableRef,
        target: TableRef,
        primary_key: Vec<String>,
        limit: u64,
    },
    CountMissingRows {
        source: TableRef,
        target: TableRef,
        primary_key: Vec<String>,
    },
    /// Keyset page: rows whose key tuple sorts after `after`.
    RowsAfterKey {
        table: TableRef,
        primary_key: Vec<String>,
        after: Option<Vec<Value>>,
        limit: u64,
    },
    /// Which of `keys` already exist; returns one `key_position` row (index
    /// into `keys`) per match, compared under the target columns' collation.
    ExistingKeys {
        table: TableRef,
        primary_key: Vec<String>,
        keys: Vec<Vec<Value>>,
    },
    /// Full-row match with NULL-safe equality on every column.
    RowExists {
        table: TableRef,
        columns: Vec<String>,
        values: Row,
    },
    Insert {
        table: TableRef,
        columns: Vec<String>,
        rows: Vec<Row>,
    },
    CreateTable { ddl: String },
    AddIndex {
        table: TableRef,
        index: IndexDescriptor,
    },
    Custom { sql: String },
    CustomPage { sql: String, limit: u64, offset: u64 },
    CountCustom { sql: String },
}

/// Rendered statement ready for a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    fn bare(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

impl Query {
    /// Short label for logs and error context.
    pub fn label(&self) -> &'static str {
        match self {
            Query::Ping => "ping",
            Query::LookupTable { .. } => "table lookup",
            Query::Columns { .. } => "column metadata",
            Query::IndexColumns { .. } => "index metadata",
            Query::ShowCreateTable { .. } => "SHOW CREATE TABLE",
            Query::ServerVariable { .. } => "server variable",
            Query::CountRows { .. } => "row count",
            Query::Select { .. } => "select",
            Query::MissingRows { .. } => "missing-row query",
            Query::CountMissingRows { .. } => "missing-row count",
            Query::RowsAfterKey { .. } => "keyset page",
            Query::ExistingKeys { .. } => "key probe",
            Query::RowExists { .. } => "row existence check",
            Query::Insert { .. } => "insert",
            Query::CreateTable { .. } => "CREATE TABLE",
            Query::AddIndex { .. } => "ALTER TABLE ADD INDEX",
            Query::Custom { .. } => "custom query",
            Query::CustomPage { .. } => "custom query page",
            Query::CountCustom { .. } => "custom query count",
        }
    }

    /// Render to MySQL text plus positional parameters.
    pub fn render(&self) -> Result<Statement> {
        let statement = match self {
            Query::Ping => Statement::bare("SELECT 1"),
            Query::LookupTable { table } => catalog_lookup(
                "SELECT TABLE_NAME FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND UPPER(TABLE_NAME) = UPPER(?)",
                table,
            ),
            Query::Columns { table } => catalog_lookup(
                "SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, IS_NULLABLE, COLUMN_KEY \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                table,
            ),
            Query::IndexColumns { table } => catalog_lookup(
                "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE, SEQ_IN_INDEX \
                 FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? \
                 ORDER BY INDEX_NAME, SEQ_IN_INDEX",
                table,
            ),
            Query::ShowCreateTable { table } => {
                Statement::bare(format!("SHOW CREATE TABLE {}", quote_table(table)?))
            }
            Query::ServerVariable { name } => {
                validate_mysql_identifier(name).context("Invalid server variable name")?;
                Statement::bare(format!("SELECT @@{} AS value", name))
            }
            Query::CountRows { table } => Statement::bare(format!(
                "SELECT COUNT(*) AS total FROM {}",
                quote_table(table)?
            )),
            Query::Select {
                table,
                order_by,
                limit,
                offset,
            } => {
                let mut sql = format!("SELECT * FROM {}", quote_table(table)?);
                if !order_by.is_empty() {
                    sql.push_str(&format!(" ORDER BY {}", column_list(order_by)?));
                }
                push_paging(&mut sql, *limit, *offset);
                Statement::bare(sql)
            }
            Query::MissingRows {
                source,
                target,
                primary_key,
                limit,
            } => {
                let mut sql = format!(
                    "SELECT s.* FROM {} AS s {} ORDER BY {}",
                    quote_table(source)?,
                    anti_join(target, primary_key)?,
                    prefixed_list("s", primary_key)?
                );
                push_paging(&mut sql, Some(*limit), None);
                Statement::bare(sql)
            }
            Query::CountMissingRows {
                source,
                target,
                primary_key,
            } => Statement::bare(format!(
                "SELECT COUNT(*) AS total FROM {} AS s {}",
                quote_table(source)?,
                anti_join(target, primary_key)?
            )),
            Query::RowsAfterKey {
                table,
                primary_key,
                after,
                limit,
            } => {
                let mut sql = format!("SELECT * FROM {}", quote_table(table)?);
                let mut params = Vec::new();
                if let Some(after) = after {
                    if after.len() != primary_key.len() {
                        bail!(
                            "Keyset cursor has {} values but the key has {} columns",
                            after.len(),
                            primary_key.len()
                        );
                    }
                    sql.push_str(&format!(
                        " WHERE ({}) > ({})",
                        column_list(primary_key)?,
                        placeholders(after.len())
                    ));
                    params.extend(after.iter().cloned());
                }
                sql.push_str(&format!(" ORDER BY {}", column_list(primary_key)?));
                push_paging(&mut sql, Some(*limit), None);
                Statement { sql, params }
            }
            Query::ExistingKeys {
                table,
                primary_key,
                keys,
            } => {
                if keys.is_empty() {
                    bail!("Key probe needs at least one key");
                }
                let cols = column_list(primary_key)?;
                let table = quote_table(table)?;
                let tuple = placeholders(primary_key.len());
                let mut params = Vec::with_capacity(keys.len() * primary_key.len());
                let mut branches = Vec::with_capacity(keys.len());
                for (position, key) in keys.iter().enumerate() {
                    if key.len() != primary_key.len() {
                        bail!(
                            "Lookup key has {} values but the key has {} columns",
                            key.len(),
                            primary_key.len()
                        );
                    }
                    params.extend(key.iter().cloned());
                    branches.push(if position == 0 {
                        format!(
                            "SELECT {} AS `key_position` FROM {} WHERE ({}) = ({})",
                            position, table, cols, tuple
                        )
                    } else {
                        format!(
                            "SELECT {} FROM {} WHERE ({}) = ({})",
                            position, table, cols, tuple
                        )
                    });
                }
                Statement {
                    sql: branches.join(" UNION ALL "),
                    params,
                }
            }
            Query::RowExists {
                table,
                columns,
                values,
            } => {
                if columns.is_empty() || columns.len() != values.len() {
                    bail!(
                        "Existence check needs one value per column ({} columns, {} values)",
                        columns.len(),
                        values.len()
                    );
                }
                let predicates = columns
                    .iter()
                    .map(|c| quoted_column(c).map(|c| format!("{} <=> ?", c)))
                    .collect::<Result<Vec<_>>>()?;
                Statement {
                    sql: format!(
                        "SELECT 1 FROM {} WHERE {} LIMIT 1",
                        quote_table(table)?,
                        predicates.join(" AND ")
                    ),
                    params: values.clone(),
                }
            }
            Query::Insert {
                table,
                columns,
                rows,
            } => {
                if columns.is_empty() || rows.is_empty() {
                    bail!("Insert needs at least one column and one row");
                }
                let tuple = format!("({})", placeholders(columns.len()));
                let mut params = Vec::with_capacity(rows.len() * columns.len());
                for (i, row) in rows.iter().enumerate() {
                    if row.len() != columns.len() {
                        bail!(
                            "Row {} has {} values but {} columns were named",
                            i + 1,
                            row.len(),
                            columns.len()
                        );
                    }
                    params.extend(row.iter().cloned());
                }
                Statement {
                    sql: format!(
                        "INSERT INTO {} ({}) VALUES {}",
                        quote_table(table)?,
                        column_list(columns)?,
                        vec![tuple; rows.len()].join(", ")
                    ),
                    params,
                }
            }
            Query::CreateTable { ddl } => Statement::bare(ddl.clone()),
            Query::AddIndex { table, index } => {
                validate_mysql_identifier(&index.name)
                    .with_context(|| format!("Invalid index name on {}", table))?;
                Statement::bare(format!(
                    "ALTER TABLE {} ADD {}INDEX {} ({})",
                    quote_table(table)?,
                    if index.unique { "UNIQUE " } else { "" },
                    quote_mysql_ident(&index.name),
                    column_list(&index.columns)?
                ))
            }
            Query::Custom { sql } => Statement::bare(sql.clone()),
            Query::CustomPage { sql, limit, offset } => {
                let mut sql = sql.clone();
                push_paging(&mut sql, Some(*limit), Some(*offset));
                Statement::bare(sql)
            }
            Query::CountCustom { sql } => Statement::bare(format!(
                "SELECT COUNT(*) AS total FROM ({}) AS estimate_source",
                sql
            )),
        };
        Ok(statement)
    }
}

/// Quote `schema.table` or `table` after validating every part.
pub fn quote_table(table: &TableRef) -> Result<String> {
    table.validate()?;
    Ok(match &table.schema {
        Some(schema) => format!(
            "{}.{}",
            quote_mysql_ident(schema),
            quote_mysql_ident(&table.name)
        ),
        None => quote_mysql_ident(&table.name),
    })
}

fn quoted_column(column: &str) -> Result<String> {
    validate_mysql_identifier(column)
        .with_context(|| format!("Invalid column name '{}'", crate::utils::sanitize_identifier(column)))?;
    Ok(quote_mysql_ident(column))
}

fn column_list(columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        bail!("Column list cannot be empty");
    }
    Ok(columns
        .iter()
        .map(|c| quoted_column(c))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

fn prefixed_list(alias: &str, columns: &[String]) -> Result<String> {
    Ok(columns
        .iter()
        .map(|c| quoted_column(c).map(|c| format!("{}.{}", alias, c)))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

fn anti_join(target: &TableRef, primary_key: &[String]) -> Result<String> {
    let first = primary_key
        .first()
        .ok_or_else(|| anyhow::anyhow!("Missing-row query needs a primary key"))?;
    let on = primary_key
        .iter()
        .map(|c| quoted_column(c).map(|c| format!("s.{c} = t.{c}")))
        .collect::<Result<Vec<_>>>()?
        .join(" AND ");
    Ok(format!(
        "LEFT JOIN {} AS t ON {} WHERE t.{} IS NULL",
        quote_table(target)?,
        on,
        quoted_column(first)?
    ))
}

fn catalog_lookup(sql: &str, table: &TableRef) -> Statement {
    Statement {
        sql: sql.to_string(),
        params: vec![
            Value::from(table.schema.clone()),
            Value::text(table.name.clone()),
        ],
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn push_paging(sql: &mut String, limit: Option<u64>, offset: Option<u64>) {
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }
}
