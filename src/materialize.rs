// ABOUTME: Materializes the result of an arbitrary SELECT into a target table
// ABOUTME: Infers a CREATE TABLE from result metadata when the target does not exist

use crate::batch::BatchWriter;
use crate::db::query::quote_table;
use crate::db::{FieldMeta, Query, Relational};
use crate::error::ReplicatorError;
use crate::introspect;
use crate::model::{CanonicalType, TableRef};
use crate::utils::{quote_mysql_ident, validate_mysql_identifier};
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub table: String,
    pub copied_rows: u64,
    pub created_table: bool,
    pub batches: usize,
}

/// Check that `sql` is a read query and return it without a trailing `;`.
///
/// Only text that lexically starts with the keyword `SELECT` is accepted.
///
/// # Examples
///
/// ```
/// # use table_replicator::materialize::validate_select;
/// assert_eq!(validate_select("  select id from t; ").unwrap(), "select id from t");
/// assert!(validate_select("DELETE FROM t").is_err());
/// assert!(validate_select("selection").is_err());
/// ```
pub fn validate_select(sql: &str) -> Result<String> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let keyword = trimmed.get(..6).unwrap_or("");
    let boundary = trimmed[keyword.len()..]
        .chars()
        .next()
        .map(|c| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(false);
    if !keyword.eq_ignore_ascii_case("select") || !boundary {
        return Err(ReplicatorError::validation("Query must start with SELECT").into());
    }
    Ok(trimmed.to_string())
}

/// Column definition for one result field.
///
/// # Examples
///
/// ```
/// # use table_replicator::db::FieldMeta;
/// # use table_replicator::materialize::column_definition;
/// let mut field = FieldMeta::new("name", "varchar");
/// field.length = Some(50);
/// field.not_null = Some(true);
/// assert_eq!(column_definition(&field).unwrap(), "`name` VARCHAR(50) NOT NULL");
/// ```
pub fn column_definition(field: &FieldMeta) -> Result<String> {
    validate_mysql_identifier(&field.name).with_context(|| {
        format!(
            "Result column '{}' cannot be used as a column name; alias it in the query",
            crate::utils::sanitize_identifier(&field.name)
        )
    })?;
    let canonical = CanonicalType::from_native(&field.type_name, field.length);
    let nullability = if field.not_null == Some(true) {
        "NOT NULL"
    } else {
        "NULL"
    };
    Ok(format!(
        "{} {} {}",
        quote_mysql_ident(&field.name),
        canonical.ddl(),
        nullability
    ))
}

/// `CREATE TABLE` text for a result set's fields.
pub fn create_table_from_fields(table: &TableRef, fields: &[FieldMeta]) -> Result<String> {
    if fields.is_empty() {
        return Err(ReplicatorError::validation("Query returned no columns").into());
    }
    let definitions = fields
        .iter()
        .map(column_definition)
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "CREATE TABLE {} (\n  {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        quote_table(table)?,
        definitions.join(",\n  ")
    ))
}

/// Run `select_sql` on the source and insert its rows into `target_name`.
///
/// The target table is created from the result metadata when missing. An
/// empty result copies nothing and creates nothing.
pub async fn materialize(
    source: &mut dyn Relational,
    target: &mut dyn Relational,
    select_sql: &str,
    target_name: &TableRef,
    chunk_rows: usize,
) -> Result<MaterializeReport> {
    let sql = validate_select(select_sql)?;
    target_name.validate()?;

    let result = source
        .query(&Query::Custom { sql })
        .await
        .context("Custom query failed on source")?;

    if result.is_empty() {
        tracing::info!("Query returned no rows; nothing to copy into {}", target_name);
        return Ok(MaterializeReport {
            table: target_name.name.clone(),
            copied_rows: 0,
            created_table: false,
            batches: 0,
        });
    }
    tracing::info!(
        "Query returned {} rows with {} columns",
        result.rows.len(),
        result.fields.len()
    );

    let (table, created_table) = match introspect::resolve_table(target, target_name)
        .await?
        .stored()
    {
        Some(stored) => (stored.clone(), false),
        None => {
            let ddl = create_table_from_fields(target_name, &result.fields)?;
            target
                .execute(&Query::CreateTable { ddl })
                .await
                .with_context(|| format!("Failed to create table {}", target_name))?;
            let stored = introspect::require_table(target, target_name).await?;
            tracing::info!("Created table {} from query result", stored);
            (stored, true)
        }
    };

    let columns = result.column_names();
    let mut writer = BatchWriter::new(target, table.clone(), columns, chunk_rows);
    let copied = writer.write_all(result.rows).await?;

    tracing::info!("Inserted {} rows into {}", copied, table);
    Ok(MaterializeReport {
        table: table.name,
        copied_rows: copied,
        created_table,
        batches: writer.chunks_written(),
    })
}
