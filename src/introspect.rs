// ABOUTME: Schema introspection against information_schema
// ABOUTME: Resolves table names case-insensitively and describes columns, keys, and indexes

use crate::db::{value_as_string, value_as_u64, Query, Relational};
use crate::error::ReplicatorError;
use crate::model::{CanonicalType, ColumnDescriptor, IndexDescriptor, TableDescription, TableRef};
use anyhow::{Context, Result};

/// Outcome of looking a table up by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLookup {
    /// Stored with exactly the requested spelling.
    Exact(TableRef),
    /// Stored, but with different letter case.
    CaseMismatch { requested: String, stored: TableRef },
    Missing,
}

impl TableLookup {
    pub fn stored(&self) -> Option<&TableRef> {
        match self {
            TableLookup::Exact(table) => Some(table),
            TableLookup::CaseMismatch { stored, .. } => Some(stored),
            TableLookup::Missing => None,
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, TableLookup::Missing)
    }
}

/// Look a table up case-insensitively and report how it is stored.
pub async fn resolve_table(db: &mut dyn Relational, table: &TableRef) -> Result<TableLookup> {
    table.validate()?;
    let result = db
        .query(&Query::LookupTable {
            table: table.clone(),
        })
        .await
        .with_context(|| format!("Failed to look up table {} in {} database", table, db.side()))?;

    let names: Vec<String> = result
        .rows
        .iter()
        .filter_map(|row| row.first().and_then(value_as_string))
        .collect();

    if names.iter().any(|n| n == &table.name) {
        return Ok(TableLookup::Exact(table.clone()));
    }
    match names.into_iter().next() {
        Some(stored) => {
            tracing::info!(
                "Table {} found in {} database as {} (case differs)",
                table,
                db.side(),
                stored
            );
            Ok(TableLookup::CaseMismatch {
                requested: table.name.clone(),
                stored: table.with_name(stored),
            })
        }
        None => Ok(TableLookup::Missing),
    }
}

/// Resolve a table that must exist, failing with a schema error otherwise.
pub async fn require_table(db: &mut dyn Relational, table: &TableRef) -> Result<TableRef> {
    match resolve_table(db, table).await? {
        TableLookup::Exact(stored) | TableLookup::CaseMismatch { stored, .. } => Ok(stored),
        TableLookup::Missing => {
            Err(ReplicatorError::table_not_found(db.side(), &table.to_string()).into())
        }
    }
}

/// Read columns, primary key and indexes of an existing table.
///
/// The table is resolved first, so the returned description always carries
/// the stored spelling of the name.
pub async fn describe_table(db: &mut dyn Relational, table: &TableRef) -> Result<TableDescription> {
    let stored = require_table(db, table).await?;

    let result = db
        .query(&Query::Columns {
            table: stored.clone(),
        })
        .await
        .with_context(|| format!("Failed to read columns of {}", stored))?;

    let mut columns = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let cell = |i: usize| row.get(i).and_then(value_as_string);
        let name = cell(0).context("Column metadata row without COLUMN_NAME")?;
        let data_type = cell(1).unwrap_or_default().to_ascii_lowercase();
        let length = row
            .get(2)
            .and_then(value_as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX));
        let nullable = cell(3)
            .map(|v| v.eq_ignore_ascii_case("YES"))
            .unwrap_or(true);
        let primary_key = cell(4)
            .map(|v| v.eq_ignore_ascii_case("PRI"))
            .unwrap_or(false);
        columns.push(ColumnDescriptor {
            canonical: CanonicalType::from_native(&data_type, length),
            name,
            data_type,
            nullable,
            primary_key,
        });
    }

    if columns.is_empty() {
        return Err(ReplicatorError::Schema(format!(
            "Table {} in {} database has no readable columns",
            stored,
            db.side()
        ))
        .into());
    }

    let primary_key: Vec<String> = columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.clone())
        .collect();

    let result = db
        .query(&Query::IndexColumns {
            table: stored.clone(),
        })
        .await
        .with_context(|| format!("Failed to read indexes of {}", stored))?;

    let entries: Vec<IndexColumnEntry> = result
        .rows
        .iter()
        .filter_map(|row| {
            Some(IndexColumnEntry {
                index: row.first().and_then(value_as_string)?,
                column: row.get(1).and_then(value_as_string)?,
                non_unique: row.get(2).and_then(value_as_u64).unwrap_or(1) != 0,
                seq: row.get(3).and_then(value_as_u64).unwrap_or(0),
            })
        })
        .collect();

    tracing::debug!(
        "Described {}: {} columns, key ({}), {} index rows",
        stored,
        columns.len(),
        primary_key.join(", "),
        entries.len()
    );

    Ok(TableDescription {
        table: stored.name,
        columns,
        primary_key,
        indexes: group_index_columns(entries),
    })
}

/// One row of `information_schema.STATISTICS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumnEntry {
    pub index: String,
    pub column: String,
    pub non_unique: bool,
    pub seq: u64,
}

/// Group per-column index rows into index descriptors.
///
/// Indexes keep the order in which they first appear; member columns are
/// ordered by their position in the index.
pub fn group_index_columns(entries: Vec<IndexColumnEntry>) -> Vec<IndexDescriptor> {
    let mut grouped: Vec<(IndexDescriptor, Vec<(u64, String)>)> = Vec::new();
    for entry in entries {
        let slot = match grouped.iter().position(|(idx, _)| idx.name == entry.index) {
            Some(pos) => pos,
            None => {
                grouped.push((
                    IndexDescriptor {
                        name: entry.index.clone(),
                        columns: Vec::new(),
                        unique: !entry.non_unique,
                    },
                    Vec::new(),
                ));
                grouped.len() - 1
            }
        };
        grouped[slot].1.push((entry.seq, entry.column));
    }

    grouped
        .into_iter()
        .map(|(mut index, mut members)| {
            members.sort_by_key(|(seq, _)| *seq);
            index.columns = members.into_iter().map(|(_, c)| c).collect();
            index
        })
        .collect()
}

pub async fn row_count(db: &mut dyn Relational, table: &TableRef) -> Result<u64> {
    db.query(&Query::CountRows {
        table: table.clone(),
    })
    .await
    .and_then(|r| r.count())
    .with_context(|| format!("Failed to count rows in {} ({} database)", table, db.side()))
}

/// The server's `CREATE TABLE` text for a table.
pub async fn show_create_table(db: &mut dyn Relational, table: &TableRef) -> Result<String> {
    let result = db
        .query(&Query::ShowCreateTable {
            table: table.clone(),
        })
        .await
        .with_context(|| format!("Failed to read definition of {}", table))?;
    result
        .rows
        .first()
        .and_then(|row| row.get(1))
        .and_then(value_as_string)
        .ok_or_else(|| {
            ReplicatorError::Schema(format!("SHOW CREATE TABLE {} returned no definition", table))
                .into()
        })
}

/// Read a global/session server variable, `None` when unreadable.
pub async fn server_variable(db: &mut dyn Relational, name: &str) -> Option<String> {
    match db
        .query(&Query::ServerVariable {
            name: name.to_string(),
        })
        .await
    {
        Ok(result) => result.scalar().and_then(value_as_string),
        Err(e) => {
            tracing::debug!("Could not read server variable {}: {:#}", name, e);
            None
        }
    }
}
