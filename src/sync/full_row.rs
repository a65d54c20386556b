// ABOUTME: Sync fallback for tables without a primary key
// ABOUTME: Checks every source row against the target with a full-row match

use super::{pause, SyncCursor, SyncOptions};
use crate::batch::BatchWriter;
use crate::db::{Query, Relational};
use crate::model::{Row, TableRef};
use anyhow::{Context, Result};

/// Copy source rows that have no identical row in the target.
///
/// Issues one existence query per source row (every column compared with
/// NULL-safe equality), then inserts the rows that had no match in batches.
/// Duplicate source rows are matched against the target independently, so
/// a duplicated row that exists once in the target is not copied again.
///
/// Returns the rows inserted and the number of batches used.
pub async fn sync_table_without_primary_key(
    source: &mut dyn Relational,
    target: &mut dyn Relational,
    source_table: &TableRef,
    target_table: &TableRef,
    options: &SyncOptions,
) -> Result<(u64, usize)> {
    let result = source
        .query(&Query::Select {
            table: source_table.clone(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        })
        .await
        .with_context(|| format!("Failed to read rows from {}", source_table))?;

    if result.is_empty() {
        tracing::info!("Source table {} has no rows", source_table);
        return Ok((0, 0));
    }

    let columns = result.column_names();
    let checked = crate::progress::row_bar(result.rows.len() as u64);
    checked.set_message("checked");

    let mut missing: Vec<Row> = Vec::new();
    for row in result.rows {
        let found = target
            .query(&Query::RowExists {
                table: target_table.clone(),
                columns: columns.clone(),
                values: row.clone(),
            })
            .await
            .with_context(|| format!("Failed to check row in {}", target_table))?;
        if found.is_empty() {
            missing.push(row);
        }
        checked.inc(1);
    }
    checked.finish_and_clear();

    if missing.is_empty() {
        tracing::info!("{} is already in sync with {}", target_table, source_table);
        return Ok((0, 0));
    }
    tracing::info!(
        "{} rows of {} are missing from {}",
        missing.len(),
        source_table,
        target_table
    );

    let mut cursor = SyncCursor::new(options.batch_size, missing.len() as u64);
    let mut writer = BatchWriter::new(target, target_table.clone(), columns, options.batch_size);
    let mut rows = missing.into_iter().peekable();
    while rows.peek().is_some() {
        let batch: Vec<Row> = rows.by_ref().take(options.batch_size.max(1)).collect();
        let written = writer.write_all(batch).await?;
        cursor.advance(target_table, written);
        if rows.peek().is_some() {
            pause(options).await;
        }
    }

    cursor.finish();
    Ok((cursor.synced, cursor.batch))
}
