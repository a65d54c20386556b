// ABOUTME: Batch copier that fills an existing, empty target table from a source table
// ABOUTME: Skips non-empty targets and writes rows in transactional chunks

use crate::batch::{BatchWriter, DEFAULT_CHUNK_ROWS};
use crate::db::{Query, Relational};
use crate::introspect;
use crate::model::TableRef;
use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Copy only the first `limit` rows.
    pub limit: Option<u64>,
    pub chunk_rows: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            limit: None,
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CopyReport {
    pub copied_rows: u64,
    /// Rows already present in a non-empty target that was left untouched.
    pub skipped_rows: u64,
    pub batches: usize,
}

/// Copy rows from `source_name` into the existing `target_name`.
///
/// The target must exist. When it already holds rows nothing is written and
/// the existing row count is reported as skipped.
pub async fn copy_rows(
    source: &mut dyn Relational,
    target: &mut dyn Relational,
    source_name: &TableRef,
    target_name: &TableRef,
    options: CopyOptions,
) -> Result<CopyReport> {
    let source_table = introspect::require_table(source, source_name).await?;
    let target_table = introspect::require_table(target, target_name).await?;

    let existing = introspect::row_count(target, &target_table).await?;
    if existing > 0 {
        tracing::warn!(
            "Target table {} already has {} rows; skipping copy (use sync-table to add missing rows)",
            target_table,
            existing
        );
        return Ok(CopyReport {
            copied_rows: 0,
            skipped_rows: existing,
            batches: 0,
        });
    }

    let started = Instant::now();
    let result = source
        .query(&Query::Select {
            table: source_table.clone(),
            order_by: Vec::new(),
            limit: options.limit,
            offset: None,
        })
        .await
        .with_context(|| format!("Failed to read rows from {}", source_table))?;

    if result.is_empty() {
        tracing::info!("Source table {} has no rows to copy", source_table);
        return Ok(CopyReport::default());
    }

    let total = result.rows.len();
    tracing::info!(
        "Copying {} rows from {} to {}",
        total,
        source_table,
        target_table
    );

    let columns = result.column_names();
    let mut writer = BatchWriter::new(target, target_table.clone(), columns, options.chunk_rows);
    let per_chunk = writer.rows_per_chunk();
    let total_chunks = total.div_ceil(per_chunk);

    let mut copied = 0u64;
    let mut rows = result.rows.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<_> = rows.by_ref().take(per_chunk).collect();
        copied += writer.insert_chunk(chunk).await?;
        tracing::info!(
            "[BATCH {}/{}] {} of {} rows copied into {}",
            writer.chunks_written(),
            total_chunks,
            copied,
            total,
            target_table
        );
    }

    tracing::info!(
        "Copied {} rows into {} in {}",
        copied,
        target_table,
        crate::utils::format_duration(started.elapsed())
    );

    Ok(CopyReport {
        copied_rows: copied,
        skipped_rows: 0,
        batches: writer.chunks_written(),
    })
}
