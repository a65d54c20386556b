// ABOUTME: Primary-key sync paths: empty target paging, anti-join, and keyset probe
// ABOUTME: Missing rows are recomputed every batch and inserted in their own transactions

use super::{pause, SyncCursor, SyncOptions};
use crate::batch::{BatchWriter, MYSQL_MAX_PLACEHOLDERS};
use crate::db::{value_as_u64, Query, Relational};
use crate::introspect;
use crate::model::{Row, TableDescription, TableRef, Value};
use anyhow::{Context, Result};
use std::collections::HashSet;

/// Upper bound on keys per target lookup statement.
const MAX_KEYS_PER_LOOKUP: usize = 1000;

/// Every source row is missing: page through the source in key order.
pub(super) async fn sync_into_empty(
    source: &mut dyn Relational,
    target: &mut dyn Relational,
    source_table: &TableRef,
    target_table: &TableRef,
    description: &TableDescription,
    options: &SyncOptions,
) -> Result<(u64, usize)> {
    let total = introspect::row_count(source, source_table).await?;
    tracing::info!(
        "Target {} is empty; copying all {} rows from {}",
        target_table,
        total,
        source_table
    );

    let mut cursor = SyncCursor::new(options.batch_size, total);
    let mut writer = BatchWriter::new(
        target,
        target_table.clone(),
        description.column_names(),
        options.batch_size,
    );
    let batch_size = options.batch_size as u64;
    let mut offset = 0u64;

    loop {
        let page = source
            .query(&Query::Select {
                table: source_table.clone(),
                order_by: description.primary_key.clone(),
                limit: Some(batch_size),
                offset: Some(offset),
            })
            .await
            .with_context(|| format!("Failed to read {} at offset {}", source_table, offset))?;

        let fetched = page.rows.len() as u64;
        if fetched == 0 {
            break;
        }
        let written = writer.write_all(page.rows).await?;
        cursor.advance(target_table, written);
        offset += fetched;

        if fetched < batch_size {
            break;
        }
        pause(options).await;
    }

    cursor.finish();
    Ok((cursor.synced, cursor.batch))
}

/// Anti-join from source to target, re-run for every batch.
///
/// `joined_target` is the target table as seen from the source connection
/// (schema-qualified). Rows inserted by earlier batches drop out of the join
/// on the next iteration, so the missing set is never cached.
pub(super) async fn sync_by_join(
    source: &mut dyn Relational,
    target: &mut dyn Relational,
    source_table: &TableRef,
    target_table: &TableRef,
    joined_target: &TableRef,
    description: &TableDescription,
    options: &SyncOptions,
) -> Result<(u64, usize)> {
    let missing = source
        .query(&Query::CountMissingRows {
            source: source_table.clone(),
            target: joined_target.clone(),
            primary_key: description.primary_key.clone(),
        })
        .await
        .and_then(|r| r.count())
        .with_context(|| {
            format!(
                "Failed to count rows of {} missing from {}",
                source_table, joined_target
            )
        })?;

    if missing == 0 {
        tracing::info!("{} is already in sync with {}", target_table, source_table);
        return Ok((0, 0));
    }
    tracing::info!(
        "{} rows of {} are missing from {}",
        missing,
        source_table,
        target_table
    );

    let mut cursor = SyncCursor::new(options.batch_size, missing);
    let mut writer = BatchWriter::new(
        target,
        target_table.clone(),
        description.column_names(),
        options.batch_size,
    );

    // Bounded by the initial estimate; rows that appear mid-run wait for the next run.
    let total_batches = cursor.total_batches;
    for batch in 0..total_batches {
        let page = source
            .query(&Query::MissingRows {
                source: source_table.clone(),
                target: joined_target.clone(),
                primary_key: description.primary_key.clone(),
                limit: options.batch_size as u64,
            })
            .await
            .with_context(|| format!("Failed to read missing rows of {}", source_table))?;

        if page.is_empty() {
            break;
        }
        let written = writer.write_all(page.rows).await?;
        cursor.advance(target_table, written);
        if batch + 1 < total_batches {
            pause(options).await;
        }
    }

    cursor.finish();
    Ok((cursor.synced, cursor.batch))
}

/// Keyset walk over the source, asking the target which keys of each page exist.
///
/// Used when source and target are on different servers and cannot be joined.
pub(super) async fn sync_by_probe(
    source: &mut dyn Relational,
    target: &mut dyn Relational,
    source_table: &TableRef,
    target_table: &TableRef,
    description: &TableDescription,
    options: &SyncOptions,
) -> Result<(u64, usize)> {
    let source_rows = introspect::row_count(source, source_table).await?;
    let target_rows = introspect::row_count(target, target_table).await?;
    let estimate = source_rows.saturating_sub(target_rows);
    tracing::info!(
        "Probing {} source rows against {} (about {} missing)",
        source_rows,
        target_table,
        estimate
    );

    let columns = description.column_names();
    let key_positions: Vec<usize> = description
        .primary_key
        .iter()
        .map(|k| {
            columns
                .iter()
                .position(|c| c == k)
                .with_context(|| format!("Key column {} not found in {}", k, source_table))
        })
        .collect::<Result<_>>()?;

    let mut cursor = SyncCursor::new(options.batch_size, estimate);
    let mut writer = BatchWriter::new(target, target_table.clone(), columns, options.batch_size);
    let mut after: Option<Vec<Value>> = None;
    let mut scanned = 0u64;

    loop {
        let page = source
            .query(&Query::RowsAfterKey {
                table: source_table.clone(),
                primary_key: description.primary_key.clone(),
                after: after.clone(),
                limit: options.batch_size as u64,
            })
            .await
            .with_context(|| format!("Failed to read key page of {}", source_table))?;

        let fetched = page.rows.len();
        if fetched == 0 {
            break;
        }
        scanned += fetched as u64;

        let keys: Vec<Vec<Value>> = page
            .rows
            .iter()
            .map(|row| key_of(row, &key_positions))
            .collect();
        after = keys.last().cloned();

        let present = existing_keys(
            writer.connection(),
            target_table,
            &description.primary_key,
            &keys,
        )
        .await?;

        let missing: Vec<Row> = page
            .rows
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !present.contains(i))
            .map(|(_, row)| row)
            .collect();

        if missing.is_empty() {
            tracing::debug!("Key page ending at {:?} already present in target", after);
        } else {
            let written = writer.write_all(missing).await?;
            cursor.advance(target_table, written);
        }

        if fetched < options.batch_size {
            break;
        }
        pause(options).await;
    }

    tracing::debug!("Probe scanned {} source rows of {}", scanned, source_table);
    cursor.finish();
    Ok((cursor.synced, cursor.batch))
}

fn key_of(row: &Row, positions: &[usize]) -> Vec<Value> {
    positions
        .iter()
        .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Positions within `keys` whose key already exists in the target.
///
/// Matching happens on the target server so its column collations decide
/// equality.
async fn existing_keys(
    target: &mut dyn Relational,
    table: &TableRef,
    primary_key: &[String],
    keys: &[Vec<Value>],
) -> Result<HashSet<usize>> {
    let per_lookup =
        (MYSQL_MAX_PLACEHOLDERS / primary_key.len().max(1)).clamp(1, MAX_KEYS_PER_LOOKUP);
    let mut present = HashSet::with_capacity(keys.len());
    for (chunk_index, chunk) in keys.chunks(per_lookup).enumerate() {
        let base = chunk_index * per_lookup;
        let result = target
            .query(&Query::ExistingKeys {
                table: table.clone(),
                primary_key: primary_key.to_vec(),
                keys: chunk.to_vec(),
            })
            .await
            .with_context(|| format!("Failed to look up keys in {}", table))?;
        for row in &result.rows {
            let position = row
                .first()
                .and_then(value_as_u64)
                .and_then(|p| usize::try_from(p).ok())
                .filter(|&p| p < chunk.len())
                .with_context(|| format!("Key lookup in {} returned {:?}", table, row))?;
            present.insert(base + position);
        }
    }
    Ok(present)
}
