// ABOUTME: File backup and restore: query results to CSV, CSV into tables, size estimates
// ABOUTME: Defines the RowSink/RowSource capabilities used by the CSV implementations

pub mod csv_file;
pub mod dates;

pub use csv_file::{CsvRowSink, CsvRowSource};

use crate::batch::BatchWriter;
use crate::db::{Query, Relational};
use crate::error::ReplicatorError;
use crate::introspect;
use crate::materialize::validate_select;
use crate::model::{CanonicalType, Row, TableRef, Value};
use crate::utils::{format_duration, rows_per_second};
use anyhow::{bail, Context, Result};
use dates::{normalize_datetime, NormalizedDate};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Rows fetched per backup page.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Pause between backup pages.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(10);

/// Rows sampled to estimate the average row size.
pub const ESTIMATE_SAMPLE_ROWS: u64 = 100;

/// Writable sequence of records.
pub trait RowSink {
    fn write_header(&mut self, columns: &[String]) -> Result<()>;
    fn write_row(&mut self, row: &[Value]) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

/// Readable sequence of records with a fixed column list.
pub trait RowSource {
    fn columns(&self) -> &[String];
    /// Next well-formed row, or `None` at the end of input.
    fn next_row(&mut self) -> Result<Option<Row>>;
    /// Records dropped as malformed so far.
    fn skipped(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupOptions {
    pub page_size: usize,
    pub page_delay: Duration,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupReport {
    pub rows: u64,
    pub pages: usize,
    pub columns: Vec<String>,
    pub elapsed_secs: f64,
    pub rows_per_second: u64,
}

/// Export the result of `select_sql` page by page into `sink`.
///
/// Pages are fetched with `LIMIT/OFFSET` appended to the query; add an
/// `ORDER BY` to the query for a stable order across pages.
pub async fn backup_query(
    source: &mut dyn Relational,
    select_sql: &str,
    sink: &mut dyn RowSink,
    options: BackupOptions,
) -> Result<BackupReport> {
    let sql = validate_select(select_sql)?;
    let started = Instant::now();
    let progress = crate::progress::row_spinner();

    let mut columns: Option<Vec<String>> = None;
    let mut total = 0u64;
    let mut pages = 0usize;
    let page_size = options.page_size.max(1) as u64;

    loop {
        let page = source
            .query(&Query::CustomPage {
                sql: sql.clone(),
                limit: page_size,
                offset: total,
            })
            .await
            .with_context(|| format!("Backup query failed at offset {}", total))?;

        if columns.is_none() {
            let names = page.column_names();
            if names.is_empty() {
                bail!("Backup query returned no columns");
            }
            sink.write_header(&names)?;
            columns = Some(names);
        }

        let fetched = page.rows.len() as u64;
        for row in &page.rows {
            sink.write_row(row)?;
        }
        total += fetched;
        if fetched > 0 {
            pages += 1;
            progress.inc(fetched);
            tracing::info!(
                "[PAGE {}] {} rows processed ({} rows/sec)",
                pages,
                total,
                rows_per_second(total, started.elapsed())
            );
        }

        if fetched < page_size {
            break;
        }
        if !options.page_delay.is_zero() {
            tokio::time::sleep(options.page_delay).await;
        }
    }

    sink.finish()?;
    progress.finish_and_clear();

    let elapsed = started.elapsed();
    tracing::info!(
        "Backup complete: {} rows in {} ({} rows/sec)",
        total,
        format_duration(elapsed),
        rows_per_second(total, elapsed)
    );

    Ok(BackupReport {
        rows: total,
        pages,
        columns: columns.unwrap_or_default(),
        elapsed_secs: elapsed.as_secs_f64(),
        rows_per_second: rows_per_second(total, elapsed),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    pub table: String,
    pub rows: u64,
    pub skipped_lines: u64,
    pub chunks: usize,
    pub elapsed_secs: f64,
}

/// Insert every row from `rows` into the existing table `table`.
///
/// Header names are matched to the table's columns case-insensitively.
/// Values in date, datetime and timestamp columns are normalized to
/// `YYYY-MM-DD HH:MM:SS`. Empty fields in non-text columns are inserted as
/// NULL; in text columns they stay empty strings.
pub async fn restore_rows(
    target: &mut dyn Relational,
    rows: &mut dyn RowSource,
    table: &TableRef,
    chunk_rows: usize,
) -> Result<RestoreReport> {
    let description = introspect::describe_table(target, table).await?;
    let stored = table.with_name(description.table.clone());

    let mut columns = Vec::with_capacity(rows.columns().len());
    let mut date_positions = Vec::new();
    let mut non_text_positions = Vec::new();
    let mut unknown = Vec::new();
    for (i, header) in rows.columns().iter().enumerate() {
        match description.column(header) {
            Some(column) => {
                if column.canonical.is_temporal_date() {
                    date_positions.push(i);
                }
                if !matches!(column.canonical, CanonicalType::Text { .. }) {
                    non_text_positions.push(i);
                }
                columns.push(column.name.clone());
            }
            None => unknown.push(header.clone()),
        }
    }
    if !unknown.is_empty() {
        return Err(ReplicatorError::validation(format!(
            "CSV columns not found in {}: {}",
            stored,
            unknown.join(", ")
        ))
        .into());
    }
    tracing::info!("CSV headers: {}", columns.join(", "));

    let started = Instant::now();
    let progress = crate::progress::row_spinner();
    let mut writer = BatchWriter::new(target, stored.clone(), columns, chunk_rows);
    let per_chunk = writer.rows_per_chunk();
    let mut buffer: Vec<Row> = Vec::with_capacity(per_chunk);
    let mut inserted = 0u64;

    loop {
        let next = rows.next_row()?;
        let done = next.is_none();
        if let Some(mut row) = next {
            // Empty fields in non-text columns restore as NULL.
            for &i in &non_text_positions {
                if let Some(cell) = row.get_mut(i) {
                    if matches!(cell, Value::Text(text) if text.is_empty()) {
                        *cell = Value::Null;
                    }
                }
            }
            for &i in &date_positions {
                if let Some(Value::Text(text)) = row.get_mut(i) {
                    *text = normalize_field(text);
                }
            }
            buffer.push(row);
        }

        if buffer.len() >= per_chunk || (done && !buffer.is_empty()) {
            let chunk = std::mem::replace(&mut buffer, Vec::with_capacity(per_chunk));
            inserted += writer.insert_chunk(chunk).await?;
            progress.set_position(inserted);
            tracing::info!(
                "{} rows inserted into {} ({} rows/sec)",
                inserted,
                stored,
                rows_per_second(inserted, started.elapsed())
            );
        }
        if done {
            break;
        }
    }
    progress.finish_and_clear();

    let elapsed = started.elapsed();
    let skipped = rows.skipped();
    if skipped > 0 {
        tracing::warn!("{} malformed lines were skipped", skipped);
    }
    tracing::info!(
        "Restore complete: {} rows into {} in {}",
        inserted,
        stored,
        format_duration(elapsed)
    );

    Ok(RestoreReport {
        table: stored.name,
        rows: inserted,
        skipped_lines: skipped,
        chunks: writer.chunks_written(),
        elapsed_secs: elapsed.as_secs_f64(),
    })
}

fn normalize_field(text: &str) -> String {
    match normalize_datetime(text) {
        NormalizedDate::Canonical(value) => value,
        NormalizedDate::Unrecognised(value) => {
            tracing::warn!("Unknown date format, using as-is: {}", value);
            value
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    pub total_rows: u64,
    pub sample_rows: usize,
    pub avg_row_bytes: f64,
    pub estimated_csv_bytes: u64,
    pub rows_per_second: u64,
    pub estimated_secs: f64,
}

impl Estimate {
    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs_f64(self.estimated_secs.max(0.0))
    }
}

/// Estimate the row count, CSV size and export time of a query.
///
/// Row size is measured on a sample of up to 100 rows rendered as JSON
/// objects; CSV size adds 50% formatting overhead.
pub async fn estimate_query(source: &mut dyn Relational, select_sql: &str) -> Result<Estimate> {
    let sql = validate_select(select_sql)?;

    let total_rows = source
        .query(&Query::CountCustom { sql: sql.clone() })
        .await
        .and_then(|r| r.count())
        .context("Failed to count query rows")?;

    let sample = source
        .query(&Query::CustomPage {
            sql,
            limit: ESTIMATE_SAMPLE_ROWS,
            offset: 0,
        })
        .await
        .context("Failed to sample query rows")?;

    let columns = sample.column_names();
    let sample_bytes: usize = sample
        .rows
        .iter()
        .map(|row| sample_row_size(&columns, row))
        .sum();
    let avg_row_bytes = if sample.rows.is_empty() {
        0.0
    } else {
        sample_bytes as f64 / sample.rows.len() as f64
    };

    let rows_per_second = expected_rows_per_second(total_rows);
    let estimate = Estimate {
        total_rows,
        sample_rows: sample.rows.len(),
        avg_row_bytes,
        estimated_csv_bytes: (total_rows as f64 * avg_row_bytes * 1.5).round() as u64,
        rows_per_second,
        estimated_secs: total_rows as f64 / rows_per_second as f64,
    };

    if estimate.estimated_csv_bytes > 1000 * 1024 * 1024 {
        tracing::warn!(
            "Large dataset detected (~{} MB); the backup streams page by page",
            estimate.estimated_csv_bytes / (1024 * 1024)
        );
    }
    Ok(estimate)
}

/// Export throughput assumed for a given result size.
pub fn expected_rows_per_second(total_rows: u64) -> u64 {
    match total_rows {
        0..=99_999 => 80_000,
        100_000..=999_999 => 60_000,
        1_000_000..=9_999_999 => 40_000,
        _ => 20_000,
    }
}

fn sample_row_size(columns: &[String], row: &[Value]) -> usize {
    let object: serde_json::Map<String, serde_json::Value> = columns
        .iter()
        .cloned()
        .zip(row.iter().map(json_value))
        .collect();
    serde_json::to_string(&object)
        .map(|s| s.len())
        .unwrap_or_else(|_| row.iter().map(Value::display_len).sum())
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(v) => serde_json::Value::from(*v),
        Value::UInt(v) => serde_json::Value::from(*v),
        Value::Float(v) => serde_json::Value::from(f64::from(*v)),
        Value::Double(v) => serde_json::Value::from(*v),
        other => serde_json::Value::String(other.to_field().unwrap_or_default()),
    }
}
