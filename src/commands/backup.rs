// ABOUTME: backup, restore, and estimate commands for CSV file transfer
// ABOUTME: Each talks to one configured database chosen with --from/--into

use super::{with_context, Endpoint, Settings};
use crate::backup::{
    self, BackupOptions, CsvRowSink, CsvRowSource, RowSource, DEFAULT_PAGE_DELAY,
    DEFAULT_PAGE_SIZE,
};
use crate::batch::DEFAULT_CHUNK_ROWS;
use crate::config::validate_batch_size;
use crate::error::Side;
use crate::materialize::validate_select;
use crate::model::TableRef;
use crate::utils::{format_duration, format_file_size};
use anyhow::{bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackupArgs {
    pub query: String,
    pub file: PathBuf,
    pub from: Endpoint,
}

#[derive(Debug, Clone)]
pub struct RestoreArgs {
    pub file: PathBuf,
    pub table: String,
    pub into: Endpoint,
    pub yes: bool,
}

#[derive(Debug, Clone)]
pub struct EstimateArgs {
    pub query: String,
    pub from: Endpoint,
}

fn backup_options(settings: &Settings) -> Result<BackupOptions> {
    let section = &settings.file.backup;
    Ok(BackupOptions {
        page_size: validate_batch_size(
            "backup.page_size",
            section.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )?,
        page_delay: section
            .page_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PAGE_DELAY),
    })
}

pub async fn backup(settings: &Settings, args: BackupArgs) -> Result<()> {
    let sql = validate_select(&args.query)?;
    let options = backup_options(settings)?;
    let side = Side::from(args.from);
    let mut sink = CsvRowSink::create(&args.file)?;

    let report = with_context(settings, |context| async move {
        let outcome: Result<_> = async {
            let mut conn = context.acquire_side(side).await?;
            backup::backup_query(&mut conn, &sql, &mut sink, options).await
        }
        .await;
        (context, outcome)
    })
    .await?;

    let size = std::fs::metadata(&args.file).map(|m| m.len()).unwrap_or(0);
    settings.emit(&report, || {
        println!(
            "Backed up {} rows to {} ({}) in {}",
            report.rows,
            args.file.display(),
            format_file_size(size),
            format_duration(Duration::from_secs_f64(report.elapsed_secs))
        );
    })
}

pub async fn restore(settings: &Settings, args: RestoreArgs) -> Result<()> {
    let table = TableRef::parse(&args.table)?;
    let chunk_rows = validate_batch_size(
        "copy.chunk_rows",
        settings.file.copy.chunk_rows.unwrap_or(DEFAULT_CHUNK_ROWS),
    )?;
    let mut source = CsvRowSource::open(&args.file)?;
    let side = Side::from(args.into);

    if !args.yes && !confirm_restore(&args, &table, side, settings, source.columns())? {
        bail!("Restore cancelled");
    }

    let report = with_context(settings, |context| async move {
        let outcome: Result<_> = async {
            let mut conn = context.acquire_side(side).await?;
            backup::restore_rows(&mut conn, &mut source, &table, chunk_rows).await
        }
        .await;
        (context, outcome)
    })
    .await?;

    settings.emit(&report, || {
        println!(
            "Restored {} rows into {} in {} chunks",
            report.rows, report.table, report.chunks
        );
        if report.skipped_lines > 0 {
            println!("Skipped {} malformed lines", report.skipped_lines);
        }
    })
}

fn confirm_restore(
    args: &RestoreArgs,
    table: &TableRef,
    side: Side,
    settings: &Settings,
    columns: &[String],
) -> Result<bool> {
    let config = match side {
        Side::Source => &settings.source,
        Side::Target => &settings.target,
    };
    println!(
        "Restore {} into {} on {} ({})",
        args.file.display(),
        table,
        side,
        config.redacted()
    );
    println!("Columns: {}", columns.join(", "));
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Insert these rows?")
        .default(false)
        .interact()
        .context("Confirmation prompt failed; pass --yes to restore non-interactively")
}

pub async fn estimate(settings: &Settings, args: EstimateArgs) -> Result<()> {
    let sql = validate_select(&args.query)?;
    let side = Side::from(args.from);

    let estimate = with_context(settings, |context| async move {
        let outcome: Result<_> = async {
            let mut conn = context.acquire_side(side).await?;
            backup::estimate_query(&mut conn, &sql).await
        }
        .await;
        (context, outcome)
    })
    .await?;

    settings.emit(&estimate, || {
        println!("Rows:               {}", estimate.total_rows);
        println!("Average row size:   {:.0} bytes", estimate.avg_row_bytes);
        println!(
            "Estimated CSV size: {}",
            format_file_size(estimate.estimated_csv_bytes)
        );
        println!(
            "Estimated time:     {} (~{} rows/sec)",
            format_duration(estimate.estimated_duration()),
            estimate.rows_per_second
        );
    })
}
