// ABOUTME: copy-structure, copy-data, copy-table, and custom-query commands
// ABOUTME: Validates table names up front, then runs the engine on one connection per side

use super::{with_context, Settings};
use crate::batch::DEFAULT_CHUNK_ROWS;
use crate::config::validate_batch_size;
use crate::copier::{self, CopyOptions, CopyReport};
use crate::db::DatabaseContext;
use crate::materialize::{self, validate_select};
use crate::model::TableRef;
use crate::structure::{self, StructureReport};
use anyhow::Result;
use serde::Serialize;

fn chunk_rows(settings: &Settings) -> Result<usize> {
    validate_batch_size(
        "copy.chunk_rows",
        settings.file.copy.chunk_rows.unwrap_or(DEFAULT_CHUNK_ROWS),
    )
}

pub async fn copy_structure(settings: &Settings, source: &str, target: &str) -> Result<()> {
    let source = TableRef::parse(source)?;
    let target = TableRef::parse(target)?;

    let report = with_context(settings, |context| async move {
        let outcome = run_structure(&context, &source, &target).await;
        (context, outcome)
    })
    .await?;

    settings.emit(&report, || print_structure(&report))
}

pub async fn copy_data(
    settings: &Settings,
    source: &str,
    target: &str,
    limit: Option<u64>,
) -> Result<()> {
    let source = TableRef::parse(source)?;
    let target = TableRef::parse(target)?;
    let options = CopyOptions {
        limit,
        chunk_rows: chunk_rows(settings)?,
    };

    let report = with_context(settings, |context| async move {
        let outcome = run_copy(&context, &source, &target, options).await;
        (context, outcome)
    })
    .await?;

    settings.emit(&report, || print_copy(&report))
}

#[derive(Debug, Serialize)]
struct CopyTableReport {
    structure: StructureReport,
    data: CopyReport,
}

pub async fn copy_table(
    settings: &Settings,
    source: &str,
    target: &str,
    limit: Option<u64>,
) -> Result<()> {
    let source = TableRef::parse(source)?;
    let target = TableRef::parse(target)?;
    let options = CopyOptions {
        limit,
        chunk_rows: chunk_rows(settings)?,
    };

    let report = with_context(settings, |context| async move {
        let outcome: Result<CopyTableReport> = async {
            tracing::info!("[STEP 1] Copying table structure");
            let structure = run_structure(&context, &source, &target).await?;
            tracing::info!("[STEP 2] Copying table data");
            let created = target.with_name(structure.target_table.clone());
            let data = run_copy(&context, &source, &created, options).await?;
            Ok(CopyTableReport { structure, data })
        }
        .await;
        (context, outcome)
    })
    .await?;

    settings.emit(&report, || {
        print_structure(&report.structure);
        print_copy(&report.data);
    })
}

pub async fn custom_query(settings: &Settings, select_sql: &str, target: &str) -> Result<()> {
    let sql = validate_select(select_sql)?;
    let target = TableRef::parse(target)?;
    let chunk_rows = chunk_rows(settings)?;

    let report = with_context(settings, |context| async move {
        let outcome: Result<_> = async {
            let (mut source_conn, mut target_conn) = context.acquire().await?;
            materialize::materialize(&mut source_conn, &mut target_conn, &sql, &target, chunk_rows)
                .await
        }
        .await;
        (context, outcome)
    })
    .await?;

    settings.emit(&report, || {
        if report.created_table {
            println!("Created table {}", report.table);
        }
        println!(
            "Copied {} rows into {} in {} batches",
            report.copied_rows, report.table, report.batches
        );
    })
}

async fn run_structure(
    context: &DatabaseContext,
    source: &TableRef,
    target: &TableRef,
) -> Result<StructureReport> {
    let (mut source_conn, mut target_conn) = context.acquire().await?;
    structure::replicate_structure(&mut source_conn, &mut target_conn, source, target).await
}

async fn run_copy(
    context: &DatabaseContext,
    source: &TableRef,
    target: &TableRef,
    options: CopyOptions,
) -> Result<CopyReport> {
    let (mut source_conn, mut target_conn) = context.acquire().await?;
    copier::copy_rows(&mut source_conn, &mut target_conn, source, target, options).await
}

fn print_structure(report: &StructureReport) {
    println!(
        "Created {} from the structure of {}",
        report.target_table, report.source_table
    );
    if report.case_folded {
        println!(
            "Note: requested name {} was stored as {} (lower_case_table_names = {})",
            report.requested,
            report.target_table,
            report.lower_case_table_names.as_deref().unwrap_or("unknown")
        );
    }
    if !report.indexes_failed.is_empty() {
        println!(
            "Indexes that could not be created: {}",
            report.indexes_failed.join(", ")
        );
    }
}

fn print_copy(report: &CopyReport) {
    if report.skipped_rows > 0 {
        println!(
            "Target already holds {} rows; nothing copied",
            report.skipped_rows
        );
    } else {
        println!(
            "Copied {} rows in {} batches",
            report.copied_rows, report.batches
        );
    }
}
