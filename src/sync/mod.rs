// ABOUTME: Delta syncer that copies only rows missing from the target table
// ABOUTME: Chooses between keyed paths (empty target, join, probe) and the full-row fallback

mod full_row;
mod keyed;

pub use full_row::sync_table_without_primary_key;

use crate::batch::DEFAULT_CHUNK_ROWS;
use crate::db::Relational;
use crate::introspect::{self, TableLookup};
use crate::model::TableRef;
use crate::structure;
use anyhow::Result;
use indicatif::ProgressBar;
use serde::Serialize;
use std::time::Duration;

/// Pause between batches so the target is not saturated.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(10);

/// How missing rows are located once the target holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Anti-join from source to target on one connection; needs both
    /// databases on the same server.
    Join,
    /// Keyset walk over the source, probing the target for each page's keys.
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub strategy: SyncStrategy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_CHUNK_ROWS,
            batch_delay: DEFAULT_BATCH_DELAY,
            strategy: SyncStrategy::Join,
        }
    }
}

/// Which algorithm a sync run used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPath {
    EmptyTarget,
    Join,
    Probe,
    FullRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub table: String,
    pub synced_rows: u64,
    pub total_batches: usize,
    pub path: SyncPath,
    /// True when the target table had to be created first.
    pub created_target: bool,
}

/// Progress of one sync run. Lives only for the duration of the run.
pub struct SyncCursor {
    pub batch_size: usize,
    pub total_missing: u64,
    pub synced: u64,
    pub batch: usize,
    pub total_batches: usize,
    bar: ProgressBar,
}

impl SyncCursor {
    pub fn new(batch_size: usize, total_missing: u64) -> Self {
        let total_batches = (total_missing as usize).div_ceil(batch_size.max(1));
        Self {
            batch_size,
            total_missing,
            synced: 0,
            batch: 0,
            total_batches,
            bar: crate::progress::row_bar(total_missing),
        }
    }

    /// Record one finished batch and log it.
    pub fn advance(&mut self, table: &TableRef, rows: u64) {
        self.batch += 1;
        self.synced += rows;
        if self.batch > self.total_batches {
            self.total_batches = self.batch;
        }
        self.bar.inc(rows);
        tracing::info!(
            "[BATCH {}/{}] {} rows synced into {} ({} of ~{})",
            self.batch,
            self.total_batches,
            rows,
            table,
            self.synced,
            self.total_missing
        );
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

pub(crate) async fn pause(options: &SyncOptions) {
    if !options.batch_delay.is_zero() {
        tokio::time::sleep(options.batch_delay).await;
    }
}

/// Copy every source row missing from the same-named target table.
///
/// The target is created from the source structure when absent. Tables with a
/// primary key are compared by key; tables without one fall back to the
/// slow full-row comparison.
pub async fn sync_table(
    source: &mut dyn Relational,
    target: &mut dyn Relational,
    table: &TableRef,
    options: SyncOptions,
) -> Result<SyncReport> {
    let source_table = introspect::require_table(source, table).await?;
    // A schema qualifier applies to the source only.
    let wanted = TableRef::new(source_table.name.clone());

    let (target_table, created_target) = match introspect::resolve_table(target, &wanted).await? {
        TableLookup::Exact(stored) | TableLookup::CaseMismatch { stored, .. } => (stored, false),
        TableLookup::Missing => {
            tracing::info!("Target table {} does not exist; creating it first", wanted);
            let report = structure::replicate_structure(source, target, &source_table, &wanted).await?;
            (wanted.with_name(report.target_table), true)
        }
    };

    let description = introspect::describe_table(source, &source_table).await?;

    let (synced_rows, total_batches, path) = if !description.has_primary_key() {
        tracing::warn!(
            "Table {} has no primary key; comparing full rows (one query per source row)",
            source_table
        );
        let (rows, batches) = full_row::sync_table_without_primary_key(
            source,
            target,
            &source_table,
            &target_table,
            &options,
        )
        .await?;
        (rows, batches, SyncPath::FullRow)
    } else if introspect::row_count(target, &target_table).await? == 0 {
        let (rows, batches) =
            keyed::sync_into_empty(source, target, &source_table, &target_table, &description, &options)
                .await?;
        (rows, batches, SyncPath::EmptyTarget)
    } else {
        match options.strategy {
            SyncStrategy::Join => {
                let joined_target = match &target_table.schema {
                    Some(_) => target_table.clone(),
                    None => TableRef::qualified(target.database(), target_table.name.clone()),
                };
                let (rows, batches) = keyed::sync_by_join(
                    source,
                    target,
                    &source_table,
                    &target_table,
                    &joined_target,
                    &description,
                    &options,
                )
                .await?;
                (rows, batches, SyncPath::Join)
            }
            SyncStrategy::Probe => {
                let (rows, batches) = keyed::sync_by_probe(
                    source,
                    target,
                    &source_table,
                    &target_table,
                    &description,
                    &options,
                )
                .await?;
                (rows, batches, SyncPath::Probe)
            }
        }
    };

    tracing::info!(
        "Sync of {} complete: {} rows in {} batches",
        source_table,
        synced_rows,
        total_batches
    );

    Ok(SyncReport {
        table: target_table.name,
        synced_rows,
        total_batches,
        path,
        created_target,
    })
}
