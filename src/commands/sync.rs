// ABOUTME: sync-table command: copies source rows missing from the target table
// ABOUTME: Resolves batch size, delay, and strategy from flags, config file, and defaults

use super::{with_context, Settings};
use crate::batch::DEFAULT_CHUNK_ROWS;
use crate::config::{validate_batch_size, StrategyChoice};
use crate::model::TableRef;
use crate::sync::{self, SyncOptions, SyncStrategy, DEFAULT_BATCH_DELAY};
use anyhow::Result;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct SyncArgs {
    pub table: String,
    pub batch_size: Option<usize>,
    pub batch_delay_ms: Option<u64>,
    pub strategy: Option<StrategyChoice>,
}

/// Sync tuning after layering flags over the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSync {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub strategy: StrategyChoice,
}

impl ResolvedSync {
    pub fn from_layers(args: &SyncArgs, settings: &Settings) -> Result<Self> {
        let file = &settings.file.sync;
        let batch_size = validate_batch_size(
            "batch size",
            args.batch_size
                .or(file.batch_size)
                .unwrap_or(DEFAULT_CHUNK_ROWS),
        )?;
        let batch_delay = args
            .batch_delay_ms
            .or(file.batch_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BATCH_DELAY);
        let strategy = args.strategy.or(file.strategy).unwrap_or_default();
        Ok(Self {
            batch_size,
            batch_delay,
            strategy,
        })
    }

    /// Concrete options once it is known whether both databases share a server.
    pub fn options(&self, colocated: bool) -> SyncOptions {
        let strategy = match self.strategy {
            StrategyChoice::Join => SyncStrategy::Join,
            StrategyChoice::Probe => SyncStrategy::Probe,
            StrategyChoice::Auto if colocated => SyncStrategy::Join,
            StrategyChoice::Auto => SyncStrategy::Probe,
        };
        SyncOptions {
            batch_size: self.batch_size,
            batch_delay: self.batch_delay,
            strategy,
        }
    }
}

pub async fn sync_table(settings: &Settings, args: SyncArgs) -> Result<()> {
    let table = TableRef::parse(&args.table)?;
    let resolved = ResolvedSync::from_layers(&args, settings)?;

    let report = with_context(settings, |context| async move {
        let outcome: Result<_> = async {
            let options = resolved.options(context.colocated());
            if resolved.strategy == StrategyChoice::Join && !context.colocated() {
                tracing::warn!(
                    "Join strategy requested but source and target are on different servers; the join may fail"
                );
            }
            tracing::info!(
                "Syncing {} (batch size {}, delay {}ms, {:?} strategy)",
                table,
                options.batch_size,
                options.batch_delay.as_millis(),
                options.strategy
            );
            let (mut source_conn, mut target_conn) = context.acquire().await?;
            sync::sync_table(&mut source_conn, &mut target_conn, &table, options).await
        }
        .await;
        (context, outcome)
    })
    .await?;

    settings.emit(&report, || {
        if report.created_target {
            println!("Created target table {}", report.table);
        }
        println!(
            "Synced {} rows into {} in {} batches",
            report.synced_rows, report.table, report.total_batches
        );
    })
}
