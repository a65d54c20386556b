// ABOUTME: Command implementations behind the CLI subcommands
// ABOUTME: Resolves layered settings, owns the connection context, and prints reports

pub mod backup;
pub mod copy;
pub mod sync;

pub use backup::{backup, estimate, restore, BackupArgs, EstimateArgs, RestoreArgs};
pub use copy::{copy_data, copy_structure, copy_table, custom_query};
pub use sync::{sync_table, SyncArgs};

use crate::config::{
    ConnectionConfig, ConnectionSettings, FileConfig, SOURCE_ENV_PREFIX, TARGET_ENV_PREFIX,
};
use crate::db::DatabaseContext;
use crate::error::Side;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;

/// Which configured database a single-sided command talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Endpoint {
    Source,
    Target,
}

impl From<Endpoint> for Side {
    fn from(endpoint: Endpoint) -> Self {
        match endpoint {
            Endpoint::Source => Side::Source,
            Endpoint::Target => Side::Target,
        }
    }
}

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config_path: Option<PathBuf>,
    pub source_url: Option<String>,
    pub target_url: Option<String>,
    pub json: bool,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub source: ConnectionConfig,
    pub target: ConnectionConfig,
    pub file: FileConfig,
    pub json: bool,
}

impl Settings {
    /// Layer CLI flags over `DB1_`/`DB2_` variables over the config file.
    pub fn resolve(options: &GlobalOptions) -> Result<Self> {
        Self::resolve_with(options, |key| std::env::var(key).ok())
    }

    /// [`Settings::resolve`] with an injectable environment lookup.
    pub fn resolve_with<F>(options: &GlobalOptions, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = FileConfig::load(options.config_path.as_deref())?;

        let source = cli_layer(&options.source_url)
            .or(ConnectionSettings::from_lookup(SOURCE_ENV_PREFIX, &lookup)?)
            .or(file.source.clone())
            .resolve(Side::Source)?;
        let target = cli_layer(&options.target_url)
            .or(ConnectionSettings::from_lookup(TARGET_ENV_PREFIX, &lookup)?)
            .or(file.target.clone())
            .resolve(Side::Target)?;

        tracing::debug!("Source: {}", source.redacted());
        tracing::debug!("Target: {}", target.redacted());

        Ok(Self {
            source,
            target,
            file,
            json: options.json,
        })
    }

    pub async fn connect(&self) -> Result<DatabaseContext> {
        tracing::info!(
            "Connecting to source {} and target {}",
            self.source.redacted(),
            self.target.redacted()
        );
        DatabaseContext::connect(self.source.clone(), self.target.clone()).await
    }

    /// Print `report` as JSON on stdout, or run `human` for plain output.
    pub fn emit<T: Serialize>(&self, report: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            let text = serde_json::to_string_pretty(report).context("Failed to encode report")?;
            println!("{}", text);
        } else {
            human();
        }
        Ok(())
    }
}

fn cli_layer(url: &Option<String>) -> ConnectionSettings {
    match url {
        Some(url) if !url.trim().is_empty() => ConnectionSettings::from_url(url.trim()),
        _ => ConnectionSettings::default(),
    }
}

/// Connect, run `operation`, and disconnect the pools whatever the outcome.
pub async fn with_context<T, F, Fut>(settings: &Settings, operation: F) -> Result<T>
where
    F: FnOnce(DatabaseContext) -> Fut,
    Fut: Future<Output = (DatabaseContext, Result<T>)>,
{
    let context = settings.connect().await?;
    let (context, outcome) = operation(context).await;
    context.dispose().await;
    outcome
}
