// ABOUTME: Owns the source and target connection pools for one invocation
// ABOUTME: Validates both servers at startup and disconnects the pools at exit

use super::MysqlConnection;
use crate::config::{ConnectionConfig, CONNECT_TIMEOUT};
use crate::error::{ReplicatorError, Side};
use crate::utils::retry_with_backoff;
use anyhow::{Context, Result};
use mysql_async::prelude::*;
use mysql_async::Pool;
use std::time::Duration;

/// Explicitly constructed replacement for process-wide pools.
///
/// Create with [`DatabaseContext::connect`], hand connections to engine
/// operations with [`DatabaseContext::acquire`], and always finish with
/// [`DatabaseContext::dispose`].
pub struct DatabaseContext {
    source: Pool,
    target: Pool,
    source_config: ConnectionConfig,
    target_config: ConnectionConfig,
}

impl DatabaseContext {
    /// Build both pools and ping each server, retrying transient failures.
    pub async fn connect(source: ConnectionConfig, target: ConnectionConfig) -> Result<Self> {
        let source_pool = Pool::new(source.opts()?);
        let target_pool = Pool::new(target.opts()?);

        let context = Self {
            source: source_pool,
            target: target_pool,
            source_config: source,
            target_config: target,
        };

        if let Err(e) = context.validate().await {
            context.dispose().await;
            return Err(e);
        }
        Ok(context)
    }

    async fn validate(&self) -> Result<()> {
        ping(&self.source, Side::Source, &self.source_config).await?;
        ping(&self.target, Side::Target, &self.target_config).await?;
        Ok(())
    }

    /// One connection from each pool, returned to its pool on drop.
    pub async fn acquire(&self) -> Result<(MysqlConnection, MysqlConnection)> {
        let source = self.acquire_side(Side::Source).await?;
        let target = self.acquire_side(Side::Target).await?;
        Ok((source, target))
    }

    pub async fn acquire_side(&self, side: Side) -> Result<MysqlConnection> {
        let (pool, config) = match side {
            Side::Source => (&self.source, &self.source_config),
            Side::Target => (&self.target, &self.target_config),
        };
        let conn = pool
            .get_conn()
            .await
            .map_err(|e| ReplicatorError::connection(side, e.into()))?;
        Ok(MysqlConnection::new(conn, side, config.database.clone()))
    }

    /// True when source and target live on the same server, so one
    /// connection can join across both databases.
    pub fn colocated(&self) -> bool {
        self.source_config.same_server(&self.target_config)
    }

    pub fn config(&self, side: Side) -> &ConnectionConfig {
        match side {
            Side::Source => &self.source_config,
            Side::Target => &self.target_config,
        }
    }

    /// Disconnect both pools. Failures are logged, not returned.
    pub async fn dispose(self) {
        if let Err(e) = self.source.disconnect().await {
            tracing::warn!("Failed to close source pool cleanly: {}", e);
        }
        if let Err(e) = self.target.disconnect().await {
            tracing::warn!("Failed to close target pool cleanly: {}", e);
        }
        tracing::debug!("Connection pools closed");
    }
}

async fn ping(pool: &Pool, side: Side, config: &ConnectionConfig) -> Result<()> {
    let attempt = move || async move {
        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, pool.get_conn())
            .await
            .with_context(|| {
                format!(
                    "Timed out after {}s connecting to {}",
                    CONNECT_TIMEOUT.as_secs(),
                    config.redacted()
                )
            })?
            .with_context(|| format!("Failed to connect to {}", config.redacted()))?;
        conn.query_drop("SELECT 1")
            .await
            .with_context(|| format!("Ping failed on {}", config.redacted()))?;
        Ok::<(), anyhow::Error>(())
    };

    retry_with_backoff(attempt, 2, Duration::from_secs(1))
        .await
        .map_err(|e| ReplicatorError::connection(side, e))?;

    tracing::info!("Connected to {} database {}", side, config.redacted());
    Ok(())
}
