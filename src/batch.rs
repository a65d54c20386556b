// ABOUTME: Transactional chunked insert primitive shared by copy, sync, materialize, and restore
// ABOUTME: Each chunk is one multi-row INSERT inside its own transaction

use crate::db::{Query, Relational};
use crate::error::ReplicatorError;
use crate::model::{Row, TableRef};
use anyhow::Result;

/// Rows per chunk when nothing else is configured.
pub const DEFAULT_CHUNK_ROWS: usize = 1000;

/// Most placeholders MySQL accepts in one prepared statement.
pub const MYSQL_MAX_PLACEHOLDERS: usize = 65535;

/// Writes rows to one target table in bounded, individually committed chunks.
///
/// A chunk is begun, inserted and committed on its own. When the insert or
/// the commit fails the chunk is rolled back and a
/// [`ReplicatorError::Transaction`] is returned; chunks committed before it
/// stay committed.
pub struct BatchWriter<'a> {
    target: &'a mut dyn Relational,
    table: TableRef,
    columns: Vec<String>,
    rows_per_chunk: usize,
    chunks_written: usize,
}

impl<'a> BatchWriter<'a> {
    /// Create a writer for `table` with a fixed column order.
    ///
    /// `chunk_rows` is further capped so one statement never exceeds the
    /// server's placeholder limit.
    pub fn new(
        target: &'a mut dyn Relational,
        table: TableRef,
        columns: Vec<String>,
        chunk_rows: usize,
    ) -> Self {
        let rows_per_chunk = rows_per_chunk(chunk_rows, columns.len());
        Self {
            target,
            table,
            columns,
            rows_per_chunk,
            chunks_written: 0,
        }
    }

    pub fn rows_per_chunk(&self) -> usize {
        self.rows_per_chunk
    }

    /// Chunks committed so far by this writer.
    pub fn chunks_written(&self) -> usize {
        self.chunks_written
    }

    /// Get the underlying connection, for callers that interleave reads.
    pub fn connection(&mut self) -> &mut dyn Relational {
        &mut *self.target
    }

    /// Insert all rows, chunk by chunk in order. Returns rows written.
    pub async fn write_all(&mut self, rows: Vec<Row>) -> Result<u64> {
        let mut written = 0u64;
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk: Vec<Row> = rows.by_ref().take(self.rows_per_chunk).collect();
            written += self.insert_chunk(chunk).await?;
        }
        Ok(written)
    }

    /// Insert one chunk inside its own transaction.
    ///
    /// The chunk must not exceed [`BatchWriter::rows_per_chunk`]; callers
    /// with larger inputs use [`BatchWriter::write_all`].
    pub async fn insert_chunk(&mut self, rows: Vec<Row>) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let batch = self.chunks_written + 1;
        let count = rows.len();

        self.target.begin().await.map_err(|e| {
            ReplicatorError::transaction(&self.table.to_string(), batch, count, e)
        })?;

        let insert = Query::Insert {
            table: self.table.clone(),
            columns: self.columns.clone(),
            rows,
        };

        let outcome = match self.target.execute(&insert).await {
            Ok(_) => self.target.commit().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.chunks_written = batch;
                tracing::debug!("Committed chunk {} ({} rows) into {}", batch, count, self.table);
                Ok(count as u64)
            }
            Err(e) => {
                if let Err(rollback_err) = self.target.rollback().await {
                    tracing::error!(
                        "Rollback of chunk {} into {} failed: {:#}",
                        batch,
                        self.table,
                        rollback_err
                    );
                }
                tracing::error!(
                    "Chunk {} ({} rows) into {} failed and was rolled back: {:#}",
                    batch,
                    count,
                    self.table,
                    e
                );
                Err(ReplicatorError::transaction(&self.table.to_string(), batch, count, e).into())
            }
        }
    }
}

/// Effective chunk size: the configured rows, capped by the placeholder limit.
///
/// # Examples
///
/// ```
/// # use table_replicator::batch::rows_per_chunk;
/// assert_eq!(rows_per_chunk(1000, 5), 1000);
/// assert_eq!(rows_per_chunk(1000, 100), 655);
/// assert_eq!(rows_per_chunk(0, 3), 1);
/// ```
pub fn rows_per_chunk(chunk_rows: usize, columns: usize) -> usize {
    let by_placeholders = MYSQL_MAX_PLACEHOLDERS / columns.max(1);
    chunk_rows.min(by_placeholders).max(1)
}
