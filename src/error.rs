// ABOUTME: Typed error taxonomy for replication operations
// ABOUTME: Errors travel inside anyhow::Error and can be recovered with downcast_ref

use std::fmt;
use thiserror::Error;

/// Which side of a replication pair an operation ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Failure categories surfaced by the replication engine.
///
/// Engine functions return `anyhow::Result`; these variants are wrapped into
/// the `anyhow::Error` so callers that care (tests, the CLI) can recover the
/// category with `err.downcast_ref::<ReplicatorError>()`.
#[derive(Debug, Error)]
pub enum ReplicatorError {
    /// A table or column could not be found in the catalog.
    #[error("{0}")]
    Schema(String),

    /// The target table exists but the operation requires it not to.
    #[error(
        "Target table {0} already exists. Use sync-table to sync data or copy-data to copy data to an existing table."
    )]
    AlreadyExists(String),

    /// Malformed input (non-SELECT query, bad identifier, bad argument).
    #[error("{0}")]
    Validation(String),

    /// An insert or commit failed inside a batch; the batch was rolled back.
    #[error("Batch {batch} ({rows} rows) into {table} failed and was rolled back")]
    Transaction {
        table: String,
        batch: usize,
        rows: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A pool could not hand out a connection or the host is unreachable.
    #[error("Could not connect to {side} database")]
    Connection {
        side: Side,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ReplicatorError {
    /// Error for a table that does not exist on the given side.
    pub fn table_not_found(side: Side, table: &str) -> Self {
        ReplicatorError::Schema(format!(
            "Table {} not found in {} database",
            crate::utils::sanitize_identifier(table),
            side
        ))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ReplicatorError::Validation(message.into())
    }

    /// Wrap a driver error raised while a batch transaction was open.
    pub fn transaction(table: &str, batch: usize, rows: usize, source: anyhow::Error) -> Self {
        ReplicatorError::Transaction {
            table: table.to_string(),
            batch,
            rows,
            source: source.into(),
        }
    }

    pub fn connection(side: Side, source: anyhow::Error) -> Self {
        ReplicatorError::Connection {
            side,
            source: source.into(),
        }
    }
}

/// Return the taxonomy entry carried by an `anyhow::Error`, if any.
pub fn classify(err: &anyhow::Error) -> Option<&ReplicatorError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ReplicatorError>())
}
