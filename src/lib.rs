// ABOUTME: Library root for table-replicator
// ABOUTME: Exposes the replication engine, connection layer, and CLI command implementations

pub mod backup;
pub mod batch;
pub mod commands;
pub mod config;
pub mod copier;
pub mod db;
pub mod error;
pub mod introspect;
pub mod materialize;
pub mod model;
pub mod progress;
pub mod structure;
pub mod sync;
pub mod utils;

pub use error::{ReplicatorError, Side};
pub use model::{Row, TableRef, Value};
