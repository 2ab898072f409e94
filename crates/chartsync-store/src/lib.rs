//! ChartSync Store - Local record persistence
//!
//! SQLite-backed storage for:
//! - Per-collection pending record queues
//! - The singleton encrypted credential slot
//! - The persisted single-flight drain guard
//! - Dead-lettered records and drain-report history
//! - Background registration tags
//!
//! ## Architecture
//!
//! This crate implements the `RecordStore` port from `chartsync-core`
//! using SQLite as the storage backend. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteRecordStore`] - Full `RecordStore` implementation
//! - [`MemoryRecordStore`] - Non-durable fallback when SQLite cannot be opened
//! - [`StoreError`] - Error types for store operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use chartsync_store::{DatabasePool, SqliteRecordStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/chartsync/chartsync.db")).await?;
//! let store = SqliteRecordStore::new(pool.pool().clone());
//! // Use store as RecordStore...
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use chartsync_core::ports::RecordStore;

pub mod memory;
pub mod pool;
pub mod sqlite;

pub use memory::MemoryRecordStore;
pub use pool::DatabasePool;
pub use sqlite::SqliteRecordStore;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

/// Opens the record store at `path`, falling back to a non-durable
/// in-memory store if the database cannot be provisioned.
///
/// Store provisioning failure must never take the application down: the
/// caller gets a working queue either way and can check
/// [`RecordStore::is_durable`] to surface the degradation to the user.
pub async fn open_store(path: &Path) -> Arc<dyn RecordStore> {
    match DatabasePool::new(path).await {
        Ok(pool) => Arc::new(SqliteRecordStore::new(pool.pool().clone())),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not open record store; continuing with in-memory fallback. \
                 Queued records will not survive a restart"
            );
            Arc::new(MemoryRecordStore::new())
        }
    }
}
