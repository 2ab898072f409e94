//! Domain entities and business logic
//!
//! This module contains the core domain types for ChartSync:
//! - Collections partitioning the local store
//! - Pending records (the queued mutation log) and dead-letter records
//! - The cached credential pair for offline login
//! - Drain reports tracking sync runs
//! - Connectivity state
//! - Domain-specific error types and the sync failure taxonomy

pub mod collection;
pub mod connectivity;
pub mod credentials;
pub mod drain;
pub mod errors;
pub mod record;

// Re-export commonly used types
pub use collection::Collection;
pub use connectivity::ConnectivityState;
pub use credentials::StoredCredential;
pub use drain::{DrainOutcome, DrainReport};
pub use errors::{DomainError, SyncFailure};
pub use record::{DeadLetterRecord, PendingRecord};
