//! Domain error types
//!
//! This module defines error types specific to domain operations, plus the
//! failure taxonomy the sync path classifies remote and local faults into.
//! Every failure in this subsystem is absorbed locally: nothing here is ever
//! surfaced to the user as a per-operation error dialog.

use thiserror::Error;

use super::collection::Collection;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Record id is empty or otherwise malformed
    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),

    /// Collection name not in the fixed set
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Operation requires a synced collection
    #[error("Collection has no sync endpoint: {0}")]
    NotSynced(Collection),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Classified failures of the sync subsystem
///
/// The classification drives queue handling: retryable failures leave the
/// queue untouched for the next trigger, non-retryable ones move records to
/// the dead-letter collection.
#[derive(Debug, Error)]
pub enum SyncFailure {
    /// No durable-storage capability in this execution context.
    /// The store degrades to memory-only; never fatal.
    #[error("Durable storage unavailable: {0}")]
    StoreUnavailable(String),

    /// Stored ciphertext absent, unparsable, or failing authentication.
    /// The vault reports "no credentials"; never fatal.
    #[error("Credential ciphertext unusable: {0}")]
    EncryptionFormat(String),

    /// The sync POST could not reach the remote at all
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote rejected the batch outright (4xx)
    #[error("Remote rejected batch with status {status}: {reason}")]
    RemoteRejected { status: u16, reason: String },

    /// The remote failed transiently (5xx)
    #[error("Remote server error with status {status}")]
    RemoteServerError { status: u16 },

    /// A local-only collection was handed to the sync path
    #[error("Collection has no sync endpoint: {0}")]
    NotSyncable(Collection),
}

impl SyncFailure {
    /// Returns true if the failure is transient and the queue should be
    /// preserved for a retry on the next trigger
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncFailure::NetworkUnavailable(_) | SyncFailure::RemoteServerError { .. }
        )
    }
}
