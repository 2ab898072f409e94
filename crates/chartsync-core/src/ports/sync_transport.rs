//! Sync transport port (driven/secondary port)
//!
//! This module defines the interface for submitting a collection's queued
//! payloads to the remote system of record in one batch request.
//!
//! ## Design Notes
//!
//! - Returns the typed [`SyncFailure`] taxonomy instead of `anyhow` so the
//!   coordinator can tell retryable failures (network, 5xx) from permanent
//!   rejections (4xx) without string matching.
//! - The remote is idempotent on record ids; re-submitting a batch after a
//!   lost acknowledgment is safe, which is what makes at-least-once delivery
//!   workable.

use serde::{Deserialize, Serialize};

use crate::domain::{Collection, PendingRecord, SyncFailure};

/// One record the remote declined inside an otherwise successful response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Id of the declined record
    pub id: String,
    /// Remote's reason, verbatim
    #[serde(default)]
    pub reason: String,
}

/// Per-record acknowledgment echoed by the remote on a 2xx response
///
/// A legacy remote that returns an empty 2xx body acknowledges the whole
/// batch; [`BatchAck::whole_batch`] models that case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAck {
    /// Ids the remote committed
    #[serde(default)]
    pub accepted: Vec<String>,
    /// Ids the remote declined, with reasons
    #[serde(default)]
    pub rejected: Vec<RejectedRecord>,
}

impl BatchAck {
    /// Acknowledgment covering every submitted record
    pub fn whole_batch(records: &[PendingRecord]) -> Self {
        Self {
            accepted: records.iter().map(|r| r.id().to_string()).collect(),
            rejected: Vec::new(),
        }
    }

    /// Returns true if nothing was declined
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Port trait for the remote sync endpoint
#[async_trait::async_trait]
pub trait SyncTransport: Send + Sync {
    /// Submits the full pending batch for one collection in a single request
    ///
    /// The request body is `{ "<collection>": [payload, ...] }`. A 2xx
    /// response yields a [`BatchAck`]; every other outcome is classified
    /// into the [`SyncFailure`] taxonomy.
    async fn push_batch(
        &self,
        collection: Collection,
        records: &[PendingRecord],
    ) -> Result<BatchAck, SyncFailure>;
}
