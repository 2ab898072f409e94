//! Pending and dead-letter records
//!
//! A [`PendingRecord`] is one locally queued mutation awaiting remote
//! acknowledgment. The UI layer creates them; only the sync coordinator
//! mutates them (attempt bookkeeping, deletion on acknowledgment). A record
//! the remote permanently rejected leaves the live queue as a
//! [`DeadLetterRecord`] so it can be inspected and optionally redriven.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::collection::Collection;
use super::errors::DomainError;

/// A locally queued mutation awaiting remote acknowledgment
///
/// Exactly one record exists per (collection, id): a later write with the
/// same id replaces the earlier one instead of duplicating it. The payload
/// is opaque to the engine; it is handed to the remote verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    /// Collection the record belongs to (always a synced collection)
    collection: Collection,
    /// Identifier, unique within the collection
    id: String,
    /// Opaque JSON payload handed to the remote verbatim
    payload: serde_json::Value,
    /// When the record was first queued
    created_at: DateTime<Utc>,
    /// How many drain attempts have included this record
    attempt_count: u32,
}

impl PendingRecord {
    /// Creates a new pending record with a fresh timestamp and zero attempts
    ///
    /// # Errors
    /// Returns an error if the id is empty or the collection has no sync
    /// endpoint (credentials never enter the queue).
    pub fn new(
        collection: Collection,
        id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::InvalidRecordId(id));
        }
        if !collection.is_synced() {
            return Err(DomainError::NotSynced(collection));
        }
        Ok(Self {
            collection,
            id,
            payload,
            created_at: Utc::now(),
            attempt_count: 0,
        })
    }

    /// Reconstitutes a record from storage without re-validating
    pub fn from_parts(
        collection: Collection,
        id: String,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
        attempt_count: u32,
    ) -> Self {
        Self {
            collection,
            id,
            payload,
            created_at,
            attempt_count,
        }
    }

    // --- Getters ---

    /// Returns the collection this record belongs to
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Returns the record id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the opaque payload
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Returns when the record was first queued
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns how many drain attempts have included this record
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    // --- Mutators (sync coordinator only) ---

    /// Records one more drain attempt
    pub fn record_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    /// Replaces the payload, as an upsert with the same id does
    pub fn replace_payload(&mut self, payload: serde_json::Value) {
        self.payload = payload;
    }
}

/// A record the remote permanently rejected, held for manual inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    collection: Collection,
    id: String,
    payload: serde_json::Value,
    /// Rejection reason reported by the remote
    reason: String,
    /// When the record was originally queued
    created_at: DateTime<Utc>,
    /// When the record was moved out of the live queue
    dead_lettered_at: DateTime<Utc>,
    /// Attempts made before the rejection
    attempt_count: u32,
}

impl DeadLetterRecord {
    /// Moves a pending record into the dead-letter state
    pub fn from_pending(record: PendingRecord, reason: impl Into<String>) -> Self {
        Self {
            collection: record.collection,
            id: record.id,
            payload: record.payload,
            reason: reason.into(),
            created_at: record.created_at,
            dead_lettered_at: Utc::now(),
            attempt_count: record.attempt_count,
        }
    }

    /// Reconstitutes a dead-letter record from storage
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        collection: Collection,
        id: String,
        payload: serde_json::Value,
        reason: String,
        created_at: DateTime<Utc>,
        dead_lettered_at: DateTime<Utc>,
        attempt_count: u32,
    ) -> Self {
        Self {
            collection,
            id,
            payload,
            reason,
            created_at,
            dead_lettered_at,
            attempt_count,
        }
    }

    /// Returns the record to the live queue with attempt bookkeeping reset
    ///
    /// Used by the redrive path after an operator fixed whatever the remote
    /// rejected.
    pub fn into_pending(self) -> PendingRecord {
        PendingRecord {
            collection: self.collection,
            id: self.id,
            payload: self.payload,
            created_at: self.created_at,
            attempt_count: 0,
        }
    }

    // --- Getters ---

    /// Returns the collection the record came from
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Returns the record id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the opaque payload
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Returns the rejection reason
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns when the record was originally queued
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the record was dead-lettered
    pub fn dead_lettered_at(&self) -> DateTime<Utc> {
        self.dead_lettered_at
    }

    /// Returns the attempts made before rejection
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}
