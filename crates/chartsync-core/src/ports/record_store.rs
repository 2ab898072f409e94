//! Record store port (driven/secondary port)
//!
//! This module defines the interface for the local persistent store: the
//! per-collection pending-record queue, the singleton credential slot, the
//! single-flight drain guard, the dead-letter collection, drain-report
//! history, and background registration tags.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, in-memory fallback) and don't need domain-level classification.
//! - Every operation is single-record atomic; no multi-record transaction
//!   atomicity is promised, and the drain algorithm does not need one.
//! - Both execution contexts (foreground client and background agent) open
//!   the same physical store; the drain guard rows are how they coordinate.

use chrono::Duration;

use crate::domain::{
    Collection, DeadLetterRecord, DrainReport, PendingRecord, StoredCredential,
};

/// Port trait for the local persistent store
///
/// ## Implementation Notes
///
/// - `put` is an upsert keyed on (collection, id): a second put with the
///   same id must atomically replace the first, never duplicate it, and a
///   reader must never observe a half-written record.
/// - `get_all` returns records in insertion-stable order. Callers do not
///   rely on the order for correctness.
/// - `delete` of a nonexistent id is a no-op, not an error.
/// - `try_acquire_drain_guard` must be atomic across contexts: of two
///   concurrent callers with different holder tags, at most one wins. A
///   guard older than `ttl` is stale and may be taken over.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    // --- Pending record operations ---

    /// Upserts a pending record by (collection, id)
    async fn put(&self, record: &PendingRecord) -> anyhow::Result<()>;

    /// Retrieves one pending record by id
    async fn get(&self, collection: Collection, id: &str)
        -> anyhow::Result<Option<PendingRecord>>;

    /// Returns every pending record in the collection, insertion-stable
    async fn get_all(&self, collection: Collection) -> anyhow::Result<Vec<PendingRecord>>;

    /// Removes one pending record; unknown ids are a no-op
    async fn delete(&self, collection: Collection, id: &str) -> anyhow::Result<()>;

    /// Counts pending records in the collection
    async fn count(&self, collection: Collection) -> anyhow::Result<u64>;

    /// Increments attempt_count on the given records after a failed drain
    async fn record_attempts(&self, collection: Collection, ids: &[String])
        -> anyhow::Result<()>;

    // --- Credential slot ---

    /// Overwrites the singleton credential slot
    async fn save_credential(&self, credential: &StoredCredential) -> anyhow::Result<()>;

    /// Reads the singleton credential slot
    async fn get_credential(&self) -> anyhow::Result<Option<StoredCredential>>;

    /// Clears the singleton credential slot; a no-op when empty
    async fn clear_credential(&self) -> anyhow::Result<()>;

    // --- Single-flight drain guard ---

    /// Attempts to acquire the drain guard for `holder`
    ///
    /// Returns true if acquired (no guard, a stale guard, or a guard this
    /// holder already owns), false if another holder owns a fresh guard.
    async fn try_acquire_drain_guard(&self, holder: &str, ttl: Duration)
        -> anyhow::Result<bool>;

    /// Releases the drain guard if `holder` owns it
    async fn release_drain_guard(&self, holder: &str) -> anyhow::Result<()>;

    // --- Dead-letter collection ---

    /// Moves a rejected record into the dead-letter collection
    async fn add_dead_letter(&self, record: &DeadLetterRecord) -> anyhow::Result<()>;

    /// Lists dead-lettered records for one collection
    async fn dead_letters(&self, collection: Collection)
        -> anyhow::Result<Vec<DeadLetterRecord>>;

    /// Removes and returns one dead-lettered record, for redrive
    async fn take_dead_letter(
        &self,
        collection: Collection,
        id: &str,
    ) -> anyhow::Result<Option<DeadLetterRecord>>;

    // --- Drain report history ---

    /// Persists a finished drain report
    async fn save_report(&self, report: &DrainReport) -> anyhow::Result<()>;

    /// Returns the most recent drain reports, newest first
    async fn recent_reports(&self, limit: u32) -> anyhow::Result<Vec<DrainReport>>;

    // --- Background registration tags ---

    /// Persists a deferred-execution registration tag; idempotent
    async fn save_registration(&self, tag: &str) -> anyhow::Result<()>;

    /// Lists persisted registration tags
    async fn registrations(&self) -> anyhow::Result<Vec<String>>;

    // --- Capability ---

    /// Returns false when this store is the memory-only degraded fallback
    fn is_durable(&self) -> bool;
}
