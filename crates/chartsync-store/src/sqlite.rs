//! SQLite implementation of RecordStore
//!
//! This module provides the concrete SQLite-based implementation of the
//! record store port defined in chartsync-core. It handles all domain
//! type serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type       | SQL Type | Strategy                                    |
//! |-------------------|----------|---------------------------------------------|
//! | Collection        | TEXT     | Wire name via `.as_str()` / `FromStr`       |
//! | serde_json::Value | TEXT     | serde_json string                           |
//! | DateTime<Utc>     | TEXT     | ISO 8601 via `to_rfc3339()`                 |
//! | DrainOutcome      | TEXT     | Plain string; Failed stored as `failed:<msg>` |
//! | Uuid              | TEXT     | `to_string()` / `Uuid::parse_str`           |

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use chartsync_core::domain::{
    Collection, DeadLetterRecord, DrainOutcome, DrainReport, PendingRecord, StoredCredential,
};
use chartsync_core::ports::RecordStore;

use crate::StoreError;

/// SQLite-based implementation of the record store port
///
/// Provides durable storage for pending records, the credential slot,
/// the drain guard, dead letters, drain reports, and registrations.
/// All operations go through a connection pool; WAL mode lets the client
/// and the agent read concurrently.
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Parse a Collection from its stored wire name
fn collection_from_string(s: &str) -> Result<Collection, StoreError> {
    Collection::from_str(s)
        .map_err(|e| StoreError::SerializationError(format!("Unknown collection '{}': {}", s, e)))
}

/// Serialize a DrainOutcome to a string for storage
///
/// Simple outcomes are stored as plain strings (e.g., "completed").
/// The Failed variant is stored as "failed:<message>".
fn outcome_to_string(outcome: &DrainOutcome) -> String {
    match outcome {
        DrainOutcome::Running => "running".to_string(),
        DrainOutcome::Completed => "completed".to_string(),
        DrainOutcome::Partial => "partial".to_string(),
        DrainOutcome::Failed(msg) => format!("failed:{}", msg),
    }
}

/// Deserialize a DrainOutcome from its stored string representation
fn outcome_from_string(s: &str) -> Result<DrainOutcome, StoreError> {
    match s {
        "running" => Ok(DrainOutcome::Running),
        "completed" => Ok(DrainOutcome::Completed),
        "partial" => Ok(DrainOutcome::Partial),
        s if s.starts_with("failed:") => Ok(DrainOutcome::Failed(s[7..].to_string())),
        other => Err(StoreError::SerializationError(format!(
            "Unknown drain outcome: {}",
            other
        ))),
    }
}

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Try parsing without timezone (SQLite default format)
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            StoreError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstruct a PendingRecord from a database row
fn pending_record_from_row(row: &SqliteRow) -> Result<PendingRecord, StoreError> {
    let collection_str: String = row.get("collection");
    let id: String = row.get("id");
    let payload_str: String = row.get("payload");
    let created_at_str: String = row.get("created_at");
    let attempt_count: i64 = row.get("attempt_count");

    let collection = collection_from_string(&collection_str)?;
    let payload: serde_json::Value = serde_json::from_str(&payload_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid payload JSON for record '{}': {}", id, e))
    })?;
    let created_at = parse_datetime(&created_at_str)?;

    Ok(PendingRecord::from_parts(
        collection,
        id,
        payload,
        created_at,
        attempt_count as u32,
    ))
}

/// Reconstruct a DeadLetterRecord from a database row
fn dead_letter_from_row(row: &SqliteRow) -> Result<DeadLetterRecord, StoreError> {
    let collection_str: String = row.get("collection");
    let id: String = row.get("id");
    let payload_str: String = row.get("payload");
    let reason: String = row.get("reason");
    let created_at_str: String = row.get("created_at");
    let dead_lettered_at_str: String = row.get("dead_lettered_at");
    let attempt_count: i64 = row.get("attempt_count");

    let collection = collection_from_string(&collection_str)?;
    let payload: serde_json::Value = serde_json::from_str(&payload_str).map_err(|e| {
        StoreError::SerializationError(format!(
            "Invalid payload JSON for dead letter '{}': {}",
            id, e
        ))
    })?;
    let created_at = parse_datetime(&created_at_str)?;
    let dead_lettered_at = parse_datetime(&dead_lettered_at_str)?;

    Ok(DeadLetterRecord::from_parts(
        collection,
        id,
        payload,
        reason,
        created_at,
        dead_lettered_at,
        attempt_count as u32,
    ))
}

/// Reconstruct a DrainReport from a database row
fn report_from_row(row: &SqliteRow) -> Result<DrainReport, StoreError> {
    let id_str: String = row.get("id");
    let collection_str: String = row.get("collection");
    let context: String = row.get("context");
    let started_at_str: String = row.get("started_at");
    let finished_at_str: Option<String> = row.get("finished_at");
    let attempted: i64 = row.get("attempted");
    let accepted: i64 = row.get("accepted");
    let rejected: i64 = row.get("rejected");
    let outcome_str: String = row.get("outcome");

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid report id '{}': {}", id_str, e))
    })?;
    let collection = collection_from_string(&collection_str)?;
    let started_at = parse_datetime(&started_at_str)?;
    let finished_at = parse_optional_datetime(finished_at_str)?;
    let outcome = outcome_from_string(&outcome_str)?;

    Ok(DrainReport::from_parts(
        id,
        collection,
        context,
        started_at,
        finished_at,
        attempted as u64,
        accepted as u64,
        rejected as u64,
        outcome,
    ))
}

// ============================================================================
// RecordStore implementation
// ============================================================================

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    // --- Pending record operations ---

    async fn put(&self, record: &PendingRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_string(record.payload())
            .map_err(|e| anyhow::anyhow!("Failed to serialize payload: {}", e))?;

        // Upsert keyed on (collection, id): a second put fully replaces the
        // first, so at most one live record exists per id.
        sqlx::query(
            "INSERT INTO pending_records \
             (collection, id, payload, created_at, attempt_count) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(collection, id) DO UPDATE SET \
               payload = excluded.payload, \
               created_at = excluded.created_at, \
               attempt_count = excluded.attempt_count",
        )
        .bind(record.collection().as_str())
        .bind(record.id())
        .bind(&payload)
        .bind(record.created_at().to_rfc3339())
        .bind(record.attempt_count() as i64)
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            collection = %record.collection(),
            record_id = %record.id(),
            "Saved pending record"
        );
        Ok(())
    }

    async fn get(
        &self,
        collection: Collection,
        id: &str,
    ) -> anyhow::Result<Option<PendingRecord>> {
        let row = sqlx::query("SELECT * FROM pending_records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(pending_record_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self, collection: Collection) -> anyhow::Result<Vec<PendingRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM pending_records WHERE collection = ? \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(pending_record_from_row(row)?);
        }

        Ok(records)
    }

    async fn delete(&self, collection: Collection, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM pending_records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::trace!(collection = %collection, record_id = %id, "Deleted pending record");
        Ok(())
    }

    async fn count(&self, collection: Collection) -> anyhow::Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_records WHERE collection = ?")
                .bind(collection.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn record_attempts(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> anyhow::Result<()> {
        for id in ids {
            sqlx::query(
                "UPDATE pending_records SET attempt_count = attempt_count + 1 \
                 WHERE collection = ? AND id = ?",
            )
            .bind(collection.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    // --- Credential slot operations ---

    async fn save_credential(&self, credential: &StoredCredential) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO credentials (slot, encrypted_email, encrypted_password, updated_at) \
             VALUES (0, ?, ?, ?) \
             ON CONFLICT(slot) DO UPDATE SET \
               encrypted_email = excluded.encrypted_email, \
               encrypted_password = excluded.encrypted_password, \
               updated_at = excluded.updated_at",
        )
        .bind(credential.encrypted_email())
        .bind(credential.encrypted_password())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!("Saved credential slot");
        Ok(())
    }

    async fn get_credential(&self) -> anyhow::Result<Option<StoredCredential>> {
        let row = sqlx::query(
            "SELECT encrypted_email, encrypted_password FROM credentials WHERE slot = 0",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => {
                let email: String = r.get("encrypted_email");
                let password: String = r.get("encrypted_password");
                Ok(Some(StoredCredential::new(email, password)))
            }
            None => Ok(None),
        }
    }

    async fn clear_credential(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM credentials WHERE slot = 0")
            .execute(&self.pool)
            .await?;

        tracing::trace!("Cleared credential slot");
        Ok(())
    }

    // --- Single-flight drain guard ---

    async fn try_acquire_drain_guard(
        &self,
        holder: &str,
        ttl: Duration,
    ) -> anyhow::Result<bool> {
        let now = Utc::now();
        let stale_before = now - ttl;

        // Single conditional upsert so the check and the write are atomic
        // across both execution contexts. The row is taken when no guard
        // exists, when this holder already owns it, or when the current
        // guard is older than the freshness window.
        let result = sqlx::query(
            "INSERT INTO drain_guard (slot, holder, acquired_at) VALUES (0, ?, ?) \
             ON CONFLICT(slot) DO UPDATE SET \
               holder = excluded.holder, \
               acquired_at = excluded.acquired_at \
             WHERE drain_guard.holder = excluded.holder \
                OR drain_guard.acquired_at < ?",
        )
        .bind(holder)
        .bind(now.to_rfc3339())
        .bind(stale_before.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() > 0;
        if acquired {
            tracing::debug!(holder = %holder, "Acquired drain guard");
        } else {
            tracing::debug!(holder = %holder, "Drain guard held by another context");
        }

        Ok(acquired)
    }

    async fn release_drain_guard(&self, holder: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM drain_guard WHERE slot = 0 AND holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await?;

        tracing::debug!(holder = %holder, "Released drain guard");
        Ok(())
    }

    // --- Dead-letter collection ---

    async fn add_dead_letter(&self, record: &DeadLetterRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_string(record.payload())
            .map_err(|e| anyhow::anyhow!("Failed to serialize dead letter payload: {}", e))?;

        sqlx::query(
            "INSERT INTO dead_letters \
             (collection, id, payload, reason, created_at, dead_lettered_at, attempt_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(collection, id) DO UPDATE SET \
               payload = excluded.payload, \
               reason = excluded.reason, \
               created_at = excluded.created_at, \
               dead_lettered_at = excluded.dead_lettered_at, \
               attempt_count = excluded.attempt_count",
        )
        .bind(record.collection().as_str())
        .bind(record.id())
        .bind(&payload)
        .bind(record.reason())
        .bind(record.created_at().to_rfc3339())
        .bind(record.dead_lettered_at().to_rfc3339())
        .bind(record.attempt_count() as i64)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            collection = %record.collection(),
            record_id = %record.id(),
            reason = %record.reason(),
            "Dead-lettered record"
        );
        Ok(())
    }

    async fn dead_letters(
        &self,
        collection: Collection,
    ) -> anyhow::Result<Vec<DeadLetterRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM dead_letters WHERE collection = ? \
             ORDER BY dead_lettered_at DESC",
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(dead_letter_from_row(row)?);
        }

        Ok(records)
    }

    async fn take_dead_letter(
        &self,
        collection: Collection,
        id: &str,
    ) -> anyhow::Result<Option<DeadLetterRecord>> {
        let row = sqlx::query("SELECT * FROM dead_letters WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => {
                let record = dead_letter_from_row(r)?;

                sqlx::query("DELETE FROM dead_letters WHERE collection = ? AND id = ?")
                    .bind(collection.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await?;

                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    // --- Drain report history ---

    async fn save_report(&self, report: &DrainReport) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO drain_reports \
             (id, collection, context, started_at, finished_at, \
              attempted, accepted, rejected, outcome) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               finished_at = excluded.finished_at, \
               attempted = excluded.attempted, \
               accepted = excluded.accepted, \
               rejected = excluded.rejected, \
               outcome = excluded.outcome",
        )
        .bind(report.id().to_string())
        .bind(report.collection().as_str())
        .bind(report.context())
        .bind(report.started_at().to_rfc3339())
        .bind(report.finished_at().map(|dt| dt.to_rfc3339()))
        .bind(report.attempted() as i64)
        .bind(report.accepted() as i64)
        .bind(report.rejected() as i64)
        .bind(outcome_to_string(report.outcome()))
        .execute(&self.pool)
        .await?;

        tracing::trace!(report_id = %report.id(), "Saved drain report");
        Ok(())
    }

    async fn recent_reports(&self, limit: u32) -> anyhow::Result<Vec<DrainReport>> {
        let rows = sqlx::query(
            "SELECT * FROM drain_reports ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut reports = Vec::with_capacity(rows.len());
        for row in &rows {
            reports.push(report_from_row(row)?);
        }

        Ok(reports)
    }

    // --- Registration tags ---

    async fn save_registration(&self, tag: &str) -> anyhow::Result<()> {
        // Re-registering the same tag is a no-op; the original timestamp wins.
        sqlx::query(
            "INSERT INTO registrations (tag, registered_at) VALUES (?, ?) \
             ON CONFLICT(tag) DO NOTHING",
        )
        .bind(tag)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(tag = %tag, "Saved registration");
        Ok(())
    }

    async fn registrations(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT tag FROM registrations ORDER BY registered_at ASC, tag ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut tags = Vec::with_capacity(rows.len());
        for row in &rows {
            tags.push(row.get("tag"));
        }

        Ok(tags)
    }

    fn is_durable(&self) -> bool {
        true
    }
}
