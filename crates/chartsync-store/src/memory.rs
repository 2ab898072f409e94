//! In-memory implementation of RecordStore
//!
//! Non-durable fallback used when the SQLite database cannot be provisioned
//! (missing permissions, full disk, corrupted file). The application keeps
//! working against this store; nothing here survives a restart, which is
//! why [`MemoryRecordStore::is_durable`] reports false.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use chartsync_core::domain::{
    Collection, DeadLetterRecord, DrainReport, PendingRecord, StoredCredential,
};
use chartsync_core::ports::RecordStore;

#[derive(Default)]
struct Inner {
    pending: HashMap<Collection, Vec<PendingRecord>>,
    credential: Option<StoredCredential>,
    guard: Option<(String, DateTime<Utc>)>,
    dead_letters: HashMap<Collection, Vec<DeadLetterRecord>>,
    reports: Vec<DrainReport>,
    registrations: Vec<String>,
}

/// In-memory record store used as the degraded-mode fallback
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    /// Creates an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    // --- Pending record operations ---

    async fn put(&self, record: &PendingRecord) -> anyhow::Result<()> {
        let mut inner = self.locked()?;
        let records = inner.pending.entry(record.collection()).or_default();
        // Replace-then-append keeps the same one-record-per-id invariant
        // as the SQLite upsert.
        records.retain(|r| r.id() != record.id());
        records.push(record.clone());
        Ok(())
    }

    async fn get(
        &self,
        collection: Collection,
        id: &str,
    ) -> anyhow::Result<Option<PendingRecord>> {
        let inner = self.locked()?;
        Ok(inner
            .pending
            .get(&collection)
            .and_then(|records| records.iter().find(|r| r.id() == id))
            .cloned())
    }

    async fn get_all(&self, collection: Collection) -> anyhow::Result<Vec<PendingRecord>> {
        let inner = self.locked()?;
        let mut records = inner.pending.get(&collection).cloned().unwrap_or_default();
        // Same ordering contract as the SQLite store.
        records.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(records)
    }

    async fn delete(&self, collection: Collection, id: &str) -> anyhow::Result<()> {
        let mut inner = self.locked()?;
        if let Some(records) = inner.pending.get_mut(&collection) {
            records.retain(|r| r.id() != id);
        }
        Ok(())
    }

    async fn count(&self, collection: Collection) -> anyhow::Result<u64> {
        let inner = self.locked()?;
        Ok(inner
            .pending
            .get(&collection)
            .map(|records| records.len() as u64)
            .unwrap_or(0))
    }

    async fn record_attempts(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> anyhow::Result<()> {
        let mut inner = self.locked()?;
        if let Some(records) = inner.pending.get_mut(&collection) {
            for record in records.iter_mut() {
                if ids.iter().any(|id| id == record.id()) {
                    record.record_attempt();
                }
            }
        }
        Ok(())
    }

    // --- Credential slot operations ---

    async fn save_credential(&self, credential: &StoredCredential) -> anyhow::Result<()> {
        self.locked()?.credential = Some(credential.clone());
        Ok(())
    }

    async fn get_credential(&self) -> anyhow::Result<Option<StoredCredential>> {
        Ok(self.locked()?.credential.clone())
    }

    async fn clear_credential(&self) -> anyhow::Result<()> {
        self.locked()?.credential = None;
        Ok(())
    }

    // --- Single-flight drain guard ---

    async fn try_acquire_drain_guard(
        &self,
        holder: &str,
        ttl: Duration,
    ) -> anyhow::Result<bool> {
        let mut inner = self.locked()?;
        let now = Utc::now();

        let takeable = match &inner.guard {
            None => true,
            Some((owner, acquired_at)) => owner == holder || now - *acquired_at > ttl,
        };

        if takeable {
            inner.guard = Some((holder.to_string(), now));
        }
        Ok(takeable)
    }

    async fn release_drain_guard(&self, holder: &str) -> anyhow::Result<()> {
        let mut inner = self.locked()?;
        if matches!(&inner.guard, Some((owner, _)) if owner == holder) {
            inner.guard = None;
        }
        Ok(())
    }

    // --- Dead-letter collection ---

    async fn add_dead_letter(&self, record: &DeadLetterRecord) -> anyhow::Result<()> {
        let mut inner = self.locked()?;
        let records = inner.dead_letters.entry(record.collection()).or_default();
        records.retain(|r| r.id() != record.id());
        records.push(record.clone());
        Ok(())
    }

    async fn dead_letters(
        &self,
        collection: Collection,
    ) -> anyhow::Result<Vec<DeadLetterRecord>> {
        let inner = self.locked()?;
        let mut records = inner
            .dead_letters
            .get(&collection)
            .cloned()
            .unwrap_or_default();
        records.sort_by(|a, b| b.dead_lettered_at().cmp(&a.dead_lettered_at()));
        Ok(records)
    }

    async fn take_dead_letter(
        &self,
        collection: Collection,
        id: &str,
    ) -> anyhow::Result<Option<DeadLetterRecord>> {
        let mut inner = self.locked()?;
        let Some(records) = inner.dead_letters.get_mut(&collection) else {
            return Ok(None);
        };
        match records.iter().position(|r| r.id() == id) {
            Some(index) => Ok(Some(records.remove(index))),
            None => Ok(None),
        }
    }

    // --- Drain report history ---

    async fn save_report(&self, report: &DrainReport) -> anyhow::Result<()> {
        let mut inner = self.locked()?;
        inner.reports.retain(|r| r.id() != report.id());
        inner.reports.push(report.clone());
        Ok(())
    }

    async fn recent_reports(&self, limit: u32) -> anyhow::Result<Vec<DrainReport>> {
        let inner = self.locked()?;
        let mut reports = inner.reports.clone();
        reports.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
        reports.truncate(limit as usize);
        Ok(reports)
    }

    // --- Registration tags ---

    async fn save_registration(&self, tag: &str) -> anyhow::Result<()> {
        let mut inner = self.locked()?;
        if !inner.registrations.iter().any(|t| t == tag) {
            inner.registrations.push(tag.to_string());
        }
        Ok(())
    }

    async fn registrations(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.locked()?.registrations.clone())
    }

    fn is_durable(&self) -> bool {
        false
    }
}
