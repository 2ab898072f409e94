//! Queue drain engine
//!
//! The [`DrainCoordinator`] pushes every synced collection's pending records
//! to the remote system of record and settles the queue from the response.
//!
//! ## Drain Flow
//!
//! 1. **Guard**: Acquire the persisted single-flight guard; skip if another
//!    context holds a fresh one
//! 2. **Batch** (per collection): Read the whole queue, short-circuit when
//!    empty, otherwise submit one batch request
//! 3. **Settle**: Delete accepted records, dead-letter rejected ones, leave
//!    the queue untouched after transient failures
//! 4. **Bookkeeping**: Persist a [`DrainReport`] per non-empty run, release
//!    the guard
//!
//! ## Retry Logic
//!
//! Transient failures (network, server 5xx) are retried with exponential
//! backoff: 1s, 2s, 4s, 8s, 16s (max 5 retries). Every failed attempt
//! increments the batched records' attempt counts. Rejections (4xx) are
//! never retried; the affected records move to the dead-letter collection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use chartsync_core::config::Config;
use chartsync_core::domain::{
    Collection, DeadLetterRecord, DrainReport, PendingRecord, SyncFailure,
};
use chartsync_core::ports::{BatchAck, RecordStore, SyncTransport};

// ============================================================================
// DrainSummary
// ============================================================================

/// Summary of one full drain run across every synced collection
#[derive(Debug, Clone)]
pub struct DrainSummary {
    /// Per-collection reports, in drain order
    pub reports: Vec<DrainReport>,
    /// Whether the run was skipped because another context held the guard
    pub skipped: bool,
    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,
}

impl DrainSummary {
    fn skipped_run(duration: Duration) -> Self {
        Self {
            reports: Vec::new(),
            skipped: true,
            duration_ms: duration.as_millis() as u64,
        }
    }

    fn from_reports(reports: Vec<DrainReport>, duration: Duration) -> Self {
        Self {
            reports,
            skipped: false,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Records read from the queues at the start of the run
    pub fn total_attempted(&self) -> u64 {
        self.reports.iter().map(|r| r.attempted()).sum()
    }

    /// Records the remote acknowledged
    pub fn total_accepted(&self) -> u64 {
        self.reports.iter().map(|r| r.accepted()).sum()
    }

    /// Records moved to the dead-letter collection
    pub fn total_rejected(&self) -> u64 {
        self.reports.iter().map(|r| r.rejected()).sum()
    }

    /// Reports whose run failed transiently
    pub fn failures(&self) -> Vec<&DrainReport> {
        self.reports
            .iter()
            .filter(|r| r.outcome().is_failed())
            .collect()
    }

    /// Returns true if nothing failed and nothing was skipped
    pub fn is_clean(&self) -> bool {
        !self.skipped && self.failures().is_empty()
    }
}

// ============================================================================
// Retry logic
// ============================================================================

/// Maximum number of retries for transient failures
const MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff (1 second)
const BASE_DELAY_SECS: u64 = 1;

/// Backoff delay before the retry following the given attempt
///
/// Schedule: 1s, 2s, 4s, 8s, 16s
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(BASE_DELAY_SECS * 2u64.pow(attempt))
}

// ============================================================================
// DrainCoordinator
// ============================================================================

/// Pushes queued records to the remote and settles the queue from the acks
///
/// ## Dependencies
///
/// - `store`: Pending queue, dead letters, drain guard, and report history
/// - `transport`: Batch submission to the remote sync endpoints
///
/// One coordinator is shared by everything in a process that can drain; the
/// cross-process single-flight property comes from the persisted guard, not
/// from this struct.
pub struct DrainCoordinator {
    /// Local persistence for queues and drain bookkeeping
    store: Arc<dyn RecordStore>,
    /// Remote sync endpoint
    transport: Arc<dyn SyncTransport>,
    /// Age past which another context's guard is considered abandoned
    guard_ttl: chrono::Duration,
}

impl DrainCoordinator {
    /// Creates a new `DrainCoordinator` with the given dependencies
    ///
    /// # Arguments
    /// * `store` - Record store (queues, guard, dead letters, reports)
    /// * `transport` - Remote sync transport
    /// * `config` - Application configuration for the guard freshness timeout
    pub fn new(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn SyncTransport>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            transport,
            guard_ttl: chrono::Duration::seconds(config.sync.drain_guard_ttl as i64),
        }
    }

    // ========================================================================
    // DrainCoordinator::drain_all()
    // ========================================================================

    /// Drains every synced collection once
    ///
    /// 1. Acquires the single-flight drain guard (skips the run if another
    ///    context holds a fresh one)
    /// 2. Drains patients, lab results, and invoices in that order
    /// 3. Releases the guard
    ///
    /// A transient failure in one collection does not stop the others; each
    /// collection gets its own report and the summary aggregates them.
    ///
    /// # Arguments
    /// * `context` - Tag naming the execution context ("agent", "cli")
    ///
    /// # Errors
    /// Returns an error only when the store itself cannot answer guard
    /// queries; per-collection failures are recorded in the summary instead.
    #[tracing::instrument(skip(self))]
    pub async fn drain_all(&self, context: &str) -> Result<DrainSummary> {
        let start = std::time::Instant::now();

        let acquired = self
            .store
            .try_acquire_drain_guard(context, self.guard_ttl)
            .await
            .context("Failed to query the drain guard")?;

        if !acquired {
            info!(context, "Drain guard held elsewhere, skipping run");
            return Ok(DrainSummary::skipped_run(start.elapsed()));
        }

        let mut reports = Vec::new();
        for collection in Collection::SYNCED {
            match self.drain_collection(collection, context).await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(
                        collection = %collection,
                        error = %format!("{err:#}"),
                        "Drain pass aborted by a store failure"
                    );
                }
            }
        }

        if let Err(err) = self.store.release_drain_guard(context).await {
            warn!(context, error = %err, "Failed to release the drain guard");
        }

        let summary = DrainSummary::from_reports(reports, start.elapsed());
        info!(
            context,
            attempted = summary.total_attempted(),
            accepted = summary.total_accepted(),
            rejected = summary.total_rejected(),
            failures = summary.failures().len(),
            duration_ms = summary.duration_ms,
            "Drain run finished"
        );

        Ok(summary)
    }

    // ========================================================================
    // Per-collection drain pass
    // ========================================================================

    /// Drains one collection's queue
    ///
    /// Reads the whole queue up front; an empty queue finishes immediately
    /// without touching the network. Non-empty runs persist their report in
    /// both the Running and the final state so an interrupted run stays
    /// visible in the history.
    async fn drain_collection(
        &self,
        collection: Collection,
        context: &str,
    ) -> Result<DrainReport> {
        let mut report = DrainReport::begin(collection, context);

        let records = self
            .store
            .get_all(collection)
            .await
            .with_context(|| format!("Failed to read the {collection} queue"))?;

        if records.is_empty() {
            debug!(collection = %collection, "Queue empty, nothing to drain");
            report.finish(0, 0);
            return Ok(report);
        }

        report.set_attempted(records.len() as u64);
        self.store
            .save_report(&report)
            .await
            .context("Failed to persist the drain report")?;

        info!(
            collection = %collection,
            records = records.len(),
            "Draining queue"
        );

        match self.push_with_retry(collection, &records).await {
            Ok(ack) => {
                let (accepted, rejected) = self.settle_ack(collection, records, &ack).await?;
                report.finish(accepted, rejected);
            }
            Err(SyncFailure::RemoteRejected { status, reason }) => {
                // The remote refused the batch as a whole; every record in
                // it is poisoned until an operator intervenes.
                let count = records.len() as u64;
                let reason = format!("batch rejected (status {status}): {reason}");
                warn!(
                    collection = %collection,
                    records = count,
                    reason = %reason,
                    "Dead-lettering entire batch"
                );
                for record in records {
                    self.dead_letter(record, &reason).await?;
                }
                report.finish(0, count);
            }
            Err(failure) => {
                warn!(
                    collection = %collection,
                    error = %failure,
                    "Drain failed, queue left untouched"
                );
                report.fail(failure.to_string());
            }
        }

        self.store
            .save_report(&report)
            .await
            .context("Failed to persist the drain report")?;

        Ok(report)
    }

    /// Submits one batch, retrying transient failures with backoff
    ///
    /// Every failed attempt increments the batched records' attempt counts
    /// so the queue records how often each record has been tried.
    async fn push_with_retry(
        &self,
        collection: Collection,
        records: &[PendingRecord],
    ) -> Result<BatchAck, SyncFailure> {
        let ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();

        for attempt in 0..=MAX_RETRIES {
            match self.transport.push_batch(collection, records).await {
                Ok(ack) => {
                    if attempt > 0 {
                        info!(
                            collection = %collection,
                            attempt,
                            "Batch push succeeded after retry"
                        );
                    }
                    return Ok(ack);
                }
                Err(failure) if failure.is_retryable() => {
                    if let Err(err) = self.store.record_attempts(collection, &ids).await {
                        warn!(collection = %collection, error = %err, "Failed to record attempt counts");
                    }
                    if attempt == MAX_RETRIES {
                        return Err(failure);
                    }
                    let delay = backoff_delay(attempt);
                    warn!(
                        collection = %collection,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %failure,
                        "Transient failure, retrying batch push"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(failure),
            }
        }

        // The loop always returns from its last iteration
        Err(SyncFailure::NetworkUnavailable(format!(
            "retries exhausted for {collection}"
        )))
    }

    /// Applies a per-record acknowledgment to the queue
    ///
    /// Accepted records are deleted, rejected records are dead-lettered,
    /// and records the ack never mentions stay queued with their attempt
    /// count bumped.
    async fn settle_ack(
        &self,
        collection: Collection,
        records: Vec<PendingRecord>,
        ack: &BatchAck,
    ) -> Result<(u64, u64)> {
        let mentioned: HashSet<&str> = ack
            .accepted
            .iter()
            .map(String::as_str)
            .chain(ack.rejected.iter().map(|r| r.id.as_str()))
            .collect();

        let unmentioned: Vec<String> = records
            .iter()
            .filter(|r| !mentioned.contains(r.id()))
            .map(|r| r.id().to_string())
            .collect();

        let mut accepted: u64 = 0;
        for id in &ack.accepted {
            self.store
                .delete(collection, id)
                .await
                .with_context(|| format!("Failed to delete acknowledged record {id}"))?;
            accepted += 1;
        }

        let mut rejected: u64 = 0;
        for rejection in &ack.rejected {
            let Some(record) = records.iter().find(|r| r.id() == rejection.id) else {
                warn!(
                    collection = %collection,
                    id = %rejection.id,
                    "Remote rejected a record that was not in the batch"
                );
                continue;
            };
            let reason = if rejection.reason.is_empty() {
                "rejected by remote".to_string()
            } else {
                rejection.reason.clone()
            };
            self.dead_letter(record.clone(), &reason).await?;
            rejected += 1;
        }

        if !unmentioned.is_empty() {
            warn!(
                collection = %collection,
                count = unmentioned.len(),
                "Acknowledgment left records unmentioned, keeping them queued"
            );
            self.store
                .record_attempts(collection, &unmentioned)
                .await
                .context("Failed to record attempt counts")?;
        }

        Ok((accepted, rejected))
    }

    /// Moves one record from the live queue to the dead-letter collection
    async fn dead_letter(&self, record: PendingRecord, reason: &str) -> Result<()> {
        let collection = record.collection();
        let id = record.id().to_string();
        debug!(collection = %collection, id = %id, reason, "Dead-lettering record");

        let dead = DeadLetterRecord::from_pending(record, reason);
        self.store
            .add_dead_letter(&dead)
            .await
            .with_context(|| format!("Failed to dead-letter record {id}"))?;
        self.store
            .delete(collection, &id)
            .await
            .with_context(|| format!("Failed to remove dead-lettered record {id} from the queue"))
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use serde_json::json;

    use chartsync_core::ports::RejectedRecord;
    use chartsync_store::MemoryRecordStore;

    /// Scripted transport double: replies are consumed front to back, and
    /// an exhausted script acknowledges whole batches.
    enum Reply {
        WholeBatch,
        Ack(Vec<&'static str>, Vec<(&'static str, &'static str)>),
        NetworkError,
        ServerError(u16),
        Rejected(u16, &'static str),
    }

    struct ScriptedTransport {
        script: Mutex<VecDeque<Reply>>,
        log: Mutex<Vec<(Collection, Vec<String>)>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Reply>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                log: Mutex::new(Vec::new()),
            }
        }

        fn acking() -> Self {
            Self::new(Vec::new())
        }

        fn calls(&self) -> Vec<(Collection, Vec<String>)> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SyncTransport for ScriptedTransport {
        async fn push_batch(
            &self,
            collection: Collection,
            records: &[PendingRecord],
        ) -> Result<BatchAck, SyncFailure> {
            self.log.lock().unwrap().push((
                collection,
                records.iter().map(|r| r.id().to_string()).collect(),
            ));

            let reply = self.script.lock().unwrap().pop_front();
            match reply {
                None | Some(Reply::WholeBatch) => Ok(BatchAck::whole_batch(records)),
                Some(Reply::Ack(accepted, rejected)) => Ok(BatchAck {
                    accepted: accepted.iter().map(|s| s.to_string()).collect(),
                    rejected: rejected
                        .iter()
                        .map(|(id, reason)| RejectedRecord {
                            id: id.to_string(),
                            reason: reason.to_string(),
                        })
                        .collect(),
                }),
                Some(Reply::NetworkError) => Err(SyncFailure::NetworkUnavailable(
                    "connection refused".to_string(),
                )),
                Some(Reply::ServerError(status)) => {
                    Err(SyncFailure::RemoteServerError { status })
                }
                Some(Reply::Rejected(status, reason)) => Err(SyncFailure::RemoteRejected {
                    status,
                    reason: reason.to_string(),
                }),
            }
        }
    }

    fn coordinator(
        transport: ScriptedTransport,
    ) -> (DrainCoordinator, Arc<MemoryRecordStore>, Arc<ScriptedTransport>) {
        let store = Arc::new(MemoryRecordStore::new());
        let transport = Arc::new(transport);
        let coordinator = DrainCoordinator::new(
            store.clone(),
            transport.clone(),
            &Config::default(),
        );
        (coordinator, store, transport)
    }

    async fn queue_patient(store: &MemoryRecordStore, id: &str) {
        let record = PendingRecord::new(Collection::Patients, id, json!({ "id": id })).unwrap();
        store.put(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_pushes_whole_queue_in_one_call() {
        let (coordinator, store, transport) = coordinator(ScriptedTransport::acking());
        queue_patient(&store, "p-1").await;
        queue_patient(&store, "p-2").await;
        queue_patient(&store, "p-3").await;

        let summary = coordinator.drain_all("agent").await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1, "three records should go out as one batch");
        assert_eq!(calls[0].0, Collection::Patients);
        assert_eq!(calls[0].1, vec!["p-1", "p-2", "p-3"]);

        assert_eq!(store.count(Collection::Patients).await.unwrap(), 0);
        assert_eq!(summary.total_accepted(), 3);
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn test_empty_queues_make_zero_network_calls() {
        let (coordinator, store, transport) = coordinator(ScriptedTransport::acking());

        let summary = coordinator.drain_all("agent").await.unwrap();

        assert!(transport.calls().is_empty());
        assert_eq!(summary.total_attempted(), 0);
        assert!(summary.is_clean());
        // Empty passes are not worth a history entry
        assert!(store.recent_reports(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_each_collection_gets_its_own_batch() {
        let (coordinator, store, transport) = coordinator(ScriptedTransport::acking());
        queue_patient(&store, "p-1").await;
        queue_patient(&store, "p-2").await;
        let invoice =
            PendingRecord::new(Collection::Invoices, "inv-1", json!({ "total": 120 })).unwrap();
        store.put(&invoice).await.unwrap();

        let summary = coordinator.drain_all("agent").await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 2, "lab results queue is empty");
        assert_eq!(calls[0].0, Collection::Patients);
        assert_eq!(calls[1].0, Collection::Invoices);
        assert_eq!(summary.total_accepted(), 3);
        assert_eq!(summary.reports.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_leaves_queue_untouched() {
        let script = vec![
            Reply::NetworkError,
            Reply::NetworkError,
            Reply::ServerError(503),
            Reply::NetworkError,
            Reply::ServerError(500),
            Reply::NetworkError,
        ];
        let (coordinator, store, transport) = coordinator(ScriptedTransport::new(script));
        queue_patient(&store, "p-1").await;
        queue_patient(&store, "p-2").await;

        let summary = coordinator.drain_all("agent").await.unwrap();

        assert_eq!(transport.calls().len(), (MAX_RETRIES + 1) as usize);
        assert_eq!(store.count(Collection::Patients).await.unwrap(), 2);
        assert_eq!(summary.total_accepted(), 0);
        assert_eq!(summary.failures().len(), 1);

        // Every failed attempt is recorded on the queued records
        let record = store.get(Collection::Patients, "p-1").await.unwrap().unwrap();
        assert_eq!(record.attempt_count(), MAX_RETRIES + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_within_the_run() {
        let script = vec![Reply::NetworkError, Reply::WholeBatch];
        let (coordinator, store, transport) = coordinator(ScriptedTransport::new(script));
        queue_patient(&store, "p-1").await;

        let summary = coordinator.drain_all("agent").await.unwrap();

        assert_eq!(transport.calls().len(), 2);
        assert_eq!(store.count(Collection::Patients).await.unwrap(), 0);
        assert_eq!(summary.total_accepted(), 1);
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn test_whole_batch_rejection_dead_letters_everything() {
        let script = vec![Reply::Rejected(422, "schema mismatch")];
        let (coordinator, store, transport) = coordinator(ScriptedTransport::new(script));
        queue_patient(&store, "p-1").await;
        queue_patient(&store, "p-2").await;

        let summary = coordinator.drain_all("agent").await.unwrap();

        assert_eq!(transport.calls().len(), 1, "rejections are not retried");
        assert_eq!(store.count(Collection::Patients).await.unwrap(), 0);

        let dead = store.dead_letters(Collection::Patients).await.unwrap();
        assert_eq!(dead.len(), 2);
        assert!(dead[0].reason().contains("422"));
        assert!(dead[0].reason().contains("schema mismatch"));

        assert_eq!(summary.total_rejected(), 2);
        assert_eq!(summary.total_accepted(), 0);
    }

    #[tokio::test]
    async fn test_per_record_rejection_dead_letters_only_the_rejected() {
        let script = vec![Reply::Ack(vec!["p-1"], vec![("p-2", "unknown practitioner")])];
        let (coordinator, store, _) = coordinator(ScriptedTransport::new(script));
        queue_patient(&store, "p-1").await;
        queue_patient(&store, "p-2").await;

        let summary = coordinator.drain_all("agent").await.unwrap();

        assert_eq!(store.count(Collection::Patients).await.unwrap(), 0);
        let dead = store.dead_letters(Collection::Patients).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id(), "p-2");
        assert_eq!(dead[0].reason(), "unknown practitioner");

        assert_eq!(summary.total_accepted(), 1);
        assert_eq!(summary.total_rejected(), 1);
    }

    #[tokio::test]
    async fn test_unmentioned_records_stay_queued() {
        let script = vec![Reply::Ack(vec!["p-1"], vec![])];
        let (coordinator, store, _) = coordinator(ScriptedTransport::new(script));
        queue_patient(&store, "p-1").await;
        queue_patient(&store, "p-2").await;

        let summary = coordinator.drain_all("agent").await.unwrap();

        assert_eq!(store.count(Collection::Patients).await.unwrap(), 1);
        let leftover = store.get(Collection::Patients, "p-2").await.unwrap().unwrap();
        assert_eq!(leftover.attempt_count(), 1);
        assert_eq!(summary.total_accepted(), 1);
    }

    #[tokio::test]
    async fn test_guard_contention_skips_without_network_calls() {
        let (coordinator, store, transport) = coordinator(ScriptedTransport::acking());
        queue_patient(&store, "p-1").await;

        let held = store
            .try_acquire_drain_guard("other-context", chrono::Duration::seconds(120))
            .await
            .unwrap();
        assert!(held);

        let summary = coordinator.drain_all("agent").await.unwrap();

        assert!(summary.skipped);
        assert!(transport.calls().is_empty());
        assert_eq!(store.count(Collection::Patients).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_guard_is_released_for_the_next_run() {
        let (coordinator, store, transport) = coordinator(ScriptedTransport::acking());
        queue_patient(&store, "p-1").await;

        let first = coordinator.drain_all("agent").await.unwrap();
        assert!(!first.skipped);

        queue_patient(&store, "p-2").await;
        let second = coordinator.drain_all("cli").await.unwrap();
        assert!(!second.skipped);
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_run_is_visible_in_report_history() {
        let script = vec![Reply::Rejected(400, "bad payload")];
        let (coordinator, store, _) = coordinator(ScriptedTransport::new(script));
        queue_patient(&store, "p-1").await;

        coordinator.drain_all("agent").await.unwrap();

        let reports = store.recent_reports(10).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].collection(), Collection::Patients);
        assert_eq!(reports[0].attempted(), 1);
        assert_eq!(reports[0].rejected(), 1);
        assert!(reports[0].finished_at().is_some());
    }

    #[test]
    fn test_backoff_delay_doubles() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(4), Duration::from_secs(16));
    }

    #[test]
    fn test_summary_aggregates_reports() {
        let mut completed = DrainReport::begin(Collection::Patients, "agent");
        completed.set_attempted(3);
        completed.finish(3, 0);

        let mut partial = DrainReport::begin(Collection::Invoices, "agent");
        partial.set_attempted(2);
        partial.finish(1, 1);

        let summary =
            DrainSummary::from_reports(vec![completed, partial], Duration::from_millis(5));

        assert_eq!(summary.total_attempted(), 5);
        assert_eq!(summary.total_accepted(), 4);
        assert_eq!(summary.total_rejected(), 1);
        assert!(summary.is_clean());
        assert!(!summary.skipped);
    }
}
