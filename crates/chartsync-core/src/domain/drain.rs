//! Drain report entity
//!
//! This module defines the DrainReport entity which tracks the outcome of
//! one drain run for one collection. Reports are persisted in the store so
//! both execution contexts and the CLI can see what the last run did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::collection::Collection;

/// Outcome of a drain run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Run is currently in progress
    Running,
    /// Every batched record was acknowledged
    Completed,
    /// Some records were accepted and the rest were dead-lettered
    Partial,
    /// A transient failure left the queue untouched
    Failed(String),
}

impl DrainOutcome {
    /// Returns true if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self, DrainOutcome::Running)
    }

    /// Returns true if the run finished without losing the queue to a
    /// transient failure
    pub fn is_success(&self) -> bool {
        matches!(self, DrainOutcome::Completed | DrainOutcome::Partial)
    }

    /// Returns true if the run failed transiently
    pub fn is_failed(&self) -> bool {
        matches!(self, DrainOutcome::Failed(_))
    }
}

impl std::fmt::Display for DrainOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainOutcome::Running => write!(f, "running"),
            DrainOutcome::Completed => write!(f, "completed"),
            DrainOutcome::Partial => write!(f, "partial"),
            DrainOutcome::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Record of one drain run for one collection
///
/// Tracks how many records the run read from the queue, how many the remote
/// accepted, and how many were dead-lettered. An empty queue produces a
/// Completed report with zero counts and no network call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Unique identifier for this run
    id: Uuid,
    /// Collection that was drained
    collection: Collection,
    /// Execution context that ran the drain ("agent", "cli")
    context: String,
    /// When the run started
    started_at: DateTime<Utc>,
    /// When the run finished (None while running)
    finished_at: Option<DateTime<Utc>>,
    /// Records read from the queue at the start of the run
    attempted: u64,
    /// Records the remote acknowledged
    accepted: u64,
    /// Records moved to the dead-letter collection
    rejected: u64,
    /// Final outcome
    outcome: DrainOutcome,
}

impl DrainReport {
    /// Starts a new report for a drain run
    pub fn begin(collection: Collection, context: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection,
            context: context.into(),
            started_at: Utc::now(),
            finished_at: None,
            attempted: 0,
            accepted: 0,
            rejected: 0,
            outcome: DrainOutcome::Running,
        }
    }

    /// Reconstitutes a report from storage
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        collection: Collection,
        context: String,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        attempted: u64,
        accepted: u64,
        rejected: u64,
        outcome: DrainOutcome,
    ) -> Self {
        Self {
            id,
            collection,
            context,
            started_at,
            finished_at,
            attempted,
            accepted,
            rejected,
            outcome,
        }
    }

    // --- Getters ---

    /// Returns the run's unique identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the drained collection
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Returns the context tag that ran the drain
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Returns when the run started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns when the run finished, if it has
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Returns how many records the run read from the queue
    pub fn attempted(&self) -> u64 {
        self.attempted
    }

    /// Returns how many records the remote acknowledged
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Returns how many records were dead-lettered
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Returns the final outcome
    pub fn outcome(&self) -> &DrainOutcome {
        &self.outcome
    }

    /// Returns the run duration so far, or total once finished
    pub fn duration(&self) -> chrono::Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        end - self.started_at
    }

    // --- Mutators ---

    /// Sets how many records were read from the queue
    pub fn set_attempted(&mut self, attempted: u64) {
        self.attempted = attempted;
    }

    /// Finishes the run with acknowledgment counts
    ///
    /// The outcome is Completed when nothing was rejected, Partial otherwise.
    pub fn finish(&mut self, accepted: u64, rejected: u64) {
        self.accepted = accepted;
        self.rejected = rejected;
        self.outcome = if rejected == 0 {
            DrainOutcome::Completed
        } else {
            DrainOutcome::Partial
        };
        self.finished_at = Some(Utc::now());
    }

    /// Finishes the run after a transient failure; the queue is untouched
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.outcome = DrainOutcome::Failed(reason.into());
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> DrainReport {
        DrainReport::begin(Collection::Patients, "agent")
    }

    mod outcome_tests {
        use super::*;

        #[test]
        fn test_is_running() {
            assert!(DrainOutcome::Running.is_running());
            assert!(!DrainOutcome::Completed.is_running());
        }

        #[test]
        fn test_is_success() {
            assert!(DrainOutcome::Completed.is_success());
            assert!(DrainOutcome::Partial.is_success());
            assert!(!DrainOutcome::Failed("x".to_string()).is_success());
            assert!(!DrainOutcome::Running.is_success());
        }

        #[test]
        fn test_display() {
            assert_eq!(DrainOutcome::Running.to_string(), "running");
            assert_eq!(DrainOutcome::Completed.to_string(), "completed");
            assert_eq!(DrainOutcome::Partial.to_string(), "partial");
            assert_eq!(
                DrainOutcome::Failed("timeout".to_string()).to_string(),
                "failed: timeout"
            );
        }

        #[test]
        fn test_serialization() {
            let json = serde_json::to_string(&DrainOutcome::Completed).unwrap();
            assert_eq!(json, "\"completed\"");

            let json = serde_json::to_string(&DrainOutcome::Failed("x".to_string())).unwrap();
            assert_eq!(json, "{\"failed\":\"x\"}");
        }
    }

    mod report_tests {
        use super::*;

        #[test]
        fn begin_starts_running_with_zero_counts() {
            let report = report();
            assert!(report.outcome().is_running());
            assert_eq!(report.attempted(), 0);
            assert_eq!(report.accepted(), 0);
            assert_eq!(report.rejected(), 0);
            assert!(report.finished_at().is_none());
            assert_eq!(report.context(), "agent");
        }

        #[test]
        fn finish_with_no_rejections_is_completed() {
            let mut report = report();
            report.set_attempted(3);
            report.finish(3, 0);

            assert_eq!(*report.outcome(), DrainOutcome::Completed);
            assert_eq!(report.accepted(), 3);
            assert!(report.finished_at().is_some());
        }

        #[test]
        fn finish_with_rejections_is_partial() {
            let mut report = report();
            report.set_attempted(3);
            report.finish(2, 1);

            assert_eq!(*report.outcome(), DrainOutcome::Partial);
            assert_eq!(report.rejected(), 1);
        }

        #[test]
        fn fail_records_reason() {
            let mut report = report();
            report.fail("connection refused");

            assert!(report.outcome().is_failed());
            assert!(matches!(
                report.outcome(),
                DrainOutcome::Failed(msg) if msg == "connection refused"
            ));
            assert!(report.finished_at().is_some());
        }

        #[test]
        fn duration_is_non_negative() {
            let report = report();
            assert!(report.duration() >= chrono::Duration::zero());
        }

        #[test]
        fn serialization_roundtrip() {
            let mut report = report();
            report.set_attempted(5);
            report.finish(4, 1);

            let json = serde_json::to_string(&report).unwrap();
            let back: DrainReport = serde_json::from_str(&json).unwrap();
            assert_eq!(back, report);
        }
    }
}
