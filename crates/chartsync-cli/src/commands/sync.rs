//! Sync command - drain the pending queues to the records server
//!
//! Runs a full drain in-process by default: every synced collection is
//! read, batched, and submitted, with per-record acknowledgments applied
//! to the queue. With `--via-agent` the running chartsyncd instance is
//! asked to drain instead, sharing the agent's pause state and schedule.
//! Either way the persisted drain guard keeps the two contexts from
//! submitting the same batch twice.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use chartsync_core::config::Config;
use chartsync_core::ports::RecordStore;
use chartsync_engine::{DrainCoordinator, DrainSummary};
use chartsync_ipc::{AgentClient, IpcError};
use chartsync_net::HttpSyncTransport;
use chartsync_store::{DatabasePool, SqliteRecordStore};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Context tag recorded on drain reports started by the CLI
const DRAIN_CONTEXT: &str = "cli";

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Ask the running agent to drain instead of draining in-process
    #[arg(long)]
    pub via_agent: bool,
}

impl SyncCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format.is_json());

        if self.via_agent {
            return match AgentClient::connect().await {
                Ok(client) => {
                    client.trigger_drain().await?;
                    formatter.success("Drain requested from the agent");
                    Ok(())
                }
                Err(IpcError::AgentNotRunning) => {
                    formatter.error(
                        "The ChartSync agent is not running. Start it with 'chartsyncd', \
                         or drop --via-agent to drain in-process.",
                    );
                    Ok(())
                }
                Err(e) => Err(e.into()),
            };
        }

        let config = Config::load_or_default(config_path);

        if let Some(parent) = config.store.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create the data directory")?;
        }
        let pool = DatabasePool::new(&config.store.path)
            .await
            .context("Failed to open the record store")?;
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.pool().clone()));

        let mut transport = HttpSyncTransport::new(&config.sync.server_url)?;
        if let Some(token) = &config.sync.bearer_token {
            transport = transport.with_bearer_token(token);
        }

        info!(server = %config.sync.server_url, "Draining from the CLI");

        let coordinator = DrainCoordinator::new(store, Arc::new(transport), &config);
        let summary = coordinator.drain_all(DRAIN_CONTEXT).await?;

        display_summary(&summary, format, &*formatter);
        Ok(())
    }
}

fn display_summary(summary: &DrainSummary, format: OutputFormat, formatter: &dyn OutputFormatter) {
    if format.is_json() {
        let collections = summary
            .reports
            .iter()
            .map(|report| {
                serde_json::json!({
                    "collection": report.collection().as_str(),
                    "outcome": report.outcome().to_string(),
                    "attempted": report.attempted(),
                    "accepted": report.accepted(),
                    "rejected": report.rejected(),
                })
            })
            .collect::<Vec<_>>();
        formatter.print_json(&serde_json::json!({
            "skipped": summary.skipped,
            "duration_ms": summary.duration_ms,
            "attempted": summary.total_attempted(),
            "accepted": summary.total_accepted(),
            "rejected": summary.total_rejected(),
            "collections": collections,
        }));
        return;
    }

    if summary.skipped {
        formatter.info("Another drain is already in flight; nothing submitted.");
        return;
    }

    if summary.total_attempted() == 0 && summary.failures().is_empty() {
        formatter.success("Already up to date");
        return;
    }

    let duration_display = if summary.duration_ms >= 1000 {
        format!("{:.1}s", summary.duration_ms as f64 / 1000.0)
    } else {
        format!("{}ms", summary.duration_ms)
    };

    if summary.failures().is_empty() {
        formatter.success(&format!("Drain completed in {duration_display}"));
    } else {
        formatter.warn(&format!(
            "Drain finished with {} failed collection(s) in {duration_display}",
            summary.failures().len()
        ));
    }

    for report in &summary.reports {
        if report.attempted() == 0 && !report.outcome().is_failed() {
            continue;
        }
        formatter.info(&format!(
            "{:<15} {} sent, {} accepted, {} rejected ({})",
            report.collection().as_str(),
            report.attempted(),
            report.accepted(),
            report.rejected(),
            report.outcome(),
        ));
    }

    if summary.total_rejected() > 0 {
        formatter.info("");
        formatter.info(
            "Rejected records moved to the dead-letter queue; see 'chartsync queue list --dead'.",
        );
    }
}
