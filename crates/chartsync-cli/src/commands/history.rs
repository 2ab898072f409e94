//! History command - show recent drain runs

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use chartsync_core::config::Config;
use chartsync_core::domain::DrainReport;
use chartsync_core::ports::RecordStore;
use chartsync_store::{DatabasePool, SqliteRecordStore};

use crate::output::{get_formatter, OutputFormat};

/// Show the most recent drain runs
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Maximum number of runs to show
    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

impl HistoryCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format.is_json());
        let config = Config::load_or_default(config_path);

        if !config.store.path.exists() {
            formatter.error("No record store found. Nothing has drained yet.");
            return Ok(());
        }

        let pool = DatabasePool::new(&config.store.path)
            .await
            .context("Failed to open the record store")?;
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.pool().clone()));

        let reports = store.recent_reports(self.limit).await?;

        if format.is_json() {
            let runs: Vec<serde_json::Value> = reports.iter().map(report_json).collect();
            formatter.print_json(&serde_json::json!({ "runs": runs }));
            return Ok(());
        }

        if reports.is_empty() {
            formatter.success("No drain runs recorded yet");
            return Ok(());
        }

        formatter.success(&format!("Last {} drain run(s)", reports.len()));
        formatter.info("");
        formatter.info(
            "Started (UTC)        Collection      Context  Sent  Acc  Rej  Outcome",
        );
        for report in &reports {
            formatter.info(&format!(
                "{} {:<15} {:<8} {:<5} {:<4} {:<4} {} [{}]",
                report.started_at().format("%Y-%m-%d %H:%M:%S"),
                report.collection().as_str(),
                report.context(),
                report.attempted(),
                report.accepted(),
                report.rejected(),
                report.outcome(),
                format_duration(report.duration().num_milliseconds()),
            ));
        }
        Ok(())
    }
}

/// Renders one drain report as JSON, shared with the status command
pub(crate) fn report_json(report: &DrainReport) -> serde_json::Value {
    serde_json::json!({
        "id": report.id().to_string(),
        "collection": report.collection().as_str(),
        "context": report.context(),
        "outcome": report.outcome().to_string(),
        "attempted": report.attempted(),
        "accepted": report.accepted(),
        "rejected": report.rejected(),
        "started_at": report.started_at().to_rfc3339(),
        "finished_at": report.finished_at().map(|at| at.to_rfc3339()),
    })
}

fn format_duration(ms: i64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}
