//! Status command - show the local sync state at a glance
//!
//! Reports, per synced collection, how many records wait in the queue and
//! how many were dead-lettered, together with the credential cache state,
//! store registrations, and the most recent drain run.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use chartsync_core::config::Config;
use chartsync_core::domain::Collection;
use chartsync_core::ports::RecordStore;
use chartsync_store::{DatabasePool, SqliteRecordStore};
use chartsync_vault::CredentialVault;

use crate::commands::history::report_json;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format.is_json());
        let config = Config::load_or_default(config_path);

        if !config.store.path.exists() {
            formatter
                .error("No record store found. Run 'chartsync login' or start 'chartsyncd' first.");
            return Ok(());
        }

        let pool = DatabasePool::new(&config.store.path)
            .await
            .context("Failed to open the record store")?;
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.pool().clone()));

        info!(store = %config.store.path.display(), "Showing status");

        // A missing keystore degrades to "no cached credentials" with a
        // warning rather than failing the whole status report.
        let cached_email =
            match CredentialVault::open(store.clone(), &config.vault.keyring_service) {
                Ok(vault) => vault
                    .stored_credentials()
                    .await?
                    .map(|credentials| credentials.email.clone()),
                Err(e) => {
                    formatter.warn(&format!("Credential vault unavailable: {e}"));
                    None
                }
            };

        let mut rows = Vec::new();
        for collection in Collection::SYNCED {
            let pending = store.count(collection).await?;
            let dead = store.dead_letters(collection).await?.len() as u64;
            rows.push((collection, pending, dead));
        }

        let registrations = store.registrations().await?;
        let last_report = store.recent_reports(1).await?.into_iter().next();

        if format.is_json() {
            let queues = rows
                .iter()
                .map(|(collection, pending, dead)| {
                    serde_json::json!({
                        "collection": collection.as_str(),
                        "pending": pending,
                        "dead_lettered": dead,
                    })
                })
                .collect::<Vec<_>>();
            let json = serde_json::json!({
                "credentials_cached": cached_email.is_some(),
                "cached_email": cached_email,
                "queues": queues,
                "registrations": registrations,
                "last_drain": last_report.as_ref().map(report_json),
            });
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success("ChartSync status");
        formatter.info("");

        match &cached_email {
            Some(email) => formatter.info(&format!("Offline login: cached for {email}")),
            None => formatter.info("Offline login: no cached credentials"),
        }
        formatter.info("");

        formatter.info("Collection      Pending  Dead");
        formatter.info("--------------- -------- -----");
        for (collection, pending, dead) in &rows {
            formatter.info(&format!(
                "{:<15} {:<8} {}",
                collection.as_str(),
                pending,
                dead
            ));
        }

        if !registrations.is_empty() {
            formatter.info("");
            formatter.info(&format!("Registrations: {}", registrations.join(", ")));
        }

        formatter.info("");
        match &last_report {
            Some(report) => formatter.info(&format!(
                "Last drain: {} - {} {} ({} accepted, {} rejected)",
                report.started_at().format("%Y-%m-%d %H:%M:%S UTC"),
                report.collection(),
                report.outcome(),
                report.accepted(),
                report.rejected(),
            )),
            None => formatter.info("Last drain: never"),
        }

        Ok(())
    }
}
