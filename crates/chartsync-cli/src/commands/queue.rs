//! Queue commands - feed and inspect the pending record queues
//!
//! `queue add` enqueues a record mutation exactly as the client
//! application would, which makes it the CLI path for exercising the
//! drain pipeline end to end. `queue list` shows what waits in a queue,
//! and `--dead` switches to the dead-letter view. The top-level `redrive`
//! command moves a dead-lettered record back into its pending queue.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::info;

use chartsync_core::config::Config;
use chartsync_core::domain::{Collection, PendingRecord};
use chartsync_core::ports::RecordStore;
use chartsync_store::{DatabasePool, SqliteRecordStore};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Enqueue a record mutation for the next drain
    Add {
        /// Target collection (patients, labResults, invoices)
        collection: String,
        /// Record identifier
        id: String,
        /// JSON payload; read from stdin when omitted
        #[arg(long)]
        payload: Option<String>,
    },
    /// List queued records
    List {
        /// Collection to list; all synced collections when omitted
        collection: Option<String>,
        /// Show the dead-letter queue instead of the pending queue
        #[arg(long)]
        dead: bool,
    },
}

impl QueueCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        match self {
            QueueCommand::Add {
                collection,
                id,
                payload,
            } => execute_add(collection, id, payload.as_deref(), format, config_path).await,
            QueueCommand::List { collection, dead } => {
                execute_list(collection.as_deref(), *dead, format, config_path).await
            }
        }
    }
}

async fn execute_add(
    collection: &str,
    id: &str,
    payload: Option<&str>,
    format: OutputFormat,
    config_path: &Path,
) -> Result<()> {
    let formatter = get_formatter(format.is_json());

    let collection = match collection.parse::<Collection>() {
        Ok(collection) => collection,
        Err(e) => {
            formatter.error(&e.to_string());
            formatter.info("Synced collections: patients, labResults, invoices");
            return Ok(());
        }
    };

    let raw = match payload {
        Some(raw) => raw.to_string(),
        None => read_stdin()?,
    };
    let payload: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            formatter.error(&format!("Payload is not valid JSON: {e}"));
            return Ok(());
        }
    };

    let record = match PendingRecord::new(collection, id, payload) {
        Ok(record) => record,
        Err(e) => {
            formatter.error(&e.to_string());
            return Ok(());
        }
    };

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

    store
        .put(&record)
        .await
        .context("Failed to enqueue the record")?;

    info!(collection = %record.collection(), id = %record.id(), "Record enqueued");

    formatter.success(&format!(
        "Queued {} record '{}'",
        record.collection(),
        record.id()
    ));
    formatter.info("It will sync on the next drain.");
    Ok(())
}

async fn execute_list(
    collection: Option<&str>,
    dead: bool,
    format: OutputFormat,
    config_path: &Path,
) -> Result<()> {
    let formatter = get_formatter(format.is_json());
    let config = Config::load_or_default(config_path);

    let collections: Vec<Collection> = match collection {
        Some(raw) => match raw.parse::<Collection>() {
            Ok(collection) => vec![collection],
            Err(e) => {
                formatter.error(&e.to_string());
                return Ok(());
            }
        },
        None => Collection::SYNCED.to_vec(),
    };

    if !config.store.path.exists() {
        formatter.error("No record store found. Run 'chartsync queue add' first.");
        return Ok(());
    }

    let pool = DatabasePool::new(&config.store.path)
        .await
        .context("Failed to open the record store")?;
    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.pool().clone()));

    if dead {
        list_dead(&collections, store.as_ref(), format, &*formatter).await
    } else {
        list_pending(&collections, store.as_ref(), format, &*formatter).await
    }
}

// Payloads hold clinical data; listings show identifiers only.

async fn list_pending(
    collections: &[Collection],
    store: &dyn RecordStore,
    format: OutputFormat,
    formatter: &dyn OutputFormatter,
) -> Result<()> {
    let mut listings = Vec::new();
    for collection in collections {
        listings.push((*collection, store.get_all(*collection).await?));
    }
    let total: usize = listings.iter().map(|(_, records)| records.len()).sum();

    if format.is_json() {
        let mut rows = Vec::new();
        for (collection, records) in &listings {
            for record in records {
                rows.push(serde_json::json!({
                    "collection": collection.as_str(),
                    "id": record.id(),
                    "queued_at": record.created_at().to_rfc3339(),
                    "attempts": record.attempt_count(),
                }));
            }
        }
        formatter.print_json(&serde_json::json!({ "pending": rows }));
        return Ok(());
    }

    if total == 0 {
        formatter.success("No pending records");
        return Ok(());
    }

    formatter.success(&format!("{total} pending record(s)"));
    for (collection, records) in &listings {
        if records.is_empty() {
            continue;
        }
        formatter.info("");
        formatter.info(&format!("{}:", collection.as_str()));
        for record in records {
            formatter.info(&format!(
                "  {:<24} queued {}  attempts {}",
                record.id(),
                record.created_at().format("%Y-%m-%d %H:%M:%S UTC"),
                record.attempt_count(),
            ));
        }
    }
    Ok(())
}

async fn list_dead(
    collections: &[Collection],
    store: &dyn RecordStore,
    format: OutputFormat,
    formatter: &dyn OutputFormatter,
) -> Result<()> {
    let mut listings = Vec::new();
    for collection in collections {
        listings.push((*collection, store.dead_letters(*collection).await?));
    }
    let total: usize = listings.iter().map(|(_, records)| records.len()).sum();

    if format.is_json() {
        let mut rows = Vec::new();
        for (collection, records) in &listings {
            for record in records {
                rows.push(serde_json::json!({
                    "collection": collection.as_str(),
                    "id": record.id(),
                    "reason": record.reason(),
                    "dead_lettered_at": record.dead_lettered_at().to_rfc3339(),
                    "attempts": record.attempt_count(),
                }));
            }
        }
        formatter.print_json(&serde_json::json!({ "dead_lettered": rows }));
        return Ok(());
    }

    if total == 0 {
        formatter.success("No dead-lettered records");
        return Ok(());
    }

    formatter.success(&format!("{total} dead-lettered record(s)"));
    for (collection, records) in &listings {
        if records.is_empty() {
            continue;
        }
        formatter.info("");
        formatter.info(&format!("{}:", collection.as_str()));
        for record in records {
            formatter.info(&format!(
                "  {:<24} {}  - {}",
                record.id(),
                record.dead_lettered_at().format("%Y-%m-%d %H:%M:%S UTC"),
                record.reason(),
            ));
        }
    }
    formatter.info("");
    formatter.info("Recover a record with 'chartsync redrive <collection> <id>'.");
    Ok(())
}

/// Move one dead-lettered record back into its pending queue
#[derive(Debug, Args)]
pub struct RedriveCommand {
    /// Collection holding the dead-lettered record
    pub collection: String,
    /// Record identifier
    pub id: String,
}

impl RedriveCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format.is_json());
        let config = Config::load_or_default(config_path);

        let collection = match self.collection.parse::<Collection>() {
            Ok(collection) => collection,
            Err(e) => {
                formatter.error(&e.to_string());
                return Ok(());
            }
        };

        if !config.store.path.exists() {
            formatter.error("No record store found. Nothing to redrive.");
            return Ok(());
        }

        let pool = DatabasePool::new(&config.store.path)
            .await
            .context("Failed to open the record store")?;
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.pool().clone()));

        match store.take_dead_letter(collection, &self.id).await? {
            Some(dead) => {
                let reason = dead.reason().to_string();
                let record = dead.into_pending();
                store
                    .put(&record)
                    .await
                    .context("Failed to re-enqueue the record")?;

                info!(collection = %collection, id = %self.id, "Dead letter redriven");

                formatter.success(&format!(
                    "Moved '{}' back into the {} queue",
                    self.id, collection
                ));
                formatter.info(&format!("Original rejection: {reason}"));
                formatter.info("The next drain retries it; an unchanged payload may be rejected again.");
            }
            None => {
                formatter.error(&format!(
                    "No dead-lettered record '{}' in {}",
                    self.id, collection
                ));
            }
        }
        Ok(())
    }
}

/// Reads a whole JSON payload from stdin
fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read the payload from stdin")?;
    Ok(buffer)
}
