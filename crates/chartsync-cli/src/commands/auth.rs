//! Login and logout - manage the encrypted offline credential cache
//!
//! `chartsync login` caches account credentials in the local record store,
//! encrypted with the per-install vault key, so the client application can
//! authenticate the user while the records server is unreachable.
//! Validating the credentials against the server is the application's job;
//! the CLI only maintains the cache.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use chartsync_core::config::Config;
use chartsync_core::ports::RecordStore;
use chartsync_store::{DatabasePool, SqliteRecordStore};
use chartsync_vault::CredentialVault;

use crate::output::{get_formatter, OutputFormat};

/// Cache credentials for offline login
#[derive(Debug, Args)]
pub struct LoginCommand {
    /// Account email; prompted for when omitted
    #[arg(long)]
    pub email: Option<String>,
}

impl LoginCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format.is_json());
        let config = Config::load_or_default(config_path);

        let email = match &self.email {
            Some(email) => email.trim().to_string(),
            None => prompt("Email")?,
        };
        if email.is_empty() {
            formatter.error("Email must not be empty");
            return Ok(());
        }

        let password = prompt("Password")?;
        if password.is_empty() {
            formatter.error("Password must not be empty");
            return Ok(());
        }

        // Opening the pool provisions the store on first use
        if let Some(parent) = config.store.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create the data directory")?;
        }
        let pool = DatabasePool::new(&config.store.path)
            .await
            .context("Failed to open the record store")?;
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.pool().clone()));

        let vault = CredentialVault::open(store, &config.vault.keyring_service)
            .context("Failed to open the credential vault (is the system keystore available?)")?;

        vault
            .save_credentials(&email, &password)
            .await
            .context("Failed to cache the credentials")?;

        info!(email = %email, "Credentials cached");

        formatter.success(&format!("Credentials cached for {email}"));
        formatter.info("Offline login will work while the records server is unreachable.");
        Ok(())
    }
}

/// Clear cached credentials
#[derive(Debug, Args)]
pub struct LogoutCommand {}

impl LogoutCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format.is_json());
        let config = Config::load_or_default(config_path);

        if !config.store.path.exists() {
            formatter.info("No record store found. Nothing to log out.");
            return Ok(());
        }

        let pool = DatabasePool::new(&config.store.path)
            .await
            .context("Failed to open the record store")?;
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.pool().clone()));

        let vault = CredentialVault::open(store, &config.vault.keyring_service)
            .context("Failed to open the credential vault (is the system keystore available?)")?;

        if !vault.has_credentials().await? {
            formatter.info("No cached credentials. Nothing to log out.");
            return Ok(());
        }

        vault
            .clear_credentials()
            .await
            .context("Failed to clear the cached credentials")?;

        info!("Cached credentials cleared");

        formatter.success("Cached credentials cleared");
        formatter.info("Offline login is disabled until the next 'chartsync login'.");
        Ok(())
    }
}

/// Reads one trimmed line from stdin with a label
fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    std::io::stdout().flush().context("Failed to flush stdout")?;

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}
