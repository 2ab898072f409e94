//! Configuration module for ChartSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for ChartSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub vault: VaultConfig,
    pub facade: FacadeConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the remote system of record.
    pub server_url: String,
    /// Seconds between periodic background drain opportunities while online.
    pub opportunity_interval: u64,
    /// Seconds before a persisted drain guard is considered stale.
    pub drain_guard_ttl: u64,
    /// Bearer token presented to the sync endpoint. Token issuance is
    /// handled outside ChartSync; leave unset for unauthenticated remotes.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// Local store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

/// Credential vault settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Secret Service entry name holding the per-installation vault key.
    pub keyring_service: String,
}

/// Offline HTTP facade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacadeConfig {
    /// Local port the facade listens on.
    pub listen_port: u16,
    /// Upstream the facade proxies to while online.
    pub upstream_url: String,
    /// Directory holding versioned precache generations.
    pub cache_dir: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Path to the log file.
    pub file: PathBuf,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/chartsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("chartsync")
            .join("config.yaml")
    }

    /// Platform-appropriate default path for the SQLite database.
    pub fn default_store_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chartsync")
            .join("chartsync.db")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

// Config derives Default because all its fields implement Default.
// (clippy::derivable_impls)

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            opportunity_interval: 300,
            drain_guard_ttl: 120,
            bearer_token: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Config::default_store_path(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            keyring_service: "chartsync".to_string(),
        }
    }
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            listen_port: 8745,
            upstream_url: "http://127.0.0.1:8080".to_string(),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("~/.cache"))
                .join("chartsync"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("chartsync");
        Self {
            level: "info".to_string(),
            file: data_dir.join("chartsync.log"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.server_url"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if !is_http_url(&self.sync.server_url) {
            errors.push(ValidationError {
                field: "sync.server_url".into(),
                message: format!(
                    "must be an http(s) URL, got '{}'",
                    self.sync.server_url
                ),
            });
        }
        if self.sync.opportunity_interval == 0 {
            errors.push(ValidationError {
                field: "sync.opportunity_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.drain_guard_ttl == 0 {
            errors.push(ValidationError {
                field: "sync.drain_guard_ttl".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- store ---
        if self.store.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "store.path".into(),
                message: "must not be empty".into(),
            });
        }

        // --- vault ---
        if self.vault.keyring_service.trim().is_empty() {
            errors.push(ValidationError {
                field: "vault.keyring_service".into(),
                message: "must not be empty".into(),
            });
        }

        // --- facade ---
        if self.facade.listen_port == 0 {
            errors.push(ValidationError {
                field: "facade.listen_port".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !is_http_url(&self.facade.upstream_url) {
            errors.push(ValidationError {
                field: "facade.upstream_url".into(),
                message: format!(
                    "must be an http(s) URL, got '{}'",
                    self.facade.upstream_url
                ),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use chartsync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_server_url("https://records.clinic.example")
///     .store_path(PathBuf::from("/var/lib/chartsync/chartsync.db"))
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_server_url(mut self, url: impl Into<String>) -> Self {
        self.config.sync.server_url = url.into();
        self
    }

    pub fn sync_opportunity_interval(mut self, seconds: u64) -> Self {
        self.config.sync.opportunity_interval = seconds;
        self
    }

    pub fn sync_drain_guard_ttl(mut self, seconds: u64) -> Self {
        self.config.sync.drain_guard_ttl = seconds;
        self
    }

    pub fn sync_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config.sync.bearer_token = Some(token.into());
        self
    }

    // --- store ---

    pub fn store_path(mut self, path: PathBuf) -> Self {
        self.config.store.path = path;
        self
    }

    // --- vault ---

    pub fn vault_keyring_service(mut self, service: impl Into<String>) -> Self {
        self.config.vault.keyring_service = service.into();
        self
    }

    // --- facade ---

    pub fn facade_listen_port(mut self, port: u16) -> Self {
        self.config.facade.listen_port = port;
        self
    }

    pub fn facade_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.config.facade.upstream_url = url.into();
        self
    }

    pub fn facade_cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.facade.cache_dir = dir;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_file(mut self, file: PathBuf) -> Self {
        self.config.logging.file = file;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
