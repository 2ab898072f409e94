//! chartsyncd - ChartSync background sync agent
//!
//! Long-running user-session process that owns the drain loop. It watches
//! connectivity through NetworkManager, schedules opportunistic drains,
//! serves the localhost facade the UI shell loads from, and exposes the
//! D-Bus control surface used by `chartsync agent` commands.

mod facade;
mod shell_cache;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use chartsync_core::config::Config;
use chartsync_core::domain::ConnectivityState;
use chartsync_core::ports::RecordStore;
use chartsync_engine::{DrainCoordinator, DrainScheduler, DrainSummary};
use chartsync_ipc::{
    emit_connectivity_changed, emit_drain_complete, AgentDrainState, AgentState, DbusService,
    DBUS_NAME,
};
use chartsync_net::{ConnectivityMonitor, HttpSyncTransport, NetworkManagerLink};
use chartsync_store::open_store;

use facade::HttpFacade;
use shell_cache::ShellCache;

/// Context tag recorded on drain reports started by this process
const DRAIN_CONTEXT: &str = "agent";

/// Registration tag persisted on startup, shown by `chartsync status`
const SYNC_REGISTRATION_TAG: &str = "sync-patients";

/// How often the drain loop polls the shared drain flag
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// AgentService
// ============================================================================

/// The assembled agent: store, connectivity, scheduler, facade, and D-Bus
struct AgentService {
    config: Config,
    store: Arc<dyn RecordStore>,
    state: Arc<Mutex<AgentState>>,
    monitor: Arc<ConnectivityMonitor>,
    shutdown: CancellationToken,
}

impl AgentService {
    /// Opens the record store and prepares shared state
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        if let Some(parent) = config.store.path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create data directory {}", parent.display())
            })?;
        }

        let store = open_store(&config.store.path).await;
        if !store.is_durable() {
            warn!("Record store is not durable; queued records will not survive a restart");
        }

        Ok(Self {
            config,
            store,
            state: Arc::new(Mutex::new(AgentState::default())),
            monitor: Arc::new(ConnectivityMonitor::new(ConnectivityState::Offline)),
            shutdown,
        })
    }

    /// Starts every agent task and blocks on the drain loop until shutdown
    async fn run(&self) -> Result<()> {
        // Single-instance check before any side effects
        match DbusService::try_acquire_name().await {
            Ok(true) => debug!("D-Bus name is free, continuing startup"),
            Ok(false) => anyhow::bail!(
                "Another chartsyncd instance is already running (D-Bus name {DBUS_NAME} is taken)"
            ),
            Err(e) => {
                warn!(error = %e, "Could not reach the session bus, skipping single-instance check")
            }
        }

        if let Err(e) = self.store.save_registration(SYNC_REGISTRATION_TAG).await {
            warn!(error = %e, "Failed to persist the sync registration tag");
        } else {
            info!(tag = SYNC_REGISTRATION_TAG, "Sync registration recorded");
        }

        let mut transport = HttpSyncTransport::new(&self.config.sync.server_url)?;
        if let Some(token) = &self.config.sync.bearer_token {
            transport = transport.with_bearer_token(token);
        }
        let coordinator =
            DrainCoordinator::new(self.store.clone(), Arc::new(transport), &self.config);

        let (mut scheduler, drain_flag) = DrainScheduler::new(
            self.monitor.subscribe(),
            Duration::from_secs(self.config.sync.opportunity_interval),
        );
        tokio::spawn(async move { scheduler.run().await });

        // Connectivity feed. Without NetworkManager the monitor would stay
        // on its initial offline reading forever, so assume online and let
        // failed drains surface the truth.
        let link = NetworkManagerLink::new(self.monitor.clone());
        let monitor = self.monitor.clone();
        tokio::spawn(async move {
            if let Err(e) = link.run().await {
                warn!(error = %e, "NetworkManager unavailable, assuming online");
            } else {
                warn!("NetworkManager state stream ended, assuming online");
            }
            monitor.set_online(true);
        });

        let dbus = DbusService::new(self.state.clone(), self.store.clone(), drain_flag.clone());
        let dbus_connection = match dbus.start().await {
            Ok(connection) => Some(connection),
            Err(e) => {
                warn!(error = %e, "D-Bus service unavailable, continuing without a control surface");
                None
            }
        };

        self.spawn_connectivity_watcher(dbus_connection.clone());

        let cache = Arc::new(ShellCache::new(&self.config.facade.cache_dir));
        let facade = HttpFacade::new(&self.config.facade, cache, self.monitor.clone())?;
        if let Err(e) = facade.precache_shell().await {
            warn!(error = %e, "Shell precache failed");
        }
        let facade_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = facade.run(facade_shutdown).await {
                error!(error = %e, "Facade terminated");
            }
        });

        info!("Agent ready");
        self.drain_loop(&coordinator, &drain_flag, dbus_connection.as_ref())
            .await;

        info!("Agent stopped");
        Ok(())
    }

    /// Mirrors connectivity edges into shared state and onto the bus
    fn spawn_connectivity_watcher(&self, connection: Option<zbus::Connection>) {
        let mut rx = self.monitor.subscribe();
        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let reading = *rx.borrow_and_update();
                        state.lock().await.online = reading.is_online();
                        info!(connectivity = %reading, "Connectivity changed");
                        if let Some(connection) = &connection {
                            if let Err(e) =
                                emit_connectivity_changed(connection, reading.is_online()).await
                            {
                                warn!(error = %e, "Failed to emit connectivity-changed");
                            }
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Polls the shared drain flag and runs drains until shutdown
    ///
    /// The flag is fed by the scheduler (connectivity edges and the
    /// opportunity interval) and by D-Bus TriggerDrain calls. While paused
    /// the flag is left set, so the pending request runs on resume.
    async fn drain_loop(
        &self,
        coordinator: &DrainCoordinator,
        drain_flag: &Arc<AtomicBool>,
        connection: Option<&zbus::Connection>,
    ) {
        let mut poll = tokio::time::interval(DRAIN_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if self.state.lock().await.drain_state == AgentDrainState::Paused {
                        continue;
                    }
                    if drain_flag.swap(false, Ordering::AcqRel) {
                        self.run_drain(coordinator, connection).await;
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Drain loop shutting down");
                    return;
                }
            }
        }
    }

    async fn run_drain(
        &self,
        coordinator: &DrainCoordinator,
        connection: Option<&zbus::Connection>,
    ) {
        self.state.lock().await.drain_state = AgentDrainState::Draining;

        match coordinator.drain_all(DRAIN_CONTEXT).await {
            Ok(summary) if summary.skipped => {
                info!("Drain skipped, another context holds the guard");
            }
            Ok(summary) => {
                info!(
                    attempted = summary.total_attempted(),
                    accepted = summary.total_accepted(),
                    rejected = summary.total_rejected(),
                    duration_ms = summary.duration_ms,
                    "Drain run finished"
                );
                if let Some(connection) = connection {
                    for report in &summary.reports {
                        if report.accepted() > 0 {
                            if let Err(e) = emit_drain_complete(
                                connection,
                                report.collection(),
                                report.accepted(),
                            )
                            .await
                            {
                                warn!(error = %e, "Failed to emit drain-complete");
                            }
                        }
                    }
                }
                self.state.lock().await.last_drain = Some(drain_digest(&summary));
            }
            Err(e) => {
                error!(error = %e, "Drain run failed");
            }
        }

        // A pause issued while draining must survive the run.
        let mut state = self.state.lock().await;
        if state.drain_state == AgentDrainState::Draining {
            state.drain_state = AgentDrainState::Idle;
        }
    }
}

/// Compact JSON digest of a drain run, surfaced by `agent status`
fn drain_digest(summary: &DrainSummary) -> serde_json::Value {
    serde_json::json!({
        "attempted": summary.total_attempted(),
        "accepted": summary.total_accepted(),
        "rejected": summary.total_rejected(),
        "failed_collections": summary.failures().len(),
        "duration_ms": summary.duration_ms,
        "clean": summary.is_clean(),
    })
}

/// Waits for SIGINT or SIGTERM and cancels the token
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_or_default(&Config::default_path());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("ChartSync agent starting (chartsyncd)");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let service = AgentService::new(config, shutdown).await?;
    match service.run().await {
        Ok(()) => {
            info!("Agent shut down gracefully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Agent exiting with error");
            Err(e)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use chartsync_core::domain::{Collection, DrainReport};

    #[test]
    fn test_cancellation_token_propagates_to_children() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_default_config_drives_the_agent() {
        let config = Config::default();
        assert!(config.sync.opportunity_interval > 0);
        assert_eq!(config.facade.listen_port, 8745);
    }

    #[test]
    fn test_summary_digest_reflects_totals() {
        let mut report = DrainReport::begin(Collection::Patients, "agent");
        report.set_attempted(3);
        report.finish(2, 1);

        let summary = DrainSummary {
            reports: vec![report],
            skipped: false,
            duration_ms: 42,
        };

        let digest = drain_digest(&summary);
        assert_eq!(digest["attempted"], 3);
        assert_eq!(digest["accepted"], 2);
        assert_eq!(digest["rejected"], 1);
        assert_eq!(digest["failed_collections"], 0);
        assert_eq!(digest["duration_ms"], 42);
        assert_eq!(digest["clean"], true);
    }
}
