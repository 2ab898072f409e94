//! D-Bus service implementation for ChartSync
//!
//! Provides the D-Bus interface that CLI clients and future UI shells use
//! to communicate with the running `chartsyncd` agent:
//!
//! - `dev.chartsync.ChartSync.SyncController` - trigger, pause, and query drains
//!
//! Signals are emitted on drain completion and connectivity edges. Their
//! payloads are serialized [`AgentMessage`] envelopes from
//! [`crate::messages`], never bare event strings.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chartsync_core::domain::Collection;
use chartsync_core::ports::RecordStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::messages::{AgentMessage, AgentStatus};

/// D-Bus well-known name for the ChartSync agent
pub const DBUS_NAME: &str = "dev.chartsync.ChartSync";

/// D-Bus object path for the service
pub const DBUS_PATH: &str = "/dev/chartsync/ChartSync";

// ============================================================================
// Agent state shared with D-Bus interfaces
// ============================================================================

/// Possible states of the agent's drain loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentDrainState {
    /// Agent is idle, waiting for a connectivity edge or the next interval
    Idle,
    /// A drain run is currently in flight
    Draining,
    /// Drains are suspended by user request
    Paused,
}

impl std::fmt::Display for AgentDrainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentDrainState::Idle => write!(f, "idle"),
            AgentDrainState::Draining => write!(f, "draining"),
            AgentDrainState::Paused => write!(f, "paused"),
        }
    }
}

/// Shared state between the agent's drain loop and the D-Bus interface
pub struct AgentState {
    /// Current drain loop state
    pub drain_state: AgentDrainState,
    /// Last connectivity reading observed by the agent
    pub online: bool,
    /// Digest of the most recent drain run (JSON), if one has finished
    pub last_drain: Option<serde_json::Value>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            drain_state: AgentDrainState::Idle,
            online: false,
            last_drain: None,
        }
    }
}

// ============================================================================
// SyncController interface
// ============================================================================

/// D-Bus interface for controlling the drain loop
///
/// Provides methods to trigger, pause, and resume drains and to query the
/// agent's status. Drain requests land in the same atomic flag the agent's
/// scheduler sets, so bus triggers and connectivity edges share one path
/// into the drain loop.
pub struct SyncControllerInterface {
    state: Arc<Mutex<AgentState>>,
    store: Arc<dyn RecordStore>,
    drain_flag: Arc<AtomicBool>,
}

impl SyncControllerInterface {
    /// Creates a new SyncControllerInterface over the agent's shared state
    pub fn new(
        state: Arc<Mutex<AgentState>>,
        store: Arc<dyn RecordStore>,
        drain_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            store,
            drain_flag,
        }
    }
}

#[zbus::interface(name = "dev.chartsync.ChartSync.SyncController")]
impl SyncControllerInterface {
    /// Requests an immediate drain of every synced collection
    ///
    /// If the agent is paused, the request stays queued and runs on resume.
    /// If a drain is already in flight, this is a no-op; records enqueued
    /// mid-drain are picked up by the next scheduled run.
    async fn trigger_drain(&self) {
        let state = self.state.lock().await;
        match state.drain_state {
            AgentDrainState::Draining => {
                debug!("TriggerDrain called but a drain is already running");
            }
            AgentDrainState::Paused => {
                info!("TriggerDrain called while paused, queueing the request");
                self.drain_flag.store(true, Ordering::Release);
            }
            AgentDrainState::Idle => {
                info!("TriggerDrain called, requesting a drain");
                self.drain_flag.store(true, Ordering::Release);
            }
        }
    }

    /// Suspends scheduled and connectivity-triggered drains
    ///
    /// An in-flight drain run finishes; no new run starts until `Resume`.
    async fn pause(&self) {
        let mut state = self.state.lock().await;
        if state.drain_state != AgentDrainState::Paused {
            info!("Pause called, suspending drains");
            state.drain_state = AgentDrainState::Paused;
        } else {
            debug!("Pause called but already paused");
        }
    }

    /// Lifts a pause; a queued drain request runs on the next loop pass
    async fn resume(&self) {
        let mut state = self.state.lock().await;
        if state.drain_state == AgentDrainState::Paused {
            info!("Resume called, drains re-enabled");
            state.drain_state = AgentDrainState::Idle;
        } else {
            debug!("Resume called but the agent is not paused");
        }
    }

    /// Returns the agent status as a JSON document
    ///
    /// The reply is a serialized [`AgentStatus`] containing:
    /// - `state`: drain loop state (idle, draining, paused)
    /// - `online`: last connectivity reading
    /// - `queued`: pending record count per synced collection
    /// - `last_drain`: digest of the most recent drain run (if any)
    async fn get_status(&self) -> String {
        let state = self.state.lock().await;

        let mut queued = BTreeMap::new();
        for collection in Collection::SYNCED {
            match self.store.count(collection).await {
                Ok(count) => {
                    queued.insert(collection.as_str().to_string(), count);
                }
                Err(e) => {
                    warn!(error = %e, collection = %collection, "Failed to count queued records");
                }
            }
        }

        let status = AgentStatus {
            state: state.drain_state.to_string(),
            online: state.online,
            queued,
            last_drain: state.last_drain.clone(),
        };
        status.to_wire().unwrap_or_else(|_| "{}".to_string())
    }

    // D-Bus signals. Payloads are serialized AgentMessage envelopes.

    /// Emitted after a drain run settles a collection
    #[zbus(signal)]
    async fn drain_complete(
        signal_ctxt: &zbus::SignalContext<'_>,
        envelope: &str,
    ) -> zbus::Result<()>;

    /// Emitted on every connectivity edge the agent observes
    #[zbus(signal)]
    async fn connectivity_changed(
        signal_ctxt: &zbus::SignalContext<'_>,
        envelope: &str,
    ) -> zbus::Result<()>;
}

// ============================================================================
// Signal emission
// ============================================================================

/// Emits a `drain-complete` envelope to foreground clients
///
/// Called by the agent after each collection drain that accepted records,
/// so an open client can refresh its view.
pub async fn emit_drain_complete(
    connection: &zbus::Connection,
    collection: Collection,
    count: u64,
) -> anyhow::Result<()> {
    let envelope = AgentMessage::DrainComplete { collection, count }.to_wire()?;
    let ctxt = zbus::SignalContext::new(connection, DBUS_PATH)?;
    SyncControllerInterface::drain_complete(&ctxt, &envelope).await?;
    debug!(collection = %collection, count, "Emitted drain-complete signal");
    Ok(())
}

/// Emits a `connectivity-changed` envelope to foreground clients
pub async fn emit_connectivity_changed(
    connection: &zbus::Connection,
    online: bool,
) -> anyhow::Result<()> {
    let envelope = AgentMessage::ConnectivityChanged { online }.to_wire()?;
    let ctxt = zbus::SignalContext::new(connection, DBUS_PATH)?;
    SyncControllerInterface::connectivity_changed(&ctxt, &envelope).await?;
    debug!(online, "Emitted connectivity-changed signal");
    Ok(())
}

// ============================================================================
// DbusService - high-level service orchestrator
// ============================================================================

/// High-level D-Bus service for the agent
///
/// Creates a `zbus::Connection` on the session bus, registers the
/// SyncController interface at the well-known path, and requests the
/// well-known name `dev.chartsync.ChartSync`.
pub struct DbusService {
    state: Arc<Mutex<AgentState>>,
    store: Arc<dyn RecordStore>,
    drain_flag: Arc<AtomicBool>,
}

impl DbusService {
    /// Creates a new DbusService over the agent's shared state and store
    ///
    /// `drain_flag` is the same flag the agent's scheduler sets; D-Bus
    /// triggers funnel through it into the drain loop.
    pub fn new(
        state: Arc<Mutex<AgentState>>,
        store: Arc<dyn RecordStore>,
        drain_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            store,
            drain_flag,
        }
    }

    /// Returns a reference to the shared agent state
    pub fn state(&self) -> &Arc<Mutex<AgentState>> {
        &self.state
    }

    /// Starts the D-Bus service on the session bus
    ///
    /// Registers the SyncController interface and requests the well-known
    /// name. Returns the connection, which must be kept alive for the
    /// service to remain reachable.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The session bus is not available
    /// - The well-known name is already owned (another agent is running)
    /// - Interface registration fails
    pub async fn start(&self) -> anyhow::Result<zbus::Connection> {
        info!("Starting D-Bus service on session bus");

        let sync_controller = SyncControllerInterface::new(
            Arc::clone(&self.state),
            Arc::clone(&self.store),
            Arc::clone(&self.drain_flag),
        );

        let connection = zbus::connection::Builder::session()?
            .name(DBUS_NAME)?
            .serve_at(DBUS_PATH, sync_controller)?
            .build()
            .await?;

        info!(
            name = DBUS_NAME,
            path = DBUS_PATH,
            "D-Bus service started successfully"
        );

        Ok(connection)
    }

    /// Attempts to acquire the D-Bus well-known name as a single-instance lock
    ///
    /// Returns `false` if the name is already owned, meaning another agent
    /// instance is running and this one should exit.
    pub async fn try_acquire_name() -> anyhow::Result<bool> {
        let connection = zbus::Connection::session().await?;
        let dbus_proxy = zbus::fdo::DBusProxy::new(&connection).await?;

        // An owner means a running agent; an error means the name is free.
        match dbus_proxy.get_name_owner(DBUS_NAME.try_into()?).await {
            Ok(_owner) => Ok(false),
            Err(_) => Ok(true),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use chartsync_core::domain::PendingRecord;
    use chartsync_store::MemoryRecordStore;
    use serde_json::json;

    fn shared_state(drain_state: AgentDrainState) -> Arc<Mutex<AgentState>> {
        Arc::new(Mutex::new(AgentState {
            drain_state,
            ..AgentState::default()
        }))
    }

    fn controller(
        state: Arc<Mutex<AgentState>>,
    ) -> (SyncControllerInterface, Arc<AtomicBool>, Arc<MemoryRecordStore>) {
        let flag = Arc::new(AtomicBool::new(false));
        let store = Arc::new(MemoryRecordStore::new());
        let iface =
            SyncControllerInterface::new(state, store.clone(), Arc::clone(&flag));
        (iface, flag, store)
    }

    #[test]
    fn test_agent_drain_state_display() {
        assert_eq!(AgentDrainState::Idle.to_string(), "idle");
        assert_eq!(AgentDrainState::Draining.to_string(), "draining");
        assert_eq!(AgentDrainState::Paused.to_string(), "paused");
    }

    #[test]
    fn test_agent_state_default() {
        let state = AgentState::default();
        assert_eq!(state.drain_state, AgentDrainState::Idle);
        assert!(!state.online);
        assert!(state.last_drain.is_none());
    }

    #[test]
    fn test_dbus_constants() {
        assert_eq!(DBUS_NAME, "dev.chartsync.ChartSync");
        assert_eq!(DBUS_PATH, "/dev/chartsync/ChartSync");
    }

    #[tokio::test]
    async fn test_trigger_drain_sets_the_request_flag() {
        let (iface, flag, _store) = controller(shared_state(AgentDrainState::Idle));

        iface.trigger_drain().await;

        assert!(flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_trigger_drain_while_draining_is_ignored() {
        let (iface, flag, _store) = controller(shared_state(AgentDrainState::Draining));

        iface.trigger_drain().await;

        assert!(!flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_trigger_drain_while_paused_queues_the_request() {
        let state = shared_state(AgentDrainState::Paused);
        let (iface, flag, _store) = controller(Arc::clone(&state));

        iface.trigger_drain().await;

        assert!(flag.load(Ordering::Acquire));
        // The drain itself waits for Resume
        assert_eq!(state.lock().await.drain_state, AgentDrainState::Paused);
    }

    #[tokio::test]
    async fn test_pause_and_resume_toggle_the_state() {
        let state = shared_state(AgentDrainState::Idle);
        let (iface, _flag, _store) = controller(Arc::clone(&state));

        iface.pause().await;
        assert_eq!(state.lock().await.drain_state, AgentDrainState::Paused);

        iface.resume().await;
        assert_eq!(state.lock().await.drain_state, AgentDrainState::Idle);
    }

    #[tokio::test]
    async fn test_resume_when_not_paused_is_ignored() {
        let state = shared_state(AgentDrainState::Draining);
        let (iface, _flag, _store) = controller(Arc::clone(&state));

        iface.resume().await;

        assert_eq!(state.lock().await.drain_state, AgentDrainState::Draining);
    }

    #[tokio::test]
    async fn test_get_status_reports_queue_depths() {
        let (iface, _flag, store) = controller(shared_state(AgentDrainState::Idle));

        for id in ["p-1", "p-2"] {
            let record =
                PendingRecord::new(Collection::Patients, id, json!({"name": "A"})).unwrap();
            store.put(&record).await.unwrap();
        }
        let invoice =
            PendingRecord::new(Collection::Invoices, "inv-1", json!({"total": 10})).unwrap();
        store.put(&invoice).await.unwrap();

        let status = AgentStatus::from_wire(&iface.get_status().await).unwrap();

        assert_eq!(status.state, "idle");
        assert_eq!(status.queued.get("patients"), Some(&2));
        assert_eq!(status.queued.get("invoices"), Some(&1));
        assert_eq!(status.queued.get("labResults"), Some(&0));
        assert_eq!(status.total_queued(), 3);
    }

    #[tokio::test]
    async fn test_get_status_includes_last_drain_digest() {
        let state = Arc::new(Mutex::new(AgentState {
            drain_state: AgentDrainState::Idle,
            online: true,
            last_drain: Some(json!({"accepted": 5, "rejected": 1})),
        }));
        let (iface, _flag, _store) = controller(state);

        let status = AgentStatus::from_wire(&iface.get_status().await).unwrap();

        assert!(status.online);
        assert_eq!(status.last_drain, Some(json!({"accepted": 5, "rejected": 1})));
    }

    #[tokio::test]
    async fn test_dbus_service_exposes_shared_state() {
        let state = shared_state(AgentDrainState::Paused);
        let flag = Arc::new(AtomicBool::new(false));
        let store = Arc::new(MemoryRecordStore::new());
        let service = DbusService::new(Arc::clone(&state), store, flag);

        assert_eq!(
            service.state().lock().await.drain_state,
            AgentDrainState::Paused
        );
    }
}
