//! Connectivity monitoring
//!
//! Tracks whether the machine currently has a usable network path and lets
//! interested parties subscribe to transitions. Production wiring feeds the
//! monitor from NetworkManager state-change signals over the system D-Bus;
//! tests and the CLI drive it directly through [`ConnectivityMonitor::set_online`].
//!
//! Subscribers only see edges. Re-reporting the current state is absorbed so
//! a chatty source cannot trigger redundant drain attempts.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use chartsync_core::domain::ConnectivityState;

/// NetworkManager's NM_STATE_CONNECTED_GLOBAL: full connectivity with a
/// validated external route. Lower connected states (site, local, portal)
/// cannot reach the sync endpoint and count as offline.
const NM_STATE_CONNECTED_GLOBAL: u32 = 70;

// ============================================================================
// ConnectivityMonitor
// ============================================================================

/// Shared online/offline state with change notifications.
///
/// Cheap to clone via `Arc`; one instance is created at process start and
/// handed to every component that needs to consult or follow connectivity.
pub struct ConnectivityMonitor {
    sender: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the given state.
    pub fn new(initial: ConnectivityState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Current state at the time of the call.
    pub fn state(&self) -> ConnectivityState {
        *self.sender.borrow()
    }

    /// Whether the machine currently has a usable network path.
    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Record a state report from a connectivity source.
    ///
    /// Subscribers are notified only when the state actually changes.
    pub fn set_online(&self, online: bool) {
        let next = ConnectivityState::from_online(online);
        let changed = self.sender.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            info!(state = %next, "Connectivity changed");
        }
    }

    /// Subscribe to connectivity transitions.
    ///
    /// The receiver starts with the current state already marked as seen;
    /// `changed()` resolves on the next transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::Offline)
    }
}

// ============================================================================
// NetworkManager feed
// ============================================================================

#[zbus::proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
trait NetworkManager {
    /// Overall networking state (NM_STATE_*)
    ///
    /// `emits_changed_signal = "false"` keeps the proxy macro from generating
    /// a property-change stream whose name would collide with the
    /// `StateChanged` signal stream below; state changes are followed via
    /// that explicit signal.
    #[zbus(property(emits_changed_signal = "false"))]
    fn state(&self) -> zbus::Result<u32>;

    /// Emitted whenever the overall networking state changes
    #[zbus(signal)]
    fn state_changed(&self, state: u32) -> zbus::Result<()>;
}

fn nm_state_is_online(state: u32) -> bool {
    state >= NM_STATE_CONNECTED_GLOBAL
}

/// Feeds a [`ConnectivityMonitor`] from NetworkManager over the system bus.
pub struct NetworkManagerLink {
    monitor: Arc<ConnectivityMonitor>,
}

impl NetworkManagerLink {
    pub fn new(monitor: Arc<ConnectivityMonitor>) -> Self {
        Self { monitor }
    }

    /// Connect to the system bus, seed the monitor with the current
    /// NetworkManager state, and forward state-change signals until the
    /// signal stream ends.
    ///
    /// Runs until the bus connection drops; callers spawn this as a task.
    /// Failing to reach NetworkManager at all is an error so the caller can
    /// fall back to a different connectivity source.
    pub async fn run(self) -> Result<()> {
        let connection = zbus::Connection::system()
            .await
            .context("Failed to connect to the system D-Bus")?;
        let proxy = NetworkManagerProxy::new(&connection)
            .await
            .context("Failed to create NetworkManager proxy")?;

        match proxy.state().await {
            Ok(state) => {
                debug!(nm_state = state, "Seeded connectivity from NetworkManager");
                self.monitor.set_online(nm_state_is_online(state));
            }
            Err(e) => {
                warn!(error = %e, "Could not read initial NetworkManager state");
            }
        }

        let mut changes = proxy
            .receive_state_changed()
            .await
            .context("Failed to subscribe to NetworkManager state changes")?;

        info!("Following NetworkManager connectivity state");
        while let Some(signal) = changes.next().await {
            match signal.args() {
                Ok(args) => {
                    let state = *args.state();
                    debug!(nm_state = state, "NetworkManager state changed");
                    self.monitor.set_online(nm_state_is_online(state));
                }
                Err(e) => {
                    warn!(error = %e, "Malformed NetworkManager state change signal");
                }
            }
        }

        warn!("NetworkManager signal stream ended");
        Ok(())
    }
}
