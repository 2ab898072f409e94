//! Client-side access to the running agent
//!
//! [`AgentClient`] wraps the generated D-Bus proxy so foreground callers
//! get typed replies and a recognizable error when no agent owns the
//! well-known name. The CLI is the primary consumer.

use thiserror::Error;
use tracing::debug;

use crate::messages::AgentStatus;
use crate::service::DBUS_NAME;

/// Errors surfaced to foreground callers of the agent
#[derive(Debug, Error)]
pub enum IpcError {
    /// No process owns the agent's well-known name on the session bus
    #[error("ChartSync agent is not running")]
    AgentNotRunning,
    /// Session bus connection or method call failed
    #[error("D-Bus failure: {0}")]
    Bus(#[from] zbus::Error),
    /// A standard bus interface call failed
    #[error("D-Bus call failed: {0}")]
    Fdo(#[from] zbus::fdo::Error),
    /// The well-known name failed D-Bus validation
    #[error("Invalid D-Bus name: {0}")]
    Name(#[from] zbus::names::Error),
    /// The agent returned a status payload the client cannot parse
    #[error("Malformed agent status reply: {0}")]
    MalformedReply(#[from] serde_json::Error),
}

#[zbus::proxy(
    interface = "dev.chartsync.ChartSync.SyncController",
    default_service = "dev.chartsync.ChartSync",
    default_path = "/dev/chartsync/ChartSync"
)]
trait SyncController {
    /// Requests an immediate drain of every synced collection
    fn trigger_drain(&self) -> zbus::Result<()>;

    /// Suspends scheduled and connectivity-triggered drains
    fn pause(&self) -> zbus::Result<()>;

    /// Re-enables drains after a pause
    fn resume(&self) -> zbus::Result<()>;

    /// Returns the agent status as a JSON document
    fn get_status(&self) -> zbus::Result<String>;

    /// Carries a serialized `drain-complete` envelope
    #[zbus(signal)]
    fn drain_complete(&self, envelope: &str) -> zbus::Result<()>;

    /// Carries a serialized `connectivity-changed` envelope
    #[zbus(signal)]
    fn connectivity_changed(&self, envelope: &str) -> zbus::Result<()>;
}

/// High-level handle the CLI uses to reach the agent
pub struct AgentClient {
    proxy: SyncControllerProxy<'static>,
}

impl AgentClient {
    /// Connects to the session bus and verifies an agent owns its name
    ///
    /// # Errors
    /// Returns [`IpcError::AgentNotRunning`] when no agent is on the bus,
    /// or a bus error when the session bus itself is unreachable.
    pub async fn connect() -> Result<Self, IpcError> {
        let connection = zbus::Connection::session().await?;

        let dbus_proxy = zbus::fdo::DBusProxy::new(&connection).await?;
        if !dbus_proxy.name_has_owner(DBUS_NAME.try_into()?).await? {
            return Err(IpcError::AgentNotRunning);
        }

        let proxy = SyncControllerProxy::new(&connection).await?;
        debug!("Connected to the agent on the session bus");
        Ok(Self { proxy })
    }

    /// Asks the agent to drain every synced collection now
    pub async fn trigger_drain(&self) -> Result<(), IpcError> {
        self.proxy.trigger_drain().await?;
        Ok(())
    }

    /// Suspends drains until [`resume`](Self::resume) is called
    pub async fn pause(&self) -> Result<(), IpcError> {
        self.proxy.pause().await?;
        Ok(())
    }

    /// Lifts a pause
    pub async fn resume(&self) -> Result<(), IpcError> {
        self.proxy.resume().await?;
        Ok(())
    }

    /// Fetches and parses the agent's status document
    pub async fn status(&self) -> Result<AgentStatus, IpcError> {
        let raw = self.proxy.get_status().await?;
        Ok(AgentStatus::from_wire(&raw)?)
    }
}
