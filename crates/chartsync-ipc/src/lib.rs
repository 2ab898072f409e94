//! ChartSync IPC - D-Bus bridge between the agent and foreground clients
//!
//! The background agent (`chartsyncd`) serves a single interface on the
//! session bus:
//!
//! - `dev.chartsync.ChartSync.SyncController` - trigger, pause, resume, and
//!   query drains; emits `DrainComplete` and `ConnectivityChanged` signals
//!
//! Signal payloads are serialized [`AgentMessage`] envelopes, so both sides
//! of the bus parse one schema instead of matching ad hoc event names. The
//! CLI reaches the agent through [`AgentClient`].

pub mod client;
pub mod messages;
pub mod service;

pub use client::{AgentClient, IpcError};
pub use messages::{AgentMessage, AgentStatus};
pub use service::{
    emit_connectivity_changed, emit_drain_complete, AgentDrainState, AgentState, DbusService,
    SyncControllerInterface, DBUS_NAME, DBUS_PATH,
};
