//! Typed messages crossing the D-Bus boundary
//!
//! The agent and its clients share no memory; everything that crosses the
//! bus is serialized JSON. Both sides parse the same types from this
//! module, so adding a message kind is a compile-time change instead of a
//! new stringly-typed event name to keep in sync by hand.

use std::collections::BTreeMap;

use chartsync_core::domain::Collection;
use serde::{Deserialize, Serialize};

// ============================================================================
// Signal envelope
// ============================================================================

/// A notification sent from the background agent to foreground clients
///
/// Serialized with a kebab-case `type` tag, e.g.
/// `{"type":"drain-complete","collection":"patients","count":3}`.
/// Unknown tags fail to parse, so a client never acts on a message kind it
/// does not understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentMessage {
    /// A drain run settled one collection; `count` records were accepted
    DrainComplete { collection: Collection, count: u64 },
    /// The connectivity monitor observed an edge
    ConnectivityChanged { online: bool },
}

impl AgentMessage {
    /// Serializes the message for the D-Bus signal payload
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a message received as a D-Bus signal payload
    pub fn from_wire(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

// ============================================================================
// Status document
// ============================================================================

/// Snapshot of the agent returned by the `GetStatus` D-Bus method
///
/// Serialized as JSON so the reply stays readable from `busctl call` as
/// well as through [`crate::AgentClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Drain loop state: `idle`, `draining` or `paused`
    pub state: String,
    /// Last connectivity reading the agent observed
    pub online: bool,
    /// Pending record count per synced collection
    #[serde(default)]
    pub queued: BTreeMap<String, u64>,
    /// Digest of the most recent drain run, if one has finished
    #[serde(default)]
    pub last_drain: Option<serde_json::Value>,
}

impl AgentStatus {
    /// Serializes the status for the D-Bus method reply
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a status reply received from the agent
    pub fn from_wire(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Total pending records across all synced collections
    pub fn total_queued(&self) -> u64 {
        self.queued.values().sum()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_complete_wire_format() {
        let message = AgentMessage::DrainComplete {
            collection: Collection::Patients,
            count: 3,
        };

        assert_eq!(
            message.to_wire().unwrap(),
            r#"{"type":"drain-complete","collection":"patients","count":3}"#
        );
    }

    #[test]
    fn test_connectivity_changed_wire_format() {
        let message = AgentMessage::ConnectivityChanged { online: true };

        assert_eq!(
            message.to_wire().unwrap(),
            r#"{"type":"connectivity-changed","online":true}"#
        );
    }

    #[test]
    fn test_envelope_round_trips() {
        let message = AgentMessage::DrainComplete {
            collection: Collection::LabResults,
            count: 12,
        };

        let parsed = AgentMessage::from_wire(&message.to_wire().unwrap()).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        let raw = r#"{"type":"cache-cleared","entries":4}"#;
        assert!(AgentMessage::from_wire(raw).is_err());
    }

    #[test]
    fn test_untagged_message_is_rejected() {
        assert!(AgentMessage::from_wire(r#"{"collection":"patients","count":3}"#).is_err());
    }

    #[test]
    fn test_status_round_trips() {
        let mut queued = BTreeMap::new();
        queued.insert("patients".to_string(), 2);
        queued.insert("invoices".to_string(), 1);

        let status = AgentStatus {
            state: "idle".to_string(),
            online: true,
            queued,
            last_drain: Some(serde_json::json!({"accepted": 2, "rejected": 0})),
        };

        let parsed = AgentStatus::from_wire(&status.to_wire().unwrap()).unwrap();
        assert_eq!(parsed, status);
        assert_eq!(parsed.total_queued(), 3);
    }

    #[test]
    fn test_status_parses_without_optional_fields() {
        let status = AgentStatus::from_wire(r#"{"state":"paused","online":false}"#).unwrap();

        assert_eq!(status.state, "paused");
        assert!(!status.online);
        assert!(status.queued.is_empty());
        assert!(status.last_drain.is_none());
        assert_eq!(status.total_queued(), 0);
    }
}
