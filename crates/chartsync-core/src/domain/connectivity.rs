//! Connectivity state
//!
//! A two-valued state driven purely by platform transition signals. The
//! monitor publishing it lives in the network crate; components receive the
//! state by injection, never through a global.

use serde::{Deserialize, Serialize};

/// Online/offline state as last reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    /// Returns true when the platform reports connectivity
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }

    /// Maps a platform boolean into the typed state
    pub fn from_online(online: bool) -> Self {
        if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Offline => write!(f, "offline"),
        }
    }
}
