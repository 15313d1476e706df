//! Connection lifecycle state shared by the orchestrator and its sessions.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Process-wide connection state.
///
/// Transitions:
/// - `Disconnected -> Syncing` when the transport connects
/// - `Syncing -> Synced` when the offline backlog has been delivered
/// - any state `-> Disconnected` on logout or a fatal transport error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Syncing,
    Synced,
}

impl ConnectionState {
    /// Whether live replies may be generated in this state.
    pub fn is_synced(self) -> bool {
        self == ConnectionState::Synced
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Syncing => write!(f, "syncing"),
            ConnectionState::Synced => write!(f, "synced"),
        }
    }
}

impl FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disconnected" => Ok(ConnectionState::Disconnected),
            "syncing" => Ok(ConnectionState::Syncing),
            "synced" => Ok(ConnectionState::Synced),
            other => Err(format!("invalid connection state: '{other}'")),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}
