//! Session and connection state enums

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No media loaded
    #[default]
    Idle,
    /// Media loaded, not streaming
    Uploaded,
    /// Frames are being captured and sent
    Streaming,
    /// Media reached its end (or was paused) while streaming
    Ended,
    /// Connection or media failure; only stop or a fresh upload are accepted
    Error,
}

impl SessionState {
    /// Whether no further state change will happen without a user action
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Uploaded => "uploaded",
            SessionState::Streaming => "streaming",
            SessionState::Ended => "ended",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// State of the process-wide connection to the processing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}
