//! Observable session snapshot

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ErrorInfo, SessionState};

/// Counters for the current streaming run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Frames handed to the connection
    pub frames_sent: u64,
    /// Processed frames received
    pub results_received: u64,
    /// Per-frame errors reported by the service
    pub processing_errors: u64,
    /// Responses dropped because no frame was in flight
    pub stale_responses: u64,
    /// Ticks where the media had nothing to show yet
    pub not_ready_ticks: u64,
    /// Send-to-response latency of the most recent frame
    pub last_round_trip: Option<Duration>,
}

impl StreamStats {
    /// Responses of either kind
    pub fn responses(&self) -> u64 {
        self.results_received + self.processing_errors
    }
}

/// Point-in-time view of the session, published after every handled event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
///
/// `last_error` is always set while `state` is `Error`. Outside `Error` it
/// holds the most recent non-fatal or already stopped error, if any.
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Name of the uploaded media, if any
    pub source_name: Option<String>,
    pub last_error: Option<ErrorInfo>,
    pub outstanding_frame: bool,
    pub stats: StreamStats,
}
