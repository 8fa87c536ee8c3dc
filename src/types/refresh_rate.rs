//! Refresh rate control for the capture scheduler

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rate at which the scheduler gets a chance to capture a frame
///
/// The scheduler only captures on a tick when no frame is in flight, so this
/// is an upper bound: the effective rate is also limited by the round trip to
/// the processing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshRate {
    /// Full display refresh rate (60Hz)
    #[default]
    Display,

    /// Throttled to maximum Hz
    /// If the requested rate exceeds the display rate, Display is used
    Max(u32),
}

impl RefreshRate {
    /// Display refresh frequency in Hz
    pub const DISPLAY_HZ: u32 = 60;

    /// Build from an optional Hz value, `None` meaning the display rate
    pub fn from_hz(hz: Option<u32>) -> Self {
        match hz {
            None => RefreshRate::Display,
            Some(hz) => RefreshRate::Max(hz).normalize(),
        }
    }

    /// Normalize against the display rate
    pub fn normalize(self) -> Self {
        match self {
            RefreshRate::Display => RefreshRate::Display,
            RefreshRate::Max(hz) if hz >= Self::DISPLAY_HZ => RefreshRate::Display,
            RefreshRate::Max(0) => RefreshRate::Max(1),
            RefreshRate::Max(hz) => RefreshRate::Max(hz),
        }
    }

    /// Effective frequency in Hz
    pub fn hz(self) -> u32 {
        match self.normalize() {
            RefreshRate::Display => Self::DISPLAY_HZ,
            RefreshRate::Max(hz) => hz,
        }
    }

    /// Interval between ticks
    pub fn period(self) -> Duration {
        Duration::from_secs_f64(1.0 / self.hz() as f64)
    }
}
