//! Result sink
//!
//! Where processed frames end up. Only the most recent result is kept: a
//! new frame replaces the previous one, and an error replaces the error text
//! shown next to it.

use tokio::sync::watch;

use crate::types::{ImagePayload, ProcessedResult};

/// Consumer of processing outcomes
pub trait ResultSink: Send + 'static {
    /// Show the latest outcome
    fn present(&mut self, result: ProcessedResult);

    /// Forget whatever is shown
    fn clear(&mut self);
}

/// What a display surface should show
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayState {
    /// Latest processed frame
    pub frame: Option<ImagePayload>,
    /// Latest error text
    pub error: Option<String>,
}

/// Sink that publishes the latest result through a watch channel
#[derive(Debug)]
pub struct LatestResult {
    tx: watch::Sender<DisplayState>,
}

impl LatestResult {
    pub fn new() -> (Self, watch::Receiver<DisplayState>) {
        let (tx, rx) = watch::channel(DisplayState::default());
        (Self { tx }, rx)
    }

    /// Current display state
    pub fn current(&self) -> DisplayState {
        self.tx.borrow().clone()
    }
}

impl ResultSink for LatestResult {
    fn present(&mut self, result: ProcessedResult) {
        // send_modify keeps publishing with no receivers left
        self.tx.send_modify(|display| match result {
            ProcessedResult::Frame(image) => {
                display.frame = Some(image);
                display.error = None;
            }
            ProcessedResult::Error(error) => display.error = Some(error.message),
        });
    }

    fn clear(&mut self) {
        self.tx.send_if_modified(|display| {
            let changed = display.frame.is_some() || display.error.is_some();
            *display = DisplayState::default();
            changed
        });
    }
}
