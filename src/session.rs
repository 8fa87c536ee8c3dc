//! Session state machine
//!
//! The [`Session`] is the single authority on what the client may do next.
//! It owns the lifecycle state, the last surfaced error, and the two flags
//! that drive backpressure: whether a frame is in flight and whether a
//! refresh tick is armed.
//!
//! Both flags can only be set while [`SessionState::Streaming`]. Every
//! transition out of streaming clears them, so a tick armed before a stop can
//! never lead to a send.

use tracing::{debug, info, warn};

use crate::types::{ErrorInfo, ErrorKind, SessionState};
use crate::{Result, StreamError};

/// Message shown when starting without media
pub const NO_MEDIA_MESSAGE: &str = "Please upload a video first";

/// Lifecycle state of one upload-to-completion cycle
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: SessionState,
    source_name: Option<String>,
    last_error: Option<ErrorInfo>,
    outstanding_frame: bool,
    tick_armed: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    pub fn outstanding_frame(&self) -> bool {
        self.outstanding_frame
    }

    pub fn is_armed(&self) -> bool {
        self.tick_armed
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// New media loaded; legal from every state
    pub fn load(&mut self, source_name: impl Into<String>) {
        let source_name = source_name.into();
        self.leave_streaming();
        info!(from = %self.state, media = %source_name, "Media uploaded");
        self.state = SessionState::Uploaded;
        self.source_name = Some(source_name);
        self.last_error = None;
    }

    /// Check whether `start` would be accepted, without changing anything
    pub fn check_start(&self) -> Result<()> {
        match self.state {
            SessionState::Idle => Err(StreamError::not_ready(NO_MEDIA_MESSAGE)),
            SessionState::Uploaded | SessionState::Ended => Ok(()),
            SessionState::Streaming | SessionState::Error => {
                Err(StreamError::InvalidTransition { from: self.state, operation: "start" })
            }
        }
    }

    /// Check whether `restart` would be accepted, without changing anything
    pub fn check_restart(&self) -> Result<()> {
        match self.state {
            SessionState::Idle => Err(StreamError::not_ready(NO_MEDIA_MESSAGE)),
            SessionState::Ended => Ok(()),
            _ => Err(StreamError::InvalidTransition { from: self.state, operation: "restart" }),
        }
    }

    /// Uploaded/Ended → Streaming, with the first tick armed
    pub fn start(&mut self) -> Result<()> {
        self.check_start()?;
        self.enter_streaming();
        Ok(())
    }

    /// Ended → Streaming, with the first tick armed
    pub fn restart(&mut self) -> Result<()> {
        self.check_restart()?;
        self.enter_streaming();
        Ok(())
    }

    /// Explicit stop
    ///
    /// Streaming and Error fall back to Uploaded (or Idle without media).
    /// Everywhere else this is a no-op. `last_error` is kept either way.
    /// Returns whether the state changed.
    pub fn stop(&mut self) -> bool {
        match self.state {
            SessionState::Streaming | SessionState::Error => {
                self.leave_streaming();
                let to = if self.source_name.is_some() {
                    SessionState::Uploaded
                } else {
                    SessionState::Idle
                };
                info!(from = %self.state, to = %to, "Session stopped");
                self.state = to;
                true
            }
            SessionState::Idle | SessionState::Uploaded | SessionState::Ended => {
                debug!(state = %self.state, "Stop ignored");
                false
            }
        }
    }

    /// Media reached its end while streaming
    pub fn end(&mut self) -> bool {
        if !self.is_streaming() {
            return false;
        }
        self.leave_streaming();
        self.state = SessionState::Ended;
        info!("Session ended");
        true
    }

    /// Any state → Error
    pub fn fail(&mut self, error: ErrorInfo) {
        self.leave_streaming();
        warn!(from = %self.state, %error, "Session failed");
        self.state = SessionState::Error;
        self.last_error = Some(error);
    }

    /// Record a non-fatal error without changing state
    pub fn note_error(&mut self, error: ErrorInfo) {
        self.last_error = Some(error);
    }

    /// Drop a connection error once the link is back
    ///
    /// A failed session keeps its error until it is stopped or replaced.
    pub fn clear_connection_error(&mut self) -> bool {
        if self.state == SessionState::Error {
            return false;
        }
        if self.last_error.as_ref().is_some_and(|e| e.kind == ErrorKind::Connection) {
            self.last_error = None;
            return true;
        }
        false
    }

    /// Arm the next refresh tick; refused outside streaming
    pub fn arm(&mut self) -> bool {
        if self.is_streaming() {
            self.tick_armed = true;
        }
        self.tick_armed
    }

    /// Consume an armed tick
    ///
    /// A tick that fires after the session left streaming finds nothing
    /// armed and must not capture.
    pub fn take_tick(&mut self) -> bool {
        if self.tick_armed && self.is_streaming() {
            self.tick_armed = false;
            true
        } else {
            false
        }
    }

    /// Claim the in-flight slot; refused outside streaming or when already taken
    pub fn mark_outstanding(&mut self) -> bool {
        if !self.is_streaming() || self.outstanding_frame {
            return false;
        }
        self.outstanding_frame = true;
        true
    }

    /// Release the in-flight slot for an arriving response
    ///
    /// Returns `false` for a stale response: one that arrives when not
    /// streaming or when nothing is in flight.
    pub fn settle(&mut self) -> bool {
        if !self.is_streaming() || !self.outstanding_frame {
            return false;
        }
        self.outstanding_frame = false;
        true
    }

    fn enter_streaming(&mut self) {
        info!(from = %self.state, media = ?self.source_name, "Streaming started");
        self.state = SessionState::Streaming;
        self.last_error = None;
        self.outstanding_frame = false;
        self.tick_armed = true;
    }

    fn leave_streaming(&mut self) {
        self.outstanding_frame = false;
        self.tick_armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming() -> Session {
        let mut session = Session::new();
        session.load("clip.gif");
        session.start().unwrap();
        session
    }

    #[test]
    fn upload_then_start() {
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::Idle);

        session.load("clip.gif");
        assert_eq!(session.state(), SessionState::Uploaded);
        assert_eq!(session.source_name(), Some("clip.gif"));

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.is_armed());
        assert!(!session.outstanding_frame());
    }

    #[test]
    fn start_without_media_is_not_ready() {
        let mut session = Session::new();
        let err = session.start().unwrap_err();
        assert!(matches!(err, StreamError::NotReady { .. }));
        assert_eq!(err.to_string(), "Not ready: Please upload a video first");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn start_while_streaming_is_rejected() {
        let mut session = streaming();
        assert!(matches!(session.start(), Err(StreamError::InvalidTransition { .. })));
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn only_stop_or_upload_leave_error() {
        let mut session = streaming();
        session.fail(ErrorInfo::connection("transport close"));
        assert_eq!(session.state(), SessionState::Error);

        assert!(session.start().is_err());
        assert!(session.restart().is_err());
        assert!(!session.arm());
        assert_eq!(session.state(), SessionState::Error);

        assert!(session.stop());
        assert_eq!(session.state(), SessionState::Uploaded);
        assert_eq!(session.last_error().map(|e| e.kind), Some(ErrorKind::Connection));

        session.fail(ErrorInfo::connection("again"));
        session.load("other.gif");
        assert_eq!(session.state(), SessionState::Uploaded);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn stop_when_idle_or_ended_keeps_last_error() {
        let mut session = Session::new();
        session.note_error(ErrorInfo::processing("bad frame"));
        assert!(!session.stop());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.last_error().is_some());

        let mut session = streaming();
        session.end();
        session.note_error(ErrorInfo::processing("late"));
        assert!(!session.stop());
        assert_eq!(session.state(), SessionState::Ended);
        assert!(session.last_error().is_some());
    }

    #[test]
    fn error_without_media_stops_to_idle() {
        let mut session = Session::new();
        session.fail(ErrorInfo::connection("refused"));
        assert!(session.stop());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn restart_only_from_ended() {
        let mut session = streaming();
        assert!(matches!(session.restart(), Err(StreamError::InvalidTransition { .. })));

        session.end();
        session.restart().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.is_armed());
    }

    #[test]
    fn stale_tick_after_stop_does_nothing() {
        let mut session = streaming();
        assert!(session.is_armed());
        session.stop();
        assert!(!session.take_tick());
        assert!(!session.mark_outstanding());
    }

    #[test]
    fn one_frame_in_flight() {
        let mut session = streaming();
        assert!(session.take_tick());
        assert!(session.mark_outstanding());
        assert!(!session.mark_outstanding());
        assert!(session.settle());
        assert!(!session.settle());
    }

    #[test]
    fn connection_error_cleared_on_reconnect() {
        let mut session = Session::new();
        session.note_error(ErrorInfo::processing("bad frame"));
        assert!(!session.clear_connection_error());
        assert!(session.last_error().is_some());

        session.fail(ErrorInfo::connection("ping timeout"));
        assert!(!session.clear_connection_error());
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.last_error().map(|e| e.kind), Some(ErrorKind::Connection));

        session.stop();
        assert!(session.clear_connection_error());
        assert!(session.last_error().is_none());
        assert_eq!(session.state(), SessionState::Idle);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Load,
            Start,
            Restart,
            Stop,
            End,
            Fail,
            NoteError,
            Reconnected,
            Arm,
            TakeTick,
            MarkOutstanding,
            Settle,
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                Just(Op::Load),
                Just(Op::Start),
                Just(Op::Restart),
                Just(Op::Stop),
                Just(Op::End),
                Just(Op::Fail),
                Just(Op::NoteError),
                Just(Op::Reconnected),
                Just(Op::Arm),
                Just(Op::TakeTick),
                Just(Op::MarkOutstanding),
                Just(Op::Settle),
            ]
        }

        fn apply(session: &mut Session, op: &Op) {
            match op {
                Op::Load => session.load("clip.gif"),
                Op::Start => {
                    let _ = session.start();
                }
                Op::Restart => {
                    let _ = session.restart();
                }
                Op::Stop => {
                    session.stop();
                }
                Op::End => {
                    session.end();
                }
                Op::Fail => session.fail(ErrorInfo::connection("lost")),
                Op::NoteError => session.note_error(ErrorInfo::processing("bad frame")),
                Op::Reconnected => {
                    session.clear_connection_error();
                }
                Op::Arm => {
                    session.arm();
                }
                Op::TakeTick => {
                    session.take_tick();
                }
                Op::MarkOutstanding => {
                    session.mark_outstanding();
                }
                Op::Settle => {
                    session.settle();
                }
            }
        }

        proptest! {
            #[test]
            fn flags_only_set_while_streaming(ops in prop::collection::vec(op(), 0..64)) {
                let mut session = Session::new();
                for op in &ops {
                    apply(&mut session, op);
                    if !session.is_streaming() {
                        prop_assert!(!session.outstanding_frame(), "outstanding after {:?}", op);
                        prop_assert!(!session.is_armed(), "armed after {:?}", op);
                    }
                }
            }

            #[test]
            fn error_state_only_left_by_stop_or_load(ops in prop::collection::vec(op(), 0..64)) {
                let mut session = Session::new();
                for op in &ops {
                    let before = session.state();
                    apply(&mut session, op);
                    if before == SessionState::Error && session.state() != SessionState::Error {
                        prop_assert!(matches!(op, Op::Stop | Op::Load), "left error via {:?}", op);
                    }
                    if session.state() == SessionState::Error {
                        prop_assert!(session.last_error().is_some(), "error state without cause after {:?}", op);
                    }
                }
            }
        }
    }
}
