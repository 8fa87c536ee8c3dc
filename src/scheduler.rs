//! Streaming scheduler
//!
//! Drives the capture, send, wait cycle. A refresh tick only captures when
//! the session is streaming and nothing is in flight; a frame is sent and the
//! scheduler then waits for the service to answer before arming the next
//! tick. That single in-flight frame is the only flow control.
//!
//! The scheduler is synchronous. The [`Driver`](crate::driver::Driver) owns
//! it and feeds it ticks, connection events and commands.

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionEvent, DisconnectReason};
use crate::session::{NO_MEDIA_MESSAGE, Session};
use crate::sink::ResultSink;
use crate::source::{FrameCapture, FrameSource};
use crate::types::{
    ConnectionState, ErrorInfo, FramePayload, ProcessedResult, SessionSnapshot, SessionState,
    StreamStats,
};
use crate::{Result, StreamError};

/// Outbound side of the connection, as the scheduler sees it
pub trait FrameUplink: Send + 'static {
    fn state(&self) -> ConnectionState;

    /// Fire-and-forget; `NotConnected` unless connected
    fn send(&self, frame: FramePayload) -> Result<()>;

    /// Ask the connection to come back; completion arrives as an event
    fn reconnect(&self);
}

/// Backpressured capture loop over one session
pub struct Scheduler<U, K> {
    session: Session,
    source: Option<Box<dyn FrameSource>>,
    uplink: U,
    sink: K,
    stats: StreamStats,
    sent_at: Option<Instant>,
}

impl<U: FrameUplink, K: ResultSink> Scheduler<U, K> {
    pub fn new(uplink: U, sink: K) -> Self {
        Self {
            session: Session::new(),
            source: None,
            uplink,
            sink,
            stats: StreamStats::default(),
            sent_at: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn uplink(&self) -> &U {
        &self.uplink
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Whether the next refresh tick should be delivered
    pub fn is_armed(&self) -> bool {
        self.session.is_armed()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.session.state(),
            source_name: self.session.source_name().map(str::to_owned),
            last_error: self.session.last_error().cloned(),
            outstanding_frame: self.session.outstanding_frame(),
            stats: self.stats,
        }
    }

    /// Replace the media; legal in every state and stops any running stream
    pub fn upload(&mut self, source: Box<dyn FrameSource>) {
        if let Some(mut previous) = self.source.take() {
            previous.pause();
            debug!(media = %previous.name(), "Previous media released");
        }
        self.session.load(source.name());
        self.source = Some(source);
        self.stats = StreamStats::default();
        self.sent_at = None;
        self.sink.clear();
    }

    /// Uploaded/Ended → Streaming from the start of the media
    pub fn start(&mut self) -> Result<()> {
        self.session.check_start()?;
        self.begin("start")
    }

    /// Ended → Streaming from the start of the media
    pub fn restart(&mut self) -> Result<()> {
        self.session.check_restart()?;
        self.begin("restart")
    }

    /// Stop streaming, keeping the media; a no-op unless streaming or failed
    pub fn stop(&mut self) {
        let was_streaming = self.session.is_streaming();
        if self.session.stop() && was_streaming {
            self.pause_source();
        }
    }

    /// One refresh tick
    pub fn on_tick(&mut self) {
        if !self.session.take_tick() {
            trace!(state = %self.session.state(), "Tick ignored");
            return;
        }

        if self.session.outstanding_frame() {
            self.session.arm();
            return;
        }

        let Some(source) = self.source.as_mut() else {
            self.fail(ErrorInfo::media(NO_MEDIA_MESSAGE));
            return;
        };

        match source.capture() {
            FrameCapture::NotReady => {
                self.stats.not_ready_ticks += 1;
                self.session.arm();
            }
            FrameCapture::Ended => {
                source.pause();
                self.session.end();
                info!(
                    sent = self.stats.frames_sent,
                    received = self.stats.results_received,
                    "Media finished"
                );
            }
            FrameCapture::Failed(error) => self.fail(error),
            FrameCapture::Ready(frame) => self.send(frame),
        }
    }

    /// Apply a connection event to the session
    pub fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                if self.session.clear_connection_error() {
                    debug!("Connection error cleared");
                }
            }
            ConnectionEvent::Disconnected(DisconnectReason::ClientRequested) => self.stop(),
            ConnectionEvent::Disconnected(reason) => {
                self.fail(ErrorInfo::connection(reason.user_message()));
            }
            ConnectionEvent::Result(image) => {
                if !self.settle() {
                    return;
                }
                self.stats.results_received += 1;
                self.sink.present(ProcessedResult::Frame(image));
                self.session.arm();
            }
            ConnectionEvent::ProcessingError(error) => {
                if !self.settle() {
                    return;
                }
                self.stats.processing_errors += 1;
                warn!(%error, "Frame not processed");
                self.session.note_error(error.clone());
                self.sink.present(ProcessedResult::Error(error));
                self.session.arm();
            }
        }
    }

    fn begin(&mut self, operation: &'static str) -> Result<()> {
        let Some(source) = self.source.as_mut() else {
            return Err(StreamError::not_ready(NO_MEDIA_MESSAGE));
        };

        let state = self.uplink.state();
        if state != ConnectionState::Connected {
            info!(%state, operation, "Not connected, requesting reconnect");
            self.uplink.reconnect();
            return Err(StreamError::NotConnected { state });
        }

        debug!(operation, media = %source.name(), "Rewinding media");
        source.play_from_start();
        self.sink.clear();
        self.stats = StreamStats::default();
        self.sent_at = None;

        // Legality was checked by the caller; both paths enter streaming the same way
        self.session.start()
    }

    fn send(&mut self, frame: FramePayload) {
        if !self.session.mark_outstanding() {
            return;
        }

        let bytes = frame.image.len();
        let position = frame.position;
        match self.uplink.send(frame) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.sent_at = Some(Instant::now());
                trace!(bytes, ?position, "Frame in flight");
            }
            Err(e) => {
                warn!("Frame send failed: {}", e);
                self.fail(ErrorInfo::connection(e.to_string()));
            }
        }
    }

    /// Release the in-flight slot; counts and drops stale responses
    fn settle(&mut self) -> bool {
        if !self.session.settle() {
            self.stats.stale_responses += 1;
            debug!(state = %self.session.state(), "Dropping stale response");
            return false;
        }
        if let Some(sent_at) = self.sent_at.take() {
            self.stats.last_round_trip = Some(sent_at.elapsed());
        }
        true
    }

    fn fail(&mut self, error: ErrorInfo) {
        if self.session.state() == SessionState::Streaming {
            self.pause_source();
        }
        self.sink.present(ProcessedResult::Error(error.clone()));
        self.session.fail(error);
        self.sent_at = None;
    }

    fn pause_source(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.pause();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingSink, RecordingUplink, ScriptedSource};
    use crate::types::{ErrorKind, ImagePayload};

    type TestScheduler = Scheduler<RecordingUplink, RecordingSink>;

    fn scheduler(frames: usize) -> (TestScheduler, RecordingUplink, RecordingSink) {
        let uplink = RecordingUplink::connected();
        let sink = RecordingSink::default();
        let mut scheduler = Scheduler::new(uplink.clone(), sink.clone());
        scheduler.upload(Box::new(ScriptedSource::frames("clip.gif", frames)));
        (scheduler, uplink, sink)
    }

    fn respond(scheduler: &mut TestScheduler) {
        scheduler.on_connection_event(ConnectionEvent::Result(ImagePayload::jpeg(vec![1, 2, 3])));
    }

    #[test]
    fn start_requires_media() {
        let uplink = RecordingUplink::connected();
        let mut scheduler = Scheduler::new(uplink.clone(), RecordingSink::default());
        let err = scheduler.start().unwrap_err();
        assert!(matches!(err, StreamError::NotReady { .. }));
        assert_eq!(scheduler.session().state(), SessionState::Idle);
        assert_eq!(uplink.sent(), 0);
    }

    #[test]
    fn start_when_disconnected_requests_reconnect() {
        let (mut scheduler, uplink, _) = scheduler(3);
        uplink.set_state(ConnectionState::Disconnected);

        let err = scheduler.start().unwrap_err();
        assert!(matches!(err, StreamError::NotConnected { state: ConnectionState::Disconnected }));
        assert_eq!(scheduler.session().state(), SessionState::Uploaded);
        assert_eq!(uplink.reconnects(), 1);
    }

    #[test]
    fn one_capture_per_response() {
        let (mut scheduler, uplink, sink) = scheduler(10);
        scheduler.start().unwrap();

        scheduler.on_tick();
        assert_eq!(uplink.sent(), 1);
        assert!(scheduler.session().outstanding_frame());

        // No tick is armed until the response arrives
        assert!(!scheduler.is_armed());
        for _ in 0..5 {
            scheduler.on_tick();
        }
        assert_eq!(uplink.sent(), 1);

        respond(&mut scheduler);
        assert!(scheduler.is_armed());
        assert_eq!(sink.frames(), 1);

        scheduler.on_tick();
        assert_eq!(uplink.sent(), 2);
        assert_eq!(scheduler.stats().results_received, 1);
        assert!(scheduler.stats().last_round_trip.is_some());
    }

    #[test]
    fn media_end_stops_streaming() {
        let (mut scheduler, uplink, _) = scheduler(1);
        scheduler.start().unwrap();

        scheduler.on_tick();
        respond(&mut scheduler);
        scheduler.on_tick();

        assert_eq!(scheduler.session().state(), SessionState::Ended);
        assert!(!scheduler.session().outstanding_frame());
        assert!(!scheduler.is_armed());

        scheduler.on_tick();
        assert_eq!(uplink.sent(), 1);
    }

    #[test]
    fn disconnect_while_streaming_fails_session() {
        let (mut scheduler, uplink, sink) = scheduler(10);
        scheduler.start().unwrap();
        scheduler.on_tick();

        uplink.set_state(ConnectionState::Disconnected);
        scheduler.on_connection_event(ConnectionEvent::Disconnected(DisconnectReason::PingTimeout));

        assert_eq!(scheduler.session().state(), SessionState::Error);
        assert!(!scheduler.session().outstanding_frame());
        assert!(!scheduler.is_armed());
        assert_eq!(scheduler.session().last_error().map(|e| e.kind), Some(ErrorKind::Connection));
        assert!(sink.last_error().is_some_and(|e| e.contains("ping timeout")));

        // Late response from before the drop
        respond(&mut scheduler);
        assert_eq!(scheduler.stats().stale_responses, 1);
        assert_eq!(sink.frames(), 0);

        scheduler.stop();
        assert_eq!(scheduler.session().state(), SessionState::Uploaded);
        assert!(scheduler.session().last_error().is_some());
        assert_eq!(uplink.sent(), 1);
    }

    #[test]
    fn processing_error_keeps_streaming() {
        let (mut scheduler, uplink, sink) = scheduler(10);
        scheduler.start().unwrap();
        scheduler.on_tick();

        scheduler.on_connection_event(ConnectionEvent::ProcessingError(ErrorInfo::processing(
            "Backend Error: Failed to decode frame",
        )));

        assert_eq!(scheduler.session().state(), SessionState::Streaming);
        assert!(!scheduler.session().outstanding_frame());
        assert_eq!(sink.last_error().as_deref(), Some("Backend Error: Failed to decode frame"));

        scheduler.on_tick();
        assert_eq!(uplink.sent(), 2);
        assert_eq!(scheduler.stats().processing_errors, 1);
    }

    #[test]
    fn restart_after_end_rewinds() {
        let (mut scheduler, uplink, _) = scheduler(1);
        scheduler.start().unwrap();
        scheduler.on_tick();
        respond(&mut scheduler);
        scheduler.on_tick();
        assert_eq!(scheduler.session().state(), SessionState::Ended);

        scheduler.restart().unwrap();
        assert_eq!(scheduler.session().state(), SessionState::Streaming);

        scheduler.on_tick();
        assert_eq!(uplink.sent(), 2);
        scheduler.on_tick();
        assert_eq!(uplink.sent(), 2);
        respond(&mut scheduler);
        scheduler.on_tick();
        assert_eq!(scheduler.session().state(), SessionState::Ended);
    }

    #[test]
    fn stop_prevents_armed_tick_from_sending() {
        let (mut scheduler, uplink, _) = scheduler(10);
        scheduler.start().unwrap();
        assert!(scheduler.is_armed());

        scheduler.stop();
        scheduler.on_tick();
        assert_eq!(uplink.sent(), 0);
        assert_eq!(scheduler.session().state(), SessionState::Uploaded);
    }

    #[test]
    fn response_after_stop_is_dropped() {
        let (mut scheduler, _, sink) = scheduler(10);
        scheduler.start().unwrap();
        scheduler.on_tick();
        scheduler.stop();

        respond(&mut scheduler);
        assert!(!scheduler.is_armed());
        assert_eq!(sink.frames(), 0);
        assert_eq!(scheduler.stats().stale_responses, 1);
    }

    #[test]
    fn not_ready_rearms_without_sending() {
        let uplink = RecordingUplink::connected();
        let mut scheduler = Scheduler::new(uplink.clone(), RecordingSink::default());
        scheduler.upload(Box::new(ScriptedSource::warming_up("slow.gif", 2, 3)));
        scheduler.start().unwrap();

        scheduler.on_tick();
        scheduler.on_tick();
        assert_eq!(uplink.sent(), 0);
        assert!(scheduler.is_armed());
        assert_eq!(scheduler.stats().not_ready_ticks, 2);

        scheduler.on_tick();
        assert_eq!(uplink.sent(), 1);
    }

    #[test]
    fn failed_capture_moves_to_error() {
        let uplink = RecordingUplink::connected();
        let mut scheduler = Scheduler::new(uplink.clone(), RecordingSink::default());
        scheduler.upload(Box::new(ScriptedSource::broken("bad.gif")));
        scheduler.start().unwrap();

        scheduler.on_tick();
        assert_eq!(scheduler.session().state(), SessionState::Error);
        assert_eq!(scheduler.session().last_error().map(|e| e.kind), Some(ErrorKind::Media));
        assert!(matches!(scheduler.start(), Err(StreamError::InvalidTransition { .. })));
    }

    #[test]
    fn send_rejected_moves_to_error() {
        let (mut scheduler, uplink, _) = scheduler(10);
        scheduler.start().unwrap();
        uplink.reject_sends();

        scheduler.on_tick();
        assert_eq!(scheduler.session().state(), SessionState::Error);
        assert!(!scheduler.session().outstanding_frame());
        assert_eq!(scheduler.stats().frames_sent, 0);
    }

    #[test]
    fn upload_while_streaming_resets() {
        let (mut scheduler, uplink, sink) = scheduler(10);
        scheduler.start().unwrap();
        scheduler.on_tick();
        respond(&mut scheduler);
        assert_eq!(sink.frames(), 1);

        scheduler.upload(Box::new(ScriptedSource::frames("next.gif", 5)));
        assert_eq!(scheduler.session().state(), SessionState::Uploaded);
        assert_eq!(scheduler.session().source_name(), Some("next.gif"));
        assert!(!scheduler.is_armed());
        assert_eq!(sink.clears(), 3);

        scheduler.on_tick();
        assert_eq!(uplink.sent(), 1);
    }

    #[test]
    fn reconnect_clears_connection_banner() {
        let (mut scheduler, uplink, _) = scheduler(10);
        uplink.set_state(ConnectionState::Disconnected);
        scheduler.on_connection_event(ConnectionEvent::Disconnected(
            DisconnectReason::ConnectFailed("refused".into()),
        ));
        assert_eq!(scheduler.session().state(), SessionState::Error);

        // The failed session keeps its cause until stopped
        uplink.set_state(ConnectionState::Connected);
        scheduler.on_connection_event(ConnectionEvent::Connected);
        assert_eq!(scheduler.session().state(), SessionState::Error);
        assert_eq!(scheduler.snapshot().last_error.map(|e| e.kind), Some(ErrorKind::Connection));

        scheduler.stop();
        assert!(scheduler.session().last_error().is_some());
        scheduler.on_connection_event(ConnectionEvent::Connected);
        assert!(scheduler.session().last_error().is_none());
        scheduler.start().unwrap();
    }

    #[test]
    fn client_disconnect_behaves_like_stop() {
        let (mut scheduler, _, _) = scheduler(10);
        scheduler.start().unwrap();
        scheduler.on_tick();

        scheduler
            .on_connection_event(ConnectionEvent::Disconnected(DisconnectReason::ClientRequested));
        assert_eq!(scheduler.session().state(), SessionState::Uploaded);
        assert!(scheduler.session().last_error().is_none());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Tick,
            Result,
            ProcessingError,
            Disconnect,
            Reconnect,
            Start,
            Stop,
            Restart,
            Upload,
        }

        fn step() -> impl Strategy<Value = Step> {
            prop_oneof![
                6 => Just(Step::Tick),
                3 => Just(Step::Result),
                1 => Just(Step::ProcessingError),
                1 => Just(Step::Disconnect),
                1 => Just(Step::Reconnect),
                2 => Just(Step::Start),
                1 => Just(Step::Stop),
                1 => Just(Step::Restart),
                1 => Just(Step::Upload),
            ]
        }

        proptest! {
            #[test]
            fn never_more_than_one_frame_in_flight(steps in prop::collection::vec(step(), 0..128)) {
                let (mut scheduler, uplink, _) = scheduler(8);

                for step in &steps {
                    let sent_before = uplink.sent();
                    let state_before = scheduler.session().state();
                    let outstanding_before = scheduler.session().outstanding_frame();
                    match step {
                        Step::Tick => scheduler.on_tick(),
                        Step::Result => respond(&mut scheduler),
                        Step::ProcessingError => {
                            scheduler.on_connection_event(ConnectionEvent::ProcessingError(
                                ErrorInfo::processing("boom"),
                            ));
                        }
                        Step::Disconnect => {
                            uplink.set_state(ConnectionState::Disconnected);
                            scheduler.on_connection_event(ConnectionEvent::Disconnected(
                                DisconnectReason::ServerClosed,
                            ));
                        }
                        Step::Reconnect => {
                            uplink.set_state(ConnectionState::Connected);
                            scheduler.on_connection_event(ConnectionEvent::Connected);
                        }
                        Step::Start => { let _ = scheduler.start(); }
                        Step::Stop => scheduler.stop(),
                        Step::Restart => { let _ = scheduler.restart(); }
                        Step::Upload => {
                            scheduler.upload(Box::new(ScriptedSource::frames("again.gif", 8)));
                        }
                    }

                    let sent = uplink.sent() - sent_before;
                    prop_assert!(sent <= 1, "{} frames sent by {:?}", sent, step);
                    if sent == 1 {
                        prop_assert!(matches!(step, Step::Tick));
                        prop_assert_eq!(state_before, SessionState::Streaming);
                        prop_assert!(!outstanding_before, "sent while a frame was in flight");
                        prop_assert!(scheduler.session().outstanding_frame());
                    }
                    if !scheduler.session().is_streaming() {
                        prop_assert!(!scheduler.is_armed());
                        prop_assert!(!scheduler.session().outstanding_frame());
                    }
                }
            }
        }
    }
}
