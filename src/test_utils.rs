//! Test utilities: recording doubles, scripted media and a fake processing service
//!
//! The fake service speaks just enough Engine.IO/Socket.IO to drive the real
//! connection actor over an in-memory transport, so connection tests need no
//! sockets.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use image::{Rgb, RgbImage};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::PollSender;

use crate::connection::{Connector, TextSink, TextStream};
use crate::protocol::{
    IMAGE_EVENT, PROCESSING_ERROR_EVENT, RESULT_EVENT, SocketBody, SocketPacket,
};
use crate::scheduler::FrameUplink;
use crate::sink::ResultSink;
use crate::source::{FrameCapture, FrameSource};
use crate::types::{
    ConnectionState, ErrorInfo, FramePayload, ImagePayload, ProcessedResult,
};
use crate::{Result, StreamError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Smallest byte string that still looks like a JPEG
pub fn fake_jpeg() -> ImagePayload {
    ImagePayload::jpeg(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9])
}

/// Frame payload with a fake JPEG body
pub fn test_frame(position: Duration) -> FramePayload {
    FramePayload::new(fake_jpeg(), 64, 36, position)
}

/// Smooth RGB gradient, roughly what a dashcam frame compresses like
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 96])
    })
}

// ---------------------------------------------------------------------------
// Recording doubles
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct UplinkLog {
    state: ConnectionState,
    frames: Vec<FramePayload>,
    reconnects: usize,
    reject: bool,
}

/// [`FrameUplink`] that records frames instead of sending them
#[derive(Debug, Clone, Default)]
pub struct RecordingUplink {
    log: Arc<Mutex<UplinkLog>>,
}

impl RecordingUplink {
    pub fn connected() -> Self {
        let uplink = Self::default();
        uplink.set_state(ConnectionState::Connected);
        uplink
    }

    pub fn set_state(&self, state: ConnectionState) {
        lock(&self.log).state = state;
    }

    /// Fail every following send as if the link had just dropped
    pub fn reject_sends(&self) {
        lock(&self.log).reject = true;
    }

    /// Number of frames accepted
    pub fn sent(&self) -> u64 {
        lock(&self.log).frames.len() as u64
    }

    pub fn frames(&self) -> Vec<FramePayload> {
        lock(&self.log).frames.clone()
    }

    pub fn reconnects(&self) -> usize {
        lock(&self.log).reconnects
    }
}

impl FrameUplink for RecordingUplink {
    fn state(&self) -> ConnectionState {
        lock(&self.log).state
    }

    fn send(&self, frame: FramePayload) -> Result<()> {
        let mut log = lock(&self.log);
        if log.reject {
            return Err(StreamError::NotConnected { state: ConnectionState::Disconnected });
        }
        if log.state != ConnectionState::Connected {
            return Err(StreamError::NotConnected { state: log.state });
        }
        log.frames.push(frame);
        Ok(())
    }

    fn reconnect(&self) {
        lock(&self.log).reconnects += 1;
    }
}

#[derive(Debug, Default)]
struct SinkLog {
    frames: usize,
    last_error: Option<String>,
    clears: usize,
}

/// [`ResultSink`] that counts what it is shown
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    pub fn frames(&self) -> usize {
        lock(&self.log).frames
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.log).last_error.clone()
    }

    pub fn clears(&self) -> usize {
        lock(&self.log).clears
    }
}

impl ResultSink for RecordingSink {
    fn present(&mut self, result: ProcessedResult) {
        let mut log = lock(&self.log);
        match result {
            ProcessedResult::Frame(_) => log.frames += 1,
            ProcessedResult::Error(error) => log.last_error = Some(error.message),
        }
    }

    fn clear(&mut self) {
        lock(&self.log).clears += 1;
    }
}

/// [`FrameSource`] with a fixed script: some not-ready captures, then frames, then the end
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    name: String,
    warmup: usize,
    frames: usize,
    broken: bool,
    warmed: usize,
    captured: usize,
    playing: bool,
}

impl ScriptedSource {
    pub fn frames(name: &str, frames: usize) -> Self {
        Self::warming_up(name, 0, frames)
    }

    /// `warmup` captures report `NotReady` before the first frame
    pub fn warming_up(name: &str, warmup: usize, frames: usize) -> Self {
        Self {
            name: name.to_string(),
            warmup,
            frames,
            broken: false,
            warmed: 0,
            captured: 0,
            playing: false,
        }
    }

    /// Every capture fails
    pub fn broken(name: &str) -> Self {
        Self { broken: true, ..Self::frames(name, 0) }
    }
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self) -> FrameCapture {
        if self.broken {
            return FrameCapture::Failed(ErrorInfo::media("Error playing the selected video file"));
        }
        if !self.playing {
            return FrameCapture::Ended;
        }
        if self.warmed < self.warmup {
            self.warmed += 1;
            return FrameCapture::NotReady;
        }
        if self.captured >= self.frames {
            self.playing = false;
            return FrameCapture::Ended;
        }
        let position = Duration::from_millis(40 * self.captured as u64);
        self.captured += 1;
        FrameCapture::Ready(test_frame(position))
    }

    fn play_from_start(&mut self) {
        self.captured = 0;
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }
}

// ---------------------------------------------------------------------------
// Fake processing service
// ---------------------------------------------------------------------------

/// How the fake service answers `image` events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// `response_back` with the received image
    Echo,
    /// `processing_error` with `{"error": "Failed to decode frame"}`
    ProcessingError,
    /// No answer at all
    Silent,
}

/// Engine.IO parameters advertised in the open packet
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_payload: Option<u64>,
    /// Answer the namespace connect with `connect_error` carrying this message
    pub refuse_namespace: Option<String>,
    /// Never send the open packet
    pub mute_handshake: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(20_000),
            max_payload: Some(1_000_000),
            refuse_namespace: None,
            mute_handshake: false,
        }
    }
}

impl ServiceState {
    fn reply_with(&self, packet: SocketPacket) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(packet.into_engine().encode());
        }
    }
}

#[derive(Debug)]
struct ServiceState {
    options: ServiceOptions,
    reply: ReplyMode,
    to_client: Option<mpsc::UnboundedSender<String>>,
    images: Vec<String>,
    pongs: usize,
    connections: usize,
    client_disconnects: usize,
}

/// In-memory Socket.IO service; also the [`Connector`] that reaches it
#[derive(Debug, Clone)]
pub struct FakeService {
    state: Arc<Mutex<ServiceState>>,
    refuse: Arc<AtomicBool>,
}

impl Default for FakeService {
    fn default() -> Self {
        Self::new(ServiceOptions::default())
    }
}

impl FakeService {
    pub fn new(options: ServiceOptions) -> Self {
        let state = ServiceState {
            options,
            reply: ReplyMode::Echo,
            to_client: None,
            images: Vec::new(),
            pongs: 0,
            connections: 0,
            client_disconnects: 0,
        };
        Self { state: Arc::new(Mutex::new(state)), refuse: Arc::new(AtomicBool::new(false)) }
    }

    pub fn set_reply(&self, reply: ReplyMode) {
        lock(&self.state).reply = reply;
    }

    /// Refuse transport connections, like a backend that is not running
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Data URLs received in `image` events
    pub fn images(&self) -> Vec<String> {
        lock(&self.state).images.clone()
    }

    pub fn pongs(&self) -> usize {
        lock(&self.state).pongs
    }

    /// Successful transport connections so far
    pub fn connections(&self) -> usize {
        lock(&self.state).connections
    }

    /// Namespace disconnects sent by the client
    pub fn client_disconnects(&self) -> usize {
        lock(&self.state).client_disconnects
    }

    /// Send a raw Engine.IO packet to the connected client
    pub fn push(&self, text: impl Into<String>) -> bool {
        let state = lock(&self.state);
        match &state.to_client {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    pub fn ping(&self) -> bool {
        self.push("2")
    }

    /// Emit a Socket.IO event on the default namespace
    pub fn emit(&self, name: &str, args: Vec<Value>) -> bool {
        self.push(SocketPacket::event(name, args).into_engine().encode())
    }

    /// Drop the server side; the client sees its stream end
    pub fn drop_connection(&self) {
        lock(&self.state).to_client = None;
    }

    fn handle(&self, text: &str) {
        let mut state = lock(&self.state);

        match text.as_bytes().first() {
            Some(b'3') => state.pongs += 1,
            Some(b'4') => {
                let Ok(packet) = SocketPacket::decode(&text[1..]) else {
                    return;
                };
                match packet.body {
                    SocketBody::Connect(_) => {
                        let answer = match &state.options.refuse_namespace {
                            Some(message) => {
                                SocketPacket::new(SocketBody::ConnectError(json!({ "message": message })))
                            }
                            None => SocketPacket::new(SocketBody::Connect(Some(
                                json!({ "sid": "fake-socket" }),
                            ))),
                        };
                        state.reply_with(answer);
                    }
                    SocketBody::Disconnect => state.client_disconnects += 1,
                    SocketBody::Event { data, .. } => {
                        if data.first().and_then(Value::as_str) != Some(IMAGE_EVENT) {
                            return;
                        }
                        let url = data.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
                        state.images.push(url.clone());
                        let answer = match state.reply {
                            ReplyMode::Echo => {
                                Some(SocketPacket::event(RESULT_EVENT, vec![Value::String(url)]))
                            }
                            ReplyMode::ProcessingError => Some(SocketPacket::event(
                                PROCESSING_ERROR_EVENT,
                                vec![json!({ "error": "Failed to decode frame" })],
                            )),
                            ReplyMode::Silent => None,
                        };
                        if let Some(answer) = answer {
                            state.reply_with(answer);
                        }
                    }
                    SocketBody::Ack { .. } | SocketBody::ConnectError(_) => {}
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Connector for FakeService {
    async fn connect(&self, _url: &str) -> Result<(TextSink, TextStream)> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StreamError::connection_failed("connection refused"));
        }

        let (to_client, from_server) = mpsc::unbounded_channel::<String>();
        let (to_server, mut from_client) = mpsc::channel::<String>(64);

        {
            let mut state = lock(&self.state);
            state.connections += 1;
            if !state.options.mute_handshake {
                let open = json!({
                    "sid": format!("fake-{}", state.connections),
                    "upgrades": [],
                    "pingInterval": state.options.ping_interval.as_millis() as u64,
                    "pingTimeout": state.options.ping_timeout.as_millis() as u64,
                    "maxPayload": state.options.max_payload,
                });
                let _ = to_client.send(format!("0{}", open));
            }
            state.to_client = Some(to_client);
        }

        let service = self.clone();
        tokio::spawn(async move {
            while let Some(text) = from_client.recv().await {
                service.handle(&text);
            }
        });

        let sink = PollSender::new(to_server)
            .sink_map_err(|_| StreamError::connection_failed("in-memory transport closed"));
        let stream = UnboundedReceiverStream::new(from_server).map(Ok::<String, StreamError>);

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
