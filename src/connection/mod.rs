//! Connection to the processing service
//!
//! One connection per process. [`ConnectionManager`] is a cheap handle to an
//! actor task that owns the transport, speaks the Socket.IO protocol, and is
//! the only writer of [`ConnectionState`]. Everything the actor learns is
//! reported as a [`ConnectionEvent`] on the channel returned by
//! [`ConnectionManager::spawn`].
//!
//! Reconnection is manual: after a failure the actor idles until someone
//! calls [`ConnectionManager::connect`] or [`ConnectionManager::reconnect`].

mod actor;
mod transport;


pub use transport::{Connector, TextSink, TextStream, WebSocketConnector};

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ClientConfig, Endpoint};
use crate::scheduler::FrameUplink;
use crate::types::{ConnectionState, ErrorInfo, FramePayload, ImagePayload};
use crate::{Result, StreamError};

use actor::{Command, ConnectionActor};

/// Why the link went down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    ClientRequested,
    /// The server closed the socket or the namespace
    ServerClosed,
    /// No traffic within the server's heartbeat window
    PingTimeout,
    /// Read or write failed
    Transport(String),
    /// The connection or handshake never completed
    ConnectFailed(String),
}

impl DisconnectReason {
    /// Everything except a requested disconnect
    pub fn is_failure(&self) -> bool {
        !matches!(self, DisconnectReason::ClientRequested)
    }

    /// Text suitable for an error banner
    pub fn user_message(&self) -> String {
        match self {
            DisconnectReason::ConnectFailed(cause) => format!("Cannot connect to server: {}", cause),
            other => format!("Disconnected from server ({})", other),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientRequested => f.write_str("client requested"),
            DisconnectReason::ServerClosed => f.write_str("server closed the connection"),
            DisconnectReason::PingTimeout => f.write_str("ping timeout"),
            DisconnectReason::Transport(cause) => write!(f, "transport error: {}", cause),
            DisconnectReason::ConnectFailed(cause) => write!(f, "connect failed: {}", cause),
        }
    }
}

/// Something the connection wants the session to know
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake completed
    Connected,
    /// Link lost, or a connect attempt failed
    Disconnected(DisconnectReason),
    /// Processed frame for the in-flight request
    Result(ImagePayload),
    /// The in-flight request could not be processed
    ProcessingError(ErrorInfo),
}

/// Connection tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Upper bound on websocket connect plus Socket.IO handshake
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self { connect_timeout: Duration::from_secs(5) }
    }
}

impl From<&ClientConfig> for ConnectionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self { connect_timeout: config.connect_timeout() }
    }
}

/// Handle to the connection actor
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawn the actor; it stays disconnected until [`connect`](Self::connect)
    ///
    /// The actor stops when `cancel` fires or every handle is dropped.
    pub fn spawn<C: Connector>(
        connector: C,
        options: ConnectionOptions,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = ConnectionActor::new(connector, options, command_rx, event_tx, state_tx, cancel);
        tokio::spawn(actor.run());

        (Self { commands: command_tx, state: state_rx }, event_rx)
    }

    /// Connect to `endpoint`; ignored while already connecting or connected
    pub fn connect(&self, endpoint: Endpoint) -> Result<()> {
        self.command(Command::Connect(endpoint))
    }

    /// Connect again to the last endpoint
    pub fn reconnect(&self) -> Result<()> {
        self.command(Command::Reconnect)
    }

    /// Close the link; reported as `Disconnected(ClientRequested)`
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Emit a frame; fire-and-forget, only while connected
    pub fn send(&self, frame: FramePayload) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(StreamError::NotConnected { state });
        }
        self.command(Command::Send(frame))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that sees every state change
    pub fn state_updates(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the handshake completes
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut state = self.state.clone();
        match tokio::time::timeout(timeout, state.wait_for(|s| *s == ConnectionState::Connected))
            .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(StreamError::ClientClosed),
            Err(_) => Err(StreamError::Timeout { duration: timeout }),
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| StreamError::ClientClosed)
    }
}

impl FrameUplink for ConnectionManager {
    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn send(&self, frame: FramePayload) -> Result<()> {
        ConnectionManager::send(self, frame)
    }

    fn reconnect(&self) {
        match ConnectionManager::reconnect(self) {
            Ok(()) => debug!("Reconnect requested"),
            Err(e) => warn!("Cannot request reconnect: {}", e),
        }
    }
}
