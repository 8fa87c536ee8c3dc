//! Connection actor
//!
//! Owns the transport for its whole life. Alternates between two phases:
//! idle (disconnected, waiting for a connect command) and serving (connected,
//! multiplexing outbound frames, inbound packets and the heartbeat deadline).

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::transport::{Connector, TextSink, TextStream};
use super::{ConnectionEvent, ConnectionOptions, DisconnectReason};
use crate::config::Endpoint;
use crate::protocol::{EnginePacket, OpenHandshake, ServerEvent, SocketBody, SocketPacket, image_event};
use crate::types::{ConnectionState, ErrorInfo, FramePayload};
use crate::{Result, StreamError};

/// Requests from [`ConnectionManager`](super::ConnectionManager) handles
#[derive(Debug)]
pub(crate) enum Command {
    Connect(Endpoint),
    Reconnect,
    Send(FramePayload),
    Disconnect,
}

/// An established Socket.IO session
struct Link {
    sink: TextSink,
    stream: TextStream,
    handshake: OpenHandshake,
}

pub(crate) struct ConnectionActor<C> {
    connector: C,
    options: ConnectionOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    endpoint: Option<Endpoint>,
}

impl<C: Connector> ConnectionActor<C> {
    pub(crate) fn new(
        connector: C,
        options: ConnectionOptions,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        state: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self { connector, options, commands, events, state, cancel, endpoint: None }
    }

    pub(crate) async fn run(mut self) {
        debug!("Connection actor started");

        while let Some(endpoint) = self.idle().await {
            self.endpoint = Some(endpoint.clone());
            self.set_state(ConnectionState::Connecting);
            info!(%endpoint, "Connecting to processing service");

            let timeout = self.options.connect_timeout;
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                attempt = tokio::time::timeout(timeout, establish(&self.connector, &endpoint)) => attempt,
            };

            let link = match attempt {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => {
                    self.lost(DisconnectReason::ConnectFailed(failure_reason(&e)));
                    continue;
                }
                Err(_) => {
                    self.lost(DisconnectReason::ConnectFailed(format!(
                        "handshake timed out after {:?}",
                        timeout
                    )));
                    continue;
                }
            };

            info!(
                sid = %link.handshake.sid,
                ping_interval = link.handshake.ping_interval,
                ping_timeout = link.handshake.ping_timeout,
                "Connected to processing service"
            );
            self.set_state(ConnectionState::Connected);
            self.emit(ConnectionEvent::Connected);

            match self.serve(link).await {
                Some(reason) => self.lost(reason),
                None => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("Connection actor stopped");
    }

    /// Wait for something to connect to; `None` means shut down
    async fn idle(&mut self) -> Option<Endpoint> {
        loop {
            let command = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                command = self.commands.recv() => command?,
            };

            match command {
                Command::Connect(endpoint) => return Some(endpoint),
                Command::Reconnect => match &self.endpoint {
                    Some(endpoint) => return Some(endpoint.clone()),
                    None => warn!("Reconnect requested before any endpoint was configured"),
                },
                // Raced with a disconnect; the session learns from the event
                Command::Send(frame) => {
                    debug!(bytes = frame.image.len(), "Dropping frame, not connected")
                }
                Command::Disconnect => trace!("Disconnect while already disconnected"),
            }
        }
    }

    /// Run a connected link until it drops; `None` means shut down
    async fn serve(&mut self, link: Link) -> Option<DisconnectReason> {
        let Link { mut sink, mut stream, handshake } = link;
        let window = handshake.heartbeat_window();
        let max_payload = handshake.max_payload;

        let heartbeat = tokio::time::sleep(window);
        tokio::pin!(heartbeat);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    close(&mut sink).await;
                    return None;
                }

                command = self.commands.recv() => match command {
                    None => {
                        close(&mut sink).await;
                        return None;
                    }
                    Some(Command::Connect(endpoint)) => {
                        if self.endpoint.as_ref() != Some(&endpoint) {
                            warn!(%endpoint, "Already connected elsewhere, ignoring connect");
                        }
                    }
                    Some(Command::Reconnect) => trace!("Reconnect while connected"),
                    Some(Command::Disconnect) => {
                        info!("Disconnecting from processing service");
                        close(&mut sink).await;
                        return Some(DisconnectReason::ClientRequested);
                    }
                    Some(Command::Send(frame)) => {
                        let text = image_event(&frame).into_engine().encode();
                        let len = text.len() as u64;
                        if max_payload.is_some_and(|limit| len > limit) {
                            warn!(bytes = len, limit = ?max_payload, "Frame exceeds server payload limit");
                            self.emit(ConnectionEvent::ProcessingError(ErrorInfo::processing(format!(
                                "Frame of {} bytes exceeds the server limit of {} bytes",
                                len,
                                max_payload.unwrap_or_default()
                            ))));
                            continue;
                        }
                        if let Err(e) = sink.send(text).await {
                            return Some(DisconnectReason::Transport(failure_reason(&e)));
                        }
                        trace!(bytes = len, position = ?frame.position, "Frame sent");
                    }
                },

                inbound = stream.next() => {
                    let text = match inbound {
                        Some(Ok(text)) => text,
                        Some(Err(e)) => return Some(DisconnectReason::Transport(failure_reason(&e))),
                        None => return Some(DisconnectReason::ServerClosed),
                    };
                    heartbeat.as_mut().reset(Instant::now() + window);

                    match self.handle_inbound(&text, &mut sink).await {
                        Ok(None) => {}
                        Ok(Some(reason)) => return Some(reason),
                        Err(e) => warn!("Ignoring malformed packet: {}", e),
                    }
                }

                _ = &mut heartbeat => {
                    warn!(?window, "No heartbeat from server");
                    return Some(DisconnectReason::PingTimeout);
                }
            }
        }
    }

    async fn handle_inbound(
        &mut self,
        text: &str,
        sink: &mut TextSink,
    ) -> Result<Option<DisconnectReason>> {
        match EnginePacket::decode(text)? {
            EnginePacket::Ping(data) => {
                trace!("Ping");
                if let Err(e) = sink.send(EnginePacket::Pong(data).encode()).await {
                    return Ok(Some(DisconnectReason::Transport(failure_reason(&e))));
                }
            }
            EnginePacket::Close => return Ok(Some(DisconnectReason::ServerClosed)),
            EnginePacket::Message(body) => {
                let packet = SocketPacket::decode(&body)?;
                if !packet.is_default_namespace() {
                    trace!(namespace = %packet.namespace, "Ignoring packet for other namespace");
                    return Ok(None);
                }
                match packet.body {
                    SocketBody::Event { data, .. } => match ServerEvent::from_event(&data)? {
                        ServerEvent::Processed(image) => {
                            trace!(bytes = image.len(), "Processed frame received");
                            self.emit(ConnectionEvent::Result(image));
                        }
                        ServerEvent::ProcessingError(error) => {
                            debug!(%error, "Processing error received");
                            self.emit(ConnectionEvent::ProcessingError(error));
                        }
                        ServerEvent::Unknown(name) => debug!(event = %name, "Ignoring event"),
                    },
                    SocketBody::Disconnect => return Ok(Some(DisconnectReason::ServerClosed)),
                    SocketBody::ConnectError(data) => {
                        warn!("Namespace error: {}", connect_error_message(&data));
                        return Ok(Some(DisconnectReason::ServerClosed));
                    }
                    SocketBody::Connect(_) | SocketBody::Ack { .. } => {
                        trace!("Ignoring unexpected socket packet")
                    }
                }
            }
            EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
        }
        Ok(None)
    }

    fn lost(&mut self, reason: DisconnectReason) {
        if reason.is_failure() {
            warn!(%reason, "Connection lost");
        } else {
            info!(%reason, "Disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
        self.emit(ConnectionEvent::Disconnected(reason));
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "Connection state");
            *current = state;
            true
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

/// Engine.IO open, then Socket.IO namespace connect
async fn establish<C: Connector>(connector: &C, endpoint: &Endpoint) -> Result<Link> {
    let (mut sink, mut stream) = connector.connect(&endpoint.websocket_url()).await?;

    let handshake = loop {
        match next_packet(&mut stream).await? {
            EnginePacket::Open(handshake) => break handshake,
            EnginePacket::Noop => continue,
            other => {
                return Err(StreamError::protocol(
                    "handshake",
                    format!("expected open packet, got {:?}", other),
                ));
            }
        }
    };
    debug!(sid = %handshake.sid, max_payload = ?handshake.max_payload, "Engine.IO session opened");

    sink.send(SocketPacket::connect().into_engine().encode()).await?;

    loop {
        match next_packet(&mut stream).await? {
            EnginePacket::Ping(data) => sink.send(EnginePacket::Pong(data).encode()).await?,
            EnginePacket::Message(body) => {
                let packet = SocketPacket::decode(&body)?;
                if !packet.is_default_namespace() {
                    continue;
                }
                match packet.body {
                    SocketBody::Connect(_) => break,
                    SocketBody::ConnectError(data) => {
                        return Err(StreamError::connection_failed(format!(
                            "namespace connect refused: {}",
                            connect_error_message(&data)
                        )));
                    }
                    other => trace!(?other, "Ignoring packet before connect ack"),
                }
            }
            EnginePacket::Close => {
                return Err(StreamError::connection_failed("server closed during handshake"));
            }
            _ => {}
        }
    }

    Ok(Link { sink, stream, handshake })
}

async fn next_packet(stream: &mut TextStream) -> Result<EnginePacket> {
    match stream.next().await {
        Some(text) => EnginePacket::decode(&text?),
        None => Err(StreamError::connection_failed("connection closed during handshake")),
    }
}

async fn close(sink: &mut TextSink) {
    if let Err(e) = sink.send(SocketPacket::disconnect().into_engine().encode()).await {
        debug!("Disconnect packet not delivered: {}", e);
    }
    if let Err(e) = sink.close().await {
        debug!("Transport close failed: {}", e);
    }
}

/// `connect_error` carries either `{"message": ...}` or a bare value
fn connect_error_message(data: &Value) -> String {
    match data {
        Value::Object(map) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => data.to_string(),
        },
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Reason text without the error's own prefix
fn failure_reason(error: &StreamError) -> String {
    match error {
        StreamError::Connection { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}
