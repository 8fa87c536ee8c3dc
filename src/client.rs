//! UI-facing streaming client

use std::path::Path;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionOptions, Connector};
use crate::driver::{Command, Driver};
use crate::scheduler::Scheduler;
use crate::sink::{DisplayState, LatestResult};
use crate::source::{FrameSource, MediaOptions, MediaSource};
use crate::types::{ConnectionState, ErrorKind, SessionSnapshot, SessionState};
use crate::{Result, StreamError};

/// Handle to a running streaming session
///
/// Commands are answered by the driver task, so `start` returns only after
/// the session has actually changed (or refused to). Dropping the client
/// shuts the driver and the connection down.
pub struct StreamClient {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    display: watch::Receiver<DisplayState>,
    connection: ConnectionManager,
    media: MediaOptions,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Spawn the connection actor and the driver; does not connect yet
    pub fn spawn<C: Connector>(config: &ClientConfig, connector: C) -> Self {
        let cancel = CancellationToken::new();

        let (connection, events) =
            ConnectionManager::spawn(connector, ConnectionOptions::from(config), cancel.clone());
        let (sink, display) = LatestResult::new();
        let scheduler = Scheduler::new(connection.clone(), sink);
        let channels = Driver::spawn(scheduler, events, config.refresh_rate(), cancel.clone());

        Self {
            commands: channels.commands,
            snapshots: channels.snapshots,
            display,
            connection,
            media: MediaOptions { quality: config.quality(), sequence_fps: config.sequence_fps },
            cancel,
        }
    }

    /// Load media from disk and make it the current session
    pub async fn upload<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let source = MediaSource::open(path, self.media).await?;
        self.upload_source(Box::new(source)).await
    }

    /// Make an already opened source the current session
    pub async fn upload_source(&self, source: Box<dyn FrameSource>) -> Result<()> {
        self.request(|reply| Command::Upload { source, reply }).await
    }

    /// Start streaming from the beginning of the media
    ///
    /// Fails with `NotReady` without media and with `NotConnected` while the
    /// connection is down; the latter also triggers a reconnect.
    pub async fn start(&self) -> Result<()> {
        self.request(|reply| Command::Start { reply }).await
    }

    /// Stop streaming and keep the media
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Stream an ended session again from the start
    pub async fn restart(&self) -> Result<()> {
        self.request(|reply| Command::Restart { reply }).await
    }

    /// Current session snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Session snapshots, starting with the current one
    pub fn session_updates(&self) -> impl Stream<Item = SessionSnapshot> + 'static {
        WatchStream::new(self.snapshots.clone())
    }

    /// What the display should show right now
    pub fn display(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    /// Display changes, starting with the current state
    pub fn display_updates(&self) -> impl Stream<Item = DisplayState> + 'static {
        WatchStream::new(self.display.clone())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Wait for the first snapshot matching `predicate`
    pub async fn wait_for<F>(&self, predicate: F) -> Result<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots.wait_for(predicate).await.map_err(|_| StreamError::ClientClosed)?;
        Ok(snapshot.clone())
    }

    /// Wait for the handshake, failing early when the session reports a new
    /// connection error
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut state = self.connection.state_updates();
        let mut snapshots = self.snapshots.clone();
        let stale = snapshots.borrow().last_error.clone();

        let wait = async {
            loop {
                if *state.borrow_and_update() == ConnectionState::Connected {
                    return Ok(());
                }
                let failure = snapshots
                    .borrow_and_update()
                    .last_error
                    .clone()
                    .filter(|error| error.kind == ErrorKind::Connection && stale.as_ref() != Some(error));
                if let Some(error) = failure {
                    return Err(StreamError::connection_failed(error.message));
                }

                tokio::select! {
                    changed = state.changed() => changed.map_err(|_| StreamError::ClientClosed)?,
                    changed = snapshots.changed() => changed.map_err(|_| StreamError::ClientClosed)?,
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| StreamError::Timeout { duration: timeout })?
    }

    /// Whether the session reached a state only a user action can leave
    pub fn is_finished(&self) -> bool {
        matches!(self.snapshots.borrow().state, SessionState::Ended | SessionState::Error)
    }

    /// Stop the driver and close the connection
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Shutting down streaming client");
            self.cancel.cancel();
        }
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(build(reply_tx)).await.map_err(|_| StreamError::ClientClosed)?;
        reply_rx.await.map_err(|_| StreamError::ClientClosed)?
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        debug!("Dropping streaming client");
        self.cancel.cancel();
    }
}
