//! Driver owns the scheduler and runs the streaming event loop

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::Result;
use crate::connection::ConnectionEvent;
use crate::scheduler::{FrameUplink, Scheduler};
use crate::sink::ResultSink;
use crate::source::FrameSource;
use crate::types::{RefreshRate, SessionSnapshot};

/// UI request, answered through the attached reply channel
pub enum Command {
    Upload { source: Box<dyn FrameSource>, reply: oneshot::Sender<Result<()>> },
    Start { reply: oneshot::Sender<Result<()>> },
    Stop { reply: oneshot::Sender<Result<()>> },
    Restart { reply: oneshot::Sender<Result<()>> },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Upload { .. } => "upload",
            Command::Start { .. } => "start",
            Command::Stop { .. } => "stop",
            Command::Restart { .. } => "restart",
        }
    }
}

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Sender for UI commands
    pub commands: mpsc::Sender<Command>,
    /// Receiver for session snapshots
    pub snapshots: watch::Receiver<SessionSnapshot>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns the task that owns the session
///
/// A single task multiplexes connection events, UI commands and refresh
/// ticks, so the session never needs a lock. The ticker is only polled while
/// the scheduler has a tick armed.
pub struct Driver;

impl Driver {
    /// Spawn the driver task
    ///
    /// `events` comes from [`ConnectionManager::spawn`](crate::connection::ConnectionManager::spawn).
    /// Cancelling `cancel` stops the task.
    pub fn spawn<U, K>(
        scheduler: Scheduler<U, K>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        rate: RefreshRate,
        cancel: CancellationToken,
    ) -> DriverChannels
    where
        U: FrameUplink,
        K: ResultSink,
    {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(scheduler.snapshot());

        let cancel_task = cancel.clone();
        tokio::spawn(async move {
            Self::run(scheduler, events, command_rx, snapshot_tx, rate, cancel_task).await;
        });

        DriverChannels { commands: command_tx, snapshots: snapshot_rx, cancel }
    }

    async fn run<U, K>(
        mut scheduler: Scheduler<U, K>,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut commands: mpsc::Receiver<Command>,
        snapshots: watch::Sender<SessionSnapshot>,
        rate: RefreshRate,
        cancel: CancellationToken,
    ) where
        U: FrameUplink,
        K: ResultSink,
    {
        info!(hz = rate.hz(), "Driver task started");

        let mut ticker = tokio::time::interval(rate.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Driver cancelled");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => {
                        trace!(?event, "Connection event");
                        scheduler.on_connection_event(event);
                    }
                    None => {
                        warn!("Connection manager stopped, shutting down driver");
                        break;
                    }
                },

                command = commands.recv() => match command {
                    Some(command) => Self::handle(&mut scheduler, command),
                    None => {
                        debug!("All command senders dropped, shutting down driver");
                        break;
                    }
                },

                _ = ticker.tick(), if scheduler.is_armed() => {
                    ticks += 1;
                    scheduler.on_tick();
                }
            }

            let snapshot = scheduler.snapshot();
            snapshots.send_if_modified(|current| {
                if *current == snapshot {
                    return false;
                }
                if current.state != snapshot.state {
                    info!(from = %current.state, to = %snapshot.state, "Session state changed");
                }
                *current = snapshot;
                true
            });
        }

        // Leave a clean state behind for observers
        scheduler.stop();
        let _ = snapshots.send(scheduler.snapshot());
        info!(ticks, sent = scheduler.stats().frames_sent, "Driver task ended");
    }

    fn handle<U: FrameUplink, K: ResultSink>(scheduler: &mut Scheduler<U, K>, command: Command) {
        let name = command.name();
        let (outcome, reply) = match command {
            Command::Upload { source, reply } => {
                scheduler.upload(source);
                (Ok(()), reply)
            }
            Command::Start { reply } => (scheduler.start(), reply),
            Command::Stop { reply } => {
                scheduler.stop();
                (Ok(()), reply)
            }
            Command::Restart { reply } => (scheduler.restart(), reply),
        };

        match &outcome {
            Ok(()) => debug!(command = name, "Command applied"),
            Err(e) => debug!(command = name, "Command rejected: {}", e),
        }

        if reply.send(outcome).is_err() {
            trace!(command = name, "Caller went away before the reply");
        }
    }
}
