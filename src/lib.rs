//! Backpressured frame streaming client for a remote lane-detection service.
//!
//! LaneVision plays a local video, samples its current frame on every
//! refresh tick, JPEG-encodes it and ships it to a Socket.IO processing
//! service. At most one frame is ever in flight: the next frame is only
//! captured after the service answered the previous one, so a slow backend
//! lowers the frame rate instead of building a queue.
//!
//! # Features
//!
//! - **Flow control**: one outstanding frame, paced by the refresh rate
//! - **Session lifecycle**: upload, start, stop, restart with explicit errors
//! - **Socket.IO v5**: handshake, heartbeat and events over a websocket
//! - **Media**: animated GIFs, still images and directories of frames
//!
//! ## Example
//!
//! ```rust,no_run
//! use lanevision::{ClientConfig, LaneVision, SessionState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = LaneVision::connect(ClientConfig::default()).await?;
//!     client.upload("/path/to/drive.gif").await?;
//!     client.start().await?;
//!
//!     let done = client
//!         .wait_for(|s| matches!(s.state, SessionState::Ended | SessionState::Error))
//!         .await?;
//!     println!("{} frames processed", done.stats.results_received);
//!     Ok(())
//! }
//! ```

use tracing::{info, warn};

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Streaming pipeline
pub mod client;
pub mod config;
pub mod connection;
pub mod driver;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod source;

// Core exports
pub use error::*;
pub use types::*;

pub use client::StreamClient;
pub use config::{ClientConfig, Endpoint};
pub use connection::{
    ConnectionEvent, ConnectionManager, Connector, DisconnectReason, WebSocketConnector,
};
pub use scheduler::{FrameUplink, Scheduler};
pub use session::Session;
pub use sink::{DisplayState, LatestResult, ResultSink};
pub use source::{FrameCapture, FrameSource, JpegQuality, MediaOptions, MediaSource};

/// Entry point for streaming sessions
pub struct LaneVision;

impl LaneVision {
    /// Connect to the configured service over a websocket
    pub async fn connect(config: ClientConfig) -> Result<StreamClient> {
        Self::connect_with(config, WebSocketConnector).await
    }

    /// Connect through a custom transport
    ///
    /// Returns once the handshake completed or the connect timeout elapsed.
    /// A failed first attempt is not an error here: the session shows it, and
    /// the next `start` reconnects.
    pub async fn connect_with<C: Connector>(config: ClientConfig, connector: C) -> Result<StreamClient> {
        config.validate()?;

        let client = StreamClient::spawn(&config, connector);
        client.connection().connect(config.endpoint.clone())?;

        match client.wait_connected(config.connect_timeout()).await {
            Ok(()) => info!(endpoint = %config.endpoint, "Connected to processing service"),
            Err(e) => warn!(endpoint = %config.endpoint, "Processing service unavailable: {}", e),
        }

        Ok(client)
    }
}
