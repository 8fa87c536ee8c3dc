//! Error types for the streaming client.
//!
//! All errors implement `std::error::Error` and carry enough context for a
//! user-facing message. Errors raised by a UI command are returned
//! synchronously and leave the session unchanged; errors raised by the
//! connection or the media are converted into an [`ErrorInfo`](crate::ErrorInfo)
//! and recorded on the session.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: the processing service cannot be reached or the channel dropped
//! - **State Errors**: an operation was attempted in a state that does not allow it
//! - **Media Errors**: the uploaded file cannot be opened or decoded
//! - **Protocol Errors**: a packet from the service did not match the Socket.IO wire format
//!
//! ## Recovery
//!
//! ```rust
//! use lanevision::StreamError;
//!
//! let error = StreamError::connection_failed("connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{ConnectionState, SessionState};

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Cannot reach processing service: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Not connected to processing service (connection is {state})")]
    NotConnected { state: ConnectionState },

    #[error("Not ready: {reason}")]
    NotReady { reason: String },

    #[error("Cannot {operation} while session is {from}")]
    InvalidTransition { from: SessionState, operation: &'static str },

    #[error("Media error in {path}: {details}")]
    Media { path: PathBuf, details: String },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame encoding failed: {details}")]
    Encode { details: String },

    #[error("Protocol error in {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("Streaming client has shut down")]
    ClientClosed,
}

impl StreamError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Connection { .. } => true,
            StreamError::NotConnected { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::NotReady { .. } => false,
            StreamError::InvalidTransition { .. } => false,
            StreamError::Media { .. } => false,
            StreamError::File { .. } => false,
            StreamError::Encode { .. } => false,
            StreamError::Protocol { .. } => false,
            StreamError::Config { .. } => false,
            StreamError::ClientClosed => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Connection { .. } => vec![
                "Ensure the processing backend is running",
                "Check the configured host and port",
                "Start streaming again to reconnect",
            ],
            StreamError::NotConnected { .. } => vec![
                "Wait for the connection to be established",
                "Start streaming again once connected",
            ],
            StreamError::Timeout { .. } => vec![
                "Increase connect_timeout_ms",
                "Check network latency to the backend",
            ],
            StreamError::NotReady { .. } => vec!["Upload a video first"],
            StreamError::InvalidTransition { .. } => vec![
                "Stop the current session first",
                "Upload a new video to reset the session",
            ],
            StreamError::Media { .. } => vec![
                "Use an animated GIF or a directory of PNG/JPEG frames",
                "Verify the file is not truncated",
            ],
            StreamError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
            ],
            StreamError::Encode { .. } => vec!["Lower the JPEG quality", "Check frame dimensions"],
            StreamError::Protocol { .. } => vec![
                "Check the backend speaks Socket.IO v5 (Engine.IO v4)",
                "Verify backend and client versions match",
            ],
            StreamError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare against the documented defaults",
            ],
            StreamError::ClientClosed => vec!["Create a new client"],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        StreamError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for protocol errors.
    pub fn protocol(context: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Protocol { context: context.into(), details: details.into() }
    }

    /// Helper constructor for media errors.
    pub fn media(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        StreamError::Media { path: path.into(), details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        StreamError::File { path, source }
    }

    /// Helper constructor for the "no media loaded" rejection.
    pub fn not_ready(reason: impl Into<String>) -> Self {
        StreamError::NotReady { reason: reason.into() }
    }
}

impl From<serde_yaml_ng::Error> for StreamError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        StreamError::Config { details: err.to_string() }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::protocol("json payload", err.to_string())
    }
}

impl From<image::ImageError> for StreamError {
    fn from(err: image::ImageError) -> Self {
        StreamError::Encode { details: err.to_string() }
    }
}
