//! Frame payload types exchanged with the processing service

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Encoded still image (JPEG on the way out, whatever the service returns on the way in)
///
/// The bytes are shared via `Arc` so the payload can be handed to observers
/// without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// MIME type, e.g. `image/jpeg`
    pub mime: String,

    /// Encoded image bytes (zero-copy via Arc)
    pub data: Arc<[u8]>,
}

impl ImagePayload {
    /// Create a new image payload
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self { mime: mime.into(), data: data.into() }
    }

    /// Create a JPEG payload
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self::new("image/jpeg", data)
    }

    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload carries no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime", &self.mime)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// A single captured frame ready to be published to the service
///
/// There is no sequence number: at most one payload is in flight, so the
/// next response always belongs to it.
#[derive(Debug, Clone)]
pub struct FramePayload {
    /// Encoded image
    pub image: ImagePayload,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Playback position the frame was captured at
    pub position: Duration,
}

impl FramePayload {
    /// Create a new frame payload
    pub fn new(image: ImagePayload, width: u32, height: u32, position: Duration) -> Self {
        Self { image, width, height, position }
    }
}

/// What an [`ErrorInfo`] is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The channel to the service could not be established or was lost
    Connection,
    /// The service rejected or failed a single frame
    Processing,
    /// The local media could not be read
    Media,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connection => f.write_str("connection"),
            ErrorKind::Processing => f.write_str("processing"),
            ErrorKind::Media => f.write_str("media"),
        }
    }
}

/// User-facing error record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Processing, message)
    }

    pub fn media(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Media, message)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// Outcome of processing one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessedResult {
    /// The processed image returned by the service
    Frame(ImagePayload),
    /// The service could not process the frame
    Error(ErrorInfo),
}
