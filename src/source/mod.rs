//! Frame sources
//!
//! A [`FrameSource`] wraps local media and, on demand, produces the frame
//! currently on screen as an encoded still image. Capturing never blocks on
//! I/O: decoding happens elsewhere, and a source that has nothing to show yet
//! says so with [`FrameCapture::NotReady`].

mod decode;
mod encode;
mod media;

pub use decode::{FrameFeeder, MediaKind};
pub use encode::{JpegQuality, encode_jpeg};
pub use media::{MediaOptions, MediaSource};

use crate::types::{ErrorInfo, FramePayload};

/// Outcome of a capture attempt
#[derive(Debug, Clone)]
pub enum FrameCapture {
    /// Current frame, encoded
    Ready(FramePayload),
    /// Dimensions unknown or not enough data buffered; try again next tick
    NotReady,
    /// Media finished or paused; the session should end
    Ended,
    /// Media cannot be read at the current position
    Failed(ErrorInfo),
}

/// Trait for capturable media
///
/// Sources only read media state. The scheduler decides when to capture and
/// what to do with the outcome.
pub trait FrameSource: Send + 'static {
    /// Display name, usually the uploaded file name
    fn name(&self) -> &str;

    /// Grab the current frame
    ///
    /// Returns:
    /// - `Ready(frame)` - frame encoded at the current playback position
    /// - `NotReady` - nothing to show yet, not an error
    /// - `Ended` - playback finished or paused
    /// - `Failed(info)` - media is unreadable
    fn capture(&mut self) -> FrameCapture;

    /// Seek to the start offset and start playing
    fn play_from_start(&mut self);

    /// Stop the playback clock
    fn pause(&mut self);
}
