//! Media playback source backed by decoded frames

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::RgbImage;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use super::decode::{FrameBuffer, FrameFeeder, MediaKind, lock};
use super::encode::{JpegQuality, encode_jpeg};
use super::{FrameCapture, FrameSource};
use crate::types::{ErrorInfo, FramePayload};
use crate::{Result, StreamError};

/// Options for opening media
#[derive(Debug, Clone, Copy)]
pub struct MediaOptions {
    /// JPEG quality of captured frames
    pub quality: JpegQuality,
    /// Playback rate for still-image sequences
    pub sequence_fps: f64,
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self { quality: JpegQuality::DEFAULT, sequence_fps: 30.0 }
    }
}

#[derive(Debug, Clone, Copy)]
enum Playback {
    Paused,
    Playing { started_at: Instant },
    Finished,
}

/// Playable media, decoded on a background thread
///
/// Behaves like a muted, non-looping video element: `play_from_start`
/// rewinds and starts the clock, `capture` grabs whatever frame is on screen
/// at the current playback position.
pub struct MediaSource {
    name: String,
    buffer: Arc<Mutex<FrameBuffer>>,
    quality: JpegQuality,
    playback: Playback,
}

impl MediaSource {
    /// Open a GIF, a still image, or a directory of stills
    ///
    /// Returns as soon as the media type is known; frames are decoded in the
    /// background and `capture` reports `NotReady` until they arrive.
    pub async fn open<P: AsRef<Path>>(path: P, options: MediaOptions) -> Result<Self> {
        let fps = options.sequence_fps;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(StreamError::Config {
                details: format!("sequence_fps must be positive, got {}", fps),
            });
        }

        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let media_path = path.clone();
        let kind = tokio::task::spawn_blocking(move || MediaKind::detect(&media_path))
            .await
            .map_err(|e| StreamError::media(&path, format!("media detection failed: {}", e)))??;

        info!(media = %name, ?kind, "Opening media");

        let (source, feeder) = Self::progressive(name, options.quality);
        spawn_decoder(feeder, move |feeder| kind.decode_into(feeder, fps));

        Ok(source)
    }

    /// Source whose frames are supplied through the returned feeder
    pub fn progressive(name: impl Into<String>, quality: JpegQuality) -> (Self, FrameFeeder) {
        let buffer = Arc::new(Mutex::new(FrameBuffer::default()));
        let feeder = FrameFeeder::new(&buffer);
        let source = Self { name: name.into(), buffer, quality, playback: Playback::Paused };
        (source, feeder)
    }

    /// Fully buffered source from in-memory frames
    pub fn from_frames(
        name: impl Into<String>,
        frames: Vec<(RgbImage, Duration)>,
        quality: JpegQuality,
    ) -> Self {
        let (source, feeder) = Self::progressive(name, quality);
        for (image, duration) in frames {
            feeder.push(image, duration);
        }
        feeder.finish();
        source
    }

    /// Number of frames decoded so far
    pub fn buffered_frames(&self) -> usize {
        lock(&self.buffer).frames.len()
    }

    /// Total length, once decoding has finished
    pub fn duration(&self) -> Option<Duration> {
        let buffer = lock(&self.buffer);
        buffer.complete.then(|| buffer.buffered_until())
    }

    /// Whether the playback clock is running
    pub fn is_playing(&self) -> bool {
        matches!(self.playback, Playback::Playing { .. })
    }

    fn lookup(&mut self) -> Lookup {
        let buffer = lock(&self.buffer);

        // Dimensions unknown until the first frame is decoded
        if buffer.frames.is_empty() {
            return Lookup::Settled(match (&buffer.error, buffer.complete) {
                (Some(error), _) => FrameCapture::Failed(ErrorInfo::media(error.clone())),
                (None, true) => FrameCapture::Ended,
                (None, false) => FrameCapture::NotReady,
            });
        }

        let started_at = match self.playback {
            Playback::Playing { started_at } => started_at,
            Playback::Paused | Playback::Finished => return Lookup::Settled(FrameCapture::Ended),
        };
        let position = started_at.elapsed();

        let index = buffer.frames.partition_point(|frame| frame.end() <= position);
        let Some(frame) = buffer.frames.get(index) else {
            if let Some(error) = &buffer.error {
                return Lookup::Settled(FrameCapture::Failed(ErrorInfo::media(error.clone())));
            }
            if buffer.complete {
                debug!(media = %self.name, ?position, "Playback finished");
                self.playback = Playback::Finished;
                return Lookup::Settled(FrameCapture::Ended);
            }
            trace!(?position, buffered = ?buffer.buffered_until(), "Waiting for decoder");
            return Lookup::Settled(FrameCapture::NotReady);
        };

        Lookup::Frame { image: Arc::clone(&frame.image), position }
    }
}

/// Frame on screen at the playback position, or why there is none
enum Lookup {
    Frame { image: Arc<RgbImage>, position: Duration },
    Settled(FrameCapture),
}

/// Run `decode` on a blocking thread and record a panic as a decode failure
fn spawn_decoder<F>(feeder: FrameFeeder, decode: F)
where
    F: FnOnce(&FrameFeeder) + Send + 'static,
{
    let worker = feeder.clone();
    let handle = tokio::task::spawn_blocking(move || decode(&worker));
    tokio::spawn(async move {
        if let Err(e) = handle.await {
            error!("Media decoder stopped: {}", e);
            feeder.fail(format!("media decoder stopped: {}", e));
        }
    });
}

impl FrameSource for MediaSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self) -> FrameCapture {
        // Encoded outside the buffer lock so the decoder is never stalled
        let (image, position) = match self.lookup() {
            Lookup::Frame { image, position } => (image, position),
            Lookup::Settled(outcome) => return outcome,
        };

        let (width, height) = image.dimensions();
        match encode_jpeg(&image, self.quality) {
            Ok(image) => FrameCapture::Ready(FramePayload::new(image, width, height, position)),
            Err(e) => FrameCapture::Failed(ErrorInfo::media(e.to_string())),
        }
    }

    fn play_from_start(&mut self) {
        debug!(media = %self.name, "Playing from start");
        self.playback = Playback::Playing { started_at: Instant::now() };
    }

    fn pause(&mut self) {
        if self.is_playing() {
            debug!(media = %self.name, "Paused");
            self.playback = Playback::Paused;
        }
    }
}
