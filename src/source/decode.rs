//! Media decoding into a progressively filled frame buffer

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, RgbImage};
use tracing::{debug, error, info};

use crate::{Result, StreamError};

/// Browsers stretch GIF delays at or below this to `GIF_DEFAULT_DELAY`
const GIF_MIN_DELAY: Duration = Duration::from_millis(10);
const GIF_DEFAULT_DELAY: Duration = Duration::from_millis(100);

const STILL_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// One decoded frame placed on the media timeline
#[derive(Debug, Clone)]
pub(crate) struct DecodedFrame {
    /// Shared so a capture can encode it without holding the buffer lock
    pub image: Arc<RgbImage>,
    pub start: Duration,
    pub duration: Duration,
}

impl DecodedFrame {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Frames decoded so far, shared between the decoder and the source
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    pub frames: Vec<DecodedFrame>,
    pub complete: bool,
    pub error: Option<String>,
}

impl FrameBuffer {
    /// End of the last buffered frame
    pub fn buffered_until(&self) -> Duration {
        self.frames.last().map(DecodedFrame::end).unwrap_or_default()
    }
}

pub(crate) fn lock(buffer: &Mutex<FrameBuffer>) -> std::sync::MutexGuard<'_, FrameBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write side of a [`FrameBuffer`]
///
/// Holds only a weak reference: once the owning source is dropped every
/// push reports `false` and the decoder stops.
#[derive(Debug, Clone)]
pub struct FrameFeeder {
    buffer: Weak<Mutex<FrameBuffer>>,
}

impl FrameFeeder {
    pub(crate) fn new(buffer: &Arc<Mutex<FrameBuffer>>) -> Self {
        Self { buffer: Arc::downgrade(buffer) }
    }

    /// Append a frame lasting `duration`; returns `false` when nobody is listening
    pub fn push(&self, image: RgbImage, duration: Duration) -> bool {
        let Some(buffer) = self.buffer.upgrade() else {
            return false;
        };
        let mut buffer = lock(&buffer);
        let start = buffer.buffered_until();
        buffer.frames.push(DecodedFrame { image: Arc::new(image), start, duration });
        true
    }

    /// Mark the media as fully decoded
    pub fn finish(&self) {
        if let Some(buffer) = self.buffer.upgrade() {
            lock(&buffer).complete = true;
        }
    }

    /// Record a decoding failure; frames already buffered stay playable
    pub fn fail(&self, message: impl Into<String>) {
        if let Some(buffer) = self.buffer.upgrade() {
            lock(&buffer).error = Some(message.into());
        }
    }
}

/// Container formats the client can play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// Animated GIF with per-frame delays
    Gif(PathBuf),
    /// Still images played back at a fixed rate, in file name order
    Sequence(Vec<PathBuf>),
}

impl MediaKind {
    /// Inspect a path and decide how to decode it
    pub fn detect(path: &Path) -> Result<Self> {
        let metadata =
            std::fs::metadata(path).map_err(|e| StreamError::file_error(path.to_path_buf(), e))?;

        if metadata.is_dir() {
            let entries = std::fs::read_dir(path)
                .map_err(|e| StreamError::file_error(path.to_path_buf(), e))?;
            let mut frames: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|p| p.is_file() && has_extension(p, &STILL_EXTENSIONS))
                .collect();
            if frames.is_empty() {
                return Err(StreamError::media(path, "directory contains no PNG or JPEG frames"));
            }
            frames.sort();
            return Ok(MediaKind::Sequence(frames));
        }

        if has_extension(path, &["gif"]) {
            Ok(MediaKind::Gif(path.to_path_buf()))
        } else if has_extension(path, &STILL_EXTENSIONS) {
            Ok(MediaKind::Sequence(vec![path.to_path_buf()]))
        } else {
            Err(StreamError::media(path, "unsupported media type"))
        }
    }

    /// Decode every frame into `feeder`; runs on a blocking thread
    pub fn decode_into(&self, feeder: &FrameFeeder, sequence_fps: f64) {
        let outcome = match self {
            MediaKind::Gif(path) => decode_gif(path, feeder),
            MediaKind::Sequence(paths) => decode_sequence(paths, sequence_fps, feeder),
        };

        match outcome {
            Ok(count) => {
                info!(frames = count, "Media decoded");
                feeder.finish();
            }
            Err(e) => {
                error!("Media decoding failed: {}", e);
                feeder.fail(e.to_string());
            }
        }
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

fn decode_gif(path: &Path, feeder: &FrameFeeder) -> Result<usize> {
    let file = File::open(path).map_err(|e| StreamError::file_error(path.to_path_buf(), e))?;
    let decoder = GifDecoder::new(BufReader::new(file))
        .map_err(|e| StreamError::media(path, e.to_string()))?;

    let mut count = 0;
    for frame in decoder.into_frames() {
        let frame = frame.map_err(|e| StreamError::media(path, e.to_string()))?;
        let (numer, denom) = frame.delay().numer_denom_ms();
        let mut delay = Duration::from_millis(u64::from(numer / denom.max(1)));
        if delay <= GIF_MIN_DELAY {
            delay = GIF_DEFAULT_DELAY;
        }

        let image = DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8();
        if !feeder.push(image, delay) {
            debug!("Media source dropped, stopping GIF decode");
            break;
        }
        count += 1;
    }
    Ok(count)
}

fn decode_sequence(paths: &[PathBuf], fps: f64, feeder: &FrameFeeder) -> Result<usize> {
    let frame_duration = Duration::try_from_secs_f64(1.0 / fps).map_err(|_| StreamError::Config {
        details: format!("sequence_fps must be positive, got {}", fps),
    })?;

    let mut count = 0;
    for path in paths {
        let image = image::open(path).map_err(|e| StreamError::media(path, e.to_string()))?;
        if !feeder.push(image.to_rgb8(), frame_duration) {
            debug!("Media source dropped, stopping sequence decode");
            break;
        }
        count += 1;
    }
    Ok(count)
}
