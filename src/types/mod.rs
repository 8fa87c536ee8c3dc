//! Core types shared by every component of the streaming client.
//!
//! ## Architecture
//!
//! - [`FramePayload`] is the unit of work sent to the processing service
//! - [`ImagePayload`] holds encoded image bytes with zero-copy sharing via Arc
//! - [`ProcessedResult`] is what comes back: a processed frame or an [`ErrorInfo`]
//! - [`SessionState`] and [`ConnectionState`] are the two observable state enums
//! - [`RefreshRate`] bounds how often the scheduler may attempt a capture
//! - [`SessionSnapshot`] and [`StreamStats`] are what observers of a session see
//!
//! ## Usage Example
//!
//! ```rust
//! use lanevision::types::{FramePayload, ImagePayload};
//! use std::time::Duration;
//!
//! let image = ImagePayload::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9]);
//! let frame = FramePayload::new(image, 640, 360, Duration::from_millis(33));
//!
//! assert_eq!(frame.image.mime, "image/jpeg");
//! assert_eq!(frame.image.len(), 4);
//! ```

mod frame;
mod refresh_rate;
mod snapshot;
mod state;

pub use frame::{ErrorInfo, ErrorKind, FramePayload, ImagePayload, ProcessedResult};
pub use refresh_rate::RefreshRate;
pub use snapshot::{SessionSnapshot, StreamStats};
pub use state::{ConnectionState, SessionState};
