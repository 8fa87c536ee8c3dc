//! Typed application events carried over Socket.IO

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;

use super::packet::SocketPacket;
use crate::types::{ErrorInfo, FramePayload, ImagePayload};
use crate::{Result, StreamError};

/// Event the client emits with each captured frame
pub const IMAGE_EVENT: &str = "image";

/// Event the service emits with a processed frame
pub const RESULT_EVENT: &str = "response_back";

/// Event the service emits when it could not process a frame
pub const PROCESSING_ERROR_EVENT: &str = "processing_error";

/// Inbound application event, validated at the connection boundary
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Processed frame
    Processed(ImagePayload),
    /// Per-frame processing failure
    ProcessingError(ErrorInfo),
    /// Any other event name; ignored by the client
    Unknown(String),
}

#[derive(Deserialize)]
struct ProcessingErrorBody {
    error: String,
}

impl ServerEvent {
    /// Interpret the argument array of a Socket.IO event
    ///
    /// A `response_back` whose image cannot be decoded still answers the
    /// in-flight frame, so it becomes a processing error rather than a
    /// protocol failure.
    pub fn from_event(data: &[Value]) -> Result<Self> {
        let Some(Value::String(name)) = data.first() else {
            return Err(StreamError::protocol("event", "first element must be the event name"));
        };

        match name.as_str() {
            RESULT_EVENT => {
                let image = match data.get(1) {
                    Some(Value::String(url)) => decode_data_url(url),
                    Some(other) => Err(StreamError::protocol(
                        RESULT_EVENT,
                        format!("expected a data URL string, got {}", other),
                    )),
                    None => Err(StreamError::protocol(RESULT_EVENT, "missing image argument")),
                };
                Ok(match image {
                    Ok(image) => ServerEvent::Processed(image),
                    Err(err) => ServerEvent::ProcessingError(ErrorInfo::processing(format!(
                        "Unreadable processed frame: {}",
                        err
                    ))),
                })
            }
            PROCESSING_ERROR_EVENT => {
                let message = match data.get(1) {
                    Some(value) => serde_json::from_value::<ProcessingErrorBody>(value.clone())
                        .map(|body| body.error)
                        .unwrap_or_else(|_| value.to_string()),
                    None => "unknown processing error".to_string(),
                };
                Ok(ServerEvent::ProcessingError(ErrorInfo::processing(format!(
                    "Backend Error: {}",
                    message
                ))))
            }
            other => Ok(ServerEvent::Unknown(other.to_string())),
        }
    }
}

/// Build the `image` event for a captured frame
pub fn image_event(frame: &FramePayload) -> SocketPacket {
    SocketPacket::event(IMAGE_EVENT, vec![Value::String(encode_data_url(&frame.image))])
}

/// Encode an image as a `data:<mime>;base64,<data>` URL
pub fn encode_data_url(image: &ImagePayload) -> String {
    format!("data:{};base64,{}", image.mime, STANDARD.encode(&image.data))
}

/// Decode a base64 data URL into an image payload
pub fn decode_data_url(url: &str) -> Result<ImagePayload> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| StreamError::protocol("data URL", "missing 'data:' scheme"))?;
    let (header, encoded) = rest
        .split_once(',')
        .ok_or_else(|| StreamError::protocol("data URL", "missing ',' separator"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| StreamError::protocol("data URL", "only base64 data URLs are supported"))?;
    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|e| StreamError::protocol("data URL payload", e.to_string()))?;

    let mime = if mime.is_empty() { "application/octet-stream" } else { mime };
    Ok(ImagePayload::new(mime, data))
}
