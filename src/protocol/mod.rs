//! Wire protocol spoken with the processing service.
//!
//! The backend is a Flask-SocketIO server, so frames travel as Socket.IO
//! events over an Engine.IO websocket. [`packet`] is the framing codec and
//! [`message`] maps event arrays to the typed [`ServerEvent`] union.

pub mod message;
pub mod packet;

pub use message::{
    IMAGE_EVENT, PROCESSING_ERROR_EVENT, RESULT_EVENT, ServerEvent, decode_data_url,
    encode_data_url, image_event,
};
pub use packet::{DEFAULT_NAMESPACE, EnginePacket, OpenHandshake, SocketBody, SocketPacket};
