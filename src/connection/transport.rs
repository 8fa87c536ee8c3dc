//! Text duplex transports
//!
//! The connection actor only needs a way to write and read websocket text
//! frames. [`Connector`] opens such a duplex; [`WebSocketConnector`] does it
//! over a real websocket, tests plug in an in-memory pair.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tracing::{debug, trace};

use crate::{Result, StreamError};

/// Outbound half: one string per websocket text frame
pub type TextSink = Pin<Box<dyn Sink<String, Error = StreamError> + Send>>;

/// Inbound half; the stream ends when the peer closes
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens a text duplex to a URL
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<(TextSink, TextStream)>;
}

/// Websocket transport backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<(TextSink, TextStream)> {
        debug!(url, "Opening websocket");
        let (socket, response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            StreamError::connection_failed_with_source(format!("{}: {}", url, e), Box::new(e))
        })?;
        trace!(status = %response.status(), "Websocket upgraded");

        let (tx, rx) = socket.split();

        let sink = tx
            .sink_map_err(|e: tungstenite::Error| {
                StreamError::connection_failed_with_source("websocket write", Box::new(e))
            })
            .with(|text: String| future::ready(Ok::<_, StreamError>(Message::Text(Utf8Bytes::from(text)))));

        // Control frames are answered by tungstenite itself
        let stream = rx.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Websocket closed by peer");
                    None
                }
                Ok(Message::Binary(bytes)) => {
                    trace!(len = bytes.len(), "Ignoring binary websocket frame");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(StreamError::connection_failed_with_source(
                    "websocket read",
                    Box::new(e),
                ))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
