//! Text transports carrying STOMP frames.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{future, stream::BoxStream, Sink, SinkExt, StreamExt};
use hms_shared::LiveError;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Outgoing half of an open transport.
pub type TextSink = Pin<Box<dyn Sink<String, Error = LiveError> + Send>>;

/// Incoming half of an open transport. Ends when the peer closes.
pub type TextStream = BoxStream<'static, Result<String, LiveError>>;

/// An open, bidirectional text channel.
pub struct TransportChannel {
    pub sink: TextSink,
    pub stream: TextStream,
}

/// Opens text channels to a bus endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<TransportChannel, LiveError>;
}

/// WebSocket transport using tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<TransportChannel, LiveError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))?;
        crate::log_debug!("WebSocket opened to {}", url);

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| LiveError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, LiveError>(Message::text(text))));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| LiveError::Transport("binary frame is not UTF-8".into())),
                ),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "close frame".to_string());
                    Some(Err(LiveError::Closed(reason)))
                }
                // Pings are answered by tungstenite itself.
                Ok(_) => None,
                Err(e) => Some(Err(LiveError::Transport(e.to_string()))),
            })
        });

        Ok(TransportChannel {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}
